use crate::error::ReviewError;
use crate::portfolio::{PortfolioDocument, PortfolioSource};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct FilePortfolioSource {
    path: PathBuf,
}

impl FilePortfolioSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl PortfolioSource for FilePortfolioSource {
    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }

    async fn fetch(&self) -> anyhow::Result<PortfolioDocument> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            ReviewError::configuration(format!(
                "cannot read portfolio file {}: {e}",
                self.path.display()
            ))
        })?;

        Ok(PortfolioDocument {
            name: self.path.display().to_string(),
            content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, ReviewError};
    use crate::portfolio::load_portfolio;
    use std::io::Write;

    #[tokio::test]
    async fn loads_tsv_from_disk() {
        let mut file = tempfile::Builder::new().suffix(".tsv").tempfile().unwrap();
        write!(file, "symbol\tquantity\tcost_basis\nAAPL\t10\t150\nMSFT\t5\t300\n").unwrap();

        let source = FilePortfolioSource::new(file.path());
        let portfolio = load_portfolio(&source).await.unwrap();
        assert_eq!(portfolio.len(), 2);
        assert_eq!(portfolio.holdings[1].symbol, "MSFT");
    }

    #[tokio::test]
    async fn missing_file_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = FilePortfolioSource::new(dir.path().join("absent.tsv"));
        let err = load_portfolio(&source).await.unwrap_err();
        assert_eq!(ReviewError::kind_of(&err), Some(ErrorKind::Configuration));
    }
}
