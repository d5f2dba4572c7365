use crate::config::Settings;
use crate::error::ReviewError;
use crate::portfolio::{PortfolioDocument, PortfolioSource};
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use std::time::Duration;

const STORAGE_API_VERSION: &str = "2021-08-06";
const STORAGE_RESOURCE: &str = "https://storage.azure.com/";
const IDENTITY_API_VERSION: &str = "2019-08-01";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub enum BlobAuth {
    Sas(String),
    /// Token from the Functions host identity endpoint.
    ManagedIdentity { endpoint: String, header: String },
}

#[derive(Debug, Clone)]
pub struct BlobPortfolioSource {
    http: reqwest::Client,
    account_url: String,
    container: String,
    blob: String,
    auth: BlobAuth,
}

#[derive(Debug, Deserialize)]
struct IdentityToken {
    access_token: String,
}

impl BlobPortfolioSource {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let account = settings.require_storage_account_name()?;
        let account_url = format!("https://{account}.blob.core.windows.net");

        let auth = match (
            &settings.storage_sas_token,
            &settings.identity_endpoint,
            &settings.identity_header,
        ) {
            (Some(sas), _, _) => BlobAuth::Sas(sas.clone()),
            (None, Some(endpoint), Some(header)) => BlobAuth::ManagedIdentity {
                endpoint: endpoint.clone(),
                header: header.clone(),
            },
            _ => {
                return Err(ReviewError::configuration(
                    "blob access needs AZURE_STORAGE_SAS_TOKEN or a managed identity (IDENTITY_ENDPOINT, IDENTITY_HEADER)",
                )
                .into())
            }
        };

        Self::new(
            account_url,
            settings.storage_container.clone(),
            settings.storage_blob.clone(),
            auth,
        )
    }

    pub fn new(
        account_url: String,
        container: String,
        blob: String,
        auth: BlobAuth,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .context("failed to build storage http client")?;

        Ok(Self {
            http,
            account_url,
            container,
            blob,
            auth,
        })
    }

    fn blob_url(&self) -> String {
        format!(
            "{}/{}/{}",
            self.account_url.trim_end_matches('/'),
            self.container,
            self.blob
        )
    }

    async fn managed_identity_token(&self, endpoint: &str, header: &str) -> anyhow::Result<String> {
        let res = self
            .http
            .get(endpoint)
            .header("X-IDENTITY-HEADER", header)
            .query(&[
                ("resource", STORAGE_RESOURCE),
                ("api-version", IDENTITY_API_VERSION),
            ])
            .send()
            .await
            .map_err(|e| {
                unreachable_source(format!("identity endpoint request failed: {}", e.without_url()))
            })?;

        let status = res.status();
        let text = res.text().await.map_err(|e| {
            unreachable_source(format!("failed to read identity response: {}", e.without_url()))
        })?;
        if !status.is_success() {
            tracing::error!(%status, body = %text, "identity endpoint rejected the token request");
            return Err(unreachable_source(format!("identity endpoint returned status={status}")));
        }

        let token = serde_json::from_str::<IdentityToken>(&text).map_err(|e| {
            unreachable_source(format!("identity response has no access_token: {e}"))
        })?;
        Ok(token.access_token)
    }
}

#[async_trait::async_trait]
impl PortfolioSource for BlobPortfolioSource {
    fn describe(&self) -> String {
        format!("blob:{}", self.blob_url())
    }

    async fn fetch(&self) -> anyhow::Result<PortfolioDocument> {
        let mut url = self.blob_url();
        let mut headers = HeaderMap::new();
        headers.insert("x-ms-version", HeaderValue::from_static(STORAGE_API_VERSION));

        match &self.auth {
            BlobAuth::Sas(sas) => {
                url.push('?');
                url.push_str(sas.trim_start_matches('?'));
            }
            BlobAuth::ManagedIdentity { endpoint, header } => {
                let token = self.managed_identity_token(endpoint, header).await?;
                let value = HeaderValue::from_str(&format!("Bearer {token}"))
                    .context("identity token is not a valid header value")?;
                headers.insert(AUTHORIZATION, value);
            }
        }

        let res = self
            .http
            .get(&url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| unreachable_source(format!("blob request failed: {}", e.without_url())))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            tracing::error!(blob = %self.blob_url(), %status, "portfolio blob download failed");
            return Err(unreachable_source(format!(
                "blob {} returned status={status}: {body}",
                self.blob_url()
            )));
        }

        let bytes = res.bytes().await.map_err(|e| {
            unreachable_source(format!("failed to read blob body: {}", e.without_url()))
        })?;
        let content = String::from_utf8(bytes.to_vec())
            .map_err(|_| unreachable_source("portfolio blob is not valid UTF-8"))?;

        Ok(PortfolioDocument {
            name: self.blob.clone(),
            content,
        })
    }
}

fn unreachable_source(detail: impl Into<String>) -> anyhow::Error {
    ReviewError::configuration(format!("portfolio source unreachable: {}", detail.into())).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, ReviewError};
    use crate::portfolio::load_portfolio;
    use crate::testing::serve;
    use axum::extract::Query;
    use axum::http::{HeaderMap as AxumHeaders, StatusCode};
    use axum::routing::get;
    use axum::Router;
    use std::collections::HashMap;

    const TSV: &str = "symbol\tquantity\nAAPL\t10\nMSFT\t5\n";

    #[tokio::test]
    async fn downloads_blob_with_sas_token() {
        let app = Router::new().route(
            "/source/portfolio.tsv",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                if q.get("sig").map(String::as_str) == Some("abc") {
                    (StatusCode::OK, TSV.to_string())
                } else {
                    (StatusCode::FORBIDDEN, "no sas".to_string())
                }
            }),
        );
        let base = serve(app).await;

        let source = BlobPortfolioSource::new(
            base,
            "source".to_string(),
            "portfolio.tsv".to_string(),
            BlobAuth::Sas("?sv=2021&sig=abc".to_string()),
        )
        .unwrap();

        let portfolio = load_portfolio(&source).await.unwrap();
        assert_eq!(portfolio.len(), 2);
    }

    #[tokio::test]
    async fn uses_managed_identity_token() {
        let app = Router::new()
            .route(
                "/identity",
                get(|headers: AxumHeaders| async move {
                    assert_eq!(headers["x-identity-header"], "secret");
                    axum::Json(serde_json::json!({"access_token": "tok", "expires_on": "0"}))
                }),
            )
            .route(
                "/source/portfolio.tsv",
                get(|headers: AxumHeaders| async move {
                    let auth = headers.get("authorization").and_then(|v| v.to_str().ok());
                    if auth == Some("Bearer tok") {
                        (StatusCode::OK, TSV.to_string())
                    } else {
                        (StatusCode::UNAUTHORIZED, String::new())
                    }
                }),
            );
        let base = serve(app).await;

        let source = BlobPortfolioSource::new(
            base.clone(),
            "source".to_string(),
            "portfolio.tsv".to_string(),
            BlobAuth::ManagedIdentity {
                endpoint: format!("{base}/identity"),
                header: "secret".to_string(),
            },
        )
        .unwrap();

        let portfolio = load_portfolio(&source).await.unwrap();
        assert_eq!(portfolio.holdings[0].symbol, "AAPL");
    }

    #[tokio::test]
    async fn missing_blob_is_configuration_error() {
        let base = serve(Router::new()).await;
        let source = BlobPortfolioSource::new(
            base,
            "source".to_string(),
            "portfolio.tsv".to_string(),
            BlobAuth::Sas("sig=abc".to_string()),
        )
        .unwrap();

        let err = load_portfolio(&source).await.unwrap_err();
        assert_eq!(ReviewError::kind_of(&err), Some(ErrorKind::Configuration));
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn transport_error_does_not_expose_sas_token() {
        let source = BlobPortfolioSource::new(
            "http://127.0.0.1:1".to_string(),
            "source".to_string(),
            "portfolio.tsv".to_string(),
            BlobAuth::Sas("sv=2021&sig=TOPSECRETSIG".to_string()),
        )
        .unwrap();

        let err = load_portfolio(&source).await.unwrap_err();
        assert_eq!(ReviewError::kind_of(&err), Some(ErrorKind::Configuration));
        let text = format!("{err:#} {err:?}");
        assert!(!text.contains("TOPSECRETSIG"), "{text}");
        assert!(!source.describe().contains("TOPSECRETSIG"));
    }

    #[tokio::test]
    async fn non_utf8_blob_is_configuration_error() {
        let app = Router::new().route(
            "/source/portfolio.tsv",
            get(|| async { vec![0xffu8, 0xfe, b'\t', 0x80] }),
        );
        let base = serve(app).await;
        let source = BlobPortfolioSource::new(
            base,
            "source".to_string(),
            "portfolio.tsv".to_string(),
            BlobAuth::Sas("sig=abc".to_string()),
        )
        .unwrap();

        let err = load_portfolio(&source).await.unwrap_err();
        assert_eq!(ReviewError::kind_of(&err), Some(ErrorKind::Configuration));
        assert!(err.to_string().contains("UTF-8"));
    }

    #[tokio::test]
    async fn rejected_identity_request_is_configuration_error() {
        let app = Router::new().route(
            "/identity",
            get(|| async { (StatusCode::FORBIDDEN, "{\"error\":\"denied\"}") }),
        );
        let base = serve(app).await;
        let source = BlobPortfolioSource::new(
            base.clone(),
            "source".to_string(),
            "portfolio.tsv".to_string(),
            BlobAuth::ManagedIdentity {
                endpoint: format!("{base}/identity"),
                header: "secret".to_string(),
            },
        )
        .unwrap();

        let err = load_portfolio(&source).await.unwrap_err();
        assert_eq!(ReviewError::kind_of(&err), Some(ErrorKind::Configuration));
        assert!(err.to_string().contains("403"));
    }

    #[test]
    fn from_settings_requires_credentials() {
        let settings = crate::config::Settings::from_lookup(|key| match key {
            "AZURE_STORAGE_ACCOUNT_NAME" => Some("acct".to_string()),
            _ => None,
        })
        .unwrap();
        let err = BlobPortfolioSource::from_settings(&settings).unwrap_err();
        assert_eq!(ReviewError::kind_of(&err), Some(ErrorKind::Configuration));
    }
}
