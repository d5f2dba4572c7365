pub mod domain;
pub mod error;
pub mod llm;
pub mod notify;
pub mod pipeline;
pub mod portfolio;
pub mod report;
pub mod time;

#[cfg(test)]
mod testing;

pub mod config {
    use crate::error::ReviewError;
    use std::path::PathBuf;

    const DEFAULT_PORTFOLIO_PATH: &str = "portfolio.tsv";
    const DEFAULT_CONTAINER: &str = "source";
    const DEFAULT_BLOB: &str = "portfolio.tsv";
    const DEFAULT_DEPLOYMENT: &str = "gpt-4";
    const DEFAULT_API_VERSION: &str = "2024-02-01";
    const DEFAULT_MAX_TOKENS: u32 = 1000;
    const DEFAULT_TIMEOUT_SECS: u64 = 60;
    const DEFAULT_PRICE_INPUT_PER_1K: f64 = 0.01;
    const DEFAULT_PRICE_OUTPUT_PER_1K: f64 = 0.03;
    const DEFAULT_NEW_IDEAS: u32 = 5;
    const UTC_OFFSET_HOURS_RANGE: std::ops::RangeInclusive<i32> = -23..=23;
    const DEFAULT_FOCUS: &str = "US-listed stocks that pay a high dividend or show strong growth potential within at most 3 months";

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum RunMode {
        Development,
        Production,
    }

    impl RunMode {
        pub fn as_str(self) -> &'static str {
            match self {
                RunMode::Development => "Development",
                RunMode::Production => "Production",
            }
        }
    }

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub run_mode: RunMode,
        pub portfolio_path: PathBuf,
        pub storage_account_name: Option<String>,
        pub storage_container: String,
        pub storage_blob: String,
        pub storage_sas_token: Option<String>,
        pub identity_endpoint: Option<String>,
        pub identity_header: Option<String>,
        pub azure_openai_endpoint: Option<String>,
        pub azure_openai_api_key: Option<String>,
        pub azure_openai_deployment: String,
        pub azure_openai_api_version: String,
        pub azure_openai_max_tokens: u32,
        pub azure_openai_timeout_secs: u64,
        pub price_input_per_1k: f64,
        pub price_output_per_1k: f64,
        pub review_focus: String,
        pub review_new_ideas: u32,
        pub acs_connection_string: Option<String>,
        pub sender_email: Option<String>,
        pub receiver_emails: Vec<String>,
        pub receiver_display_name: Option<String>,
        pub report_utc_offset_hours: i32,
        pub sentry_dsn: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Self::from_lookup(|key| std::env::var(key).ok())
        }

        /// Builds settings from an arbitrary key lookup. Empty values count as unset.
        pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
        where
            F: Fn(&str) -> Option<String>,
        {
            let get = |key: &str| {
                lookup(key)
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
            };

            let run_mode = match get("AZURE_FUNCTIONS_ENVIRONMENT").as_deref() {
                Some("Development") => RunMode::Development,
                _ => RunMode::Production,
            };

            let receiver_emails = get("RECEIVER_EMAIL")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default();

            let report_utc_offset_hours: i32 = parse_or(
                "REPORT_UTC_OFFSET_HOURS",
                get("REPORT_UTC_OFFSET_HOURS"),
                0,
            )?;
            if !UTC_OFFSET_HOURS_RANGE.contains(&report_utc_offset_hours) {
                return Err(ReviewError::configuration(format!(
                    "REPORT_UTC_OFFSET_HOURS must be within -23..=23, got {report_utc_offset_hours}"
                ))
                .into());
            }

            Ok(Self {
                run_mode,
                portfolio_path: get("PORTFOLIO_PATH")
                    .unwrap_or_else(|| DEFAULT_PORTFOLIO_PATH.to_string())
                    .into(),
                storage_account_name: get("AZURE_STORAGE_ACCOUNT_NAME"),
                storage_container: get("AZURE_STORAGE_CONTAINER")
                    .unwrap_or_else(|| DEFAULT_CONTAINER.to_string()),
                storage_blob: get("AZURE_STORAGE_BLOB")
                    .unwrap_or_else(|| DEFAULT_BLOB.to_string()),
                storage_sas_token: get("AZURE_STORAGE_SAS_TOKEN"),
                identity_endpoint: get("IDENTITY_ENDPOINT"),
                identity_header: get("IDENTITY_HEADER"),
                azure_openai_endpoint: get("AZURE_OPENAI_ENDPOINT"),
                azure_openai_api_key: get("AZURE_OPENAI_API_KEY"),
                azure_openai_deployment: get("AZURE_OPENAI_DEPLOYMENT")
                    .unwrap_or_else(|| DEFAULT_DEPLOYMENT.to_string()),
                azure_openai_api_version: get("AZURE_OPENAI_API_VERSION")
                    .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
                azure_openai_max_tokens: parse_or(
                    "AZURE_OPENAI_MAX_TOKENS",
                    get("AZURE_OPENAI_MAX_TOKENS"),
                    DEFAULT_MAX_TOKENS,
                )?,
                azure_openai_timeout_secs: parse_or(
                    "AZURE_OPENAI_TIMEOUT_SECS",
                    get("AZURE_OPENAI_TIMEOUT_SECS"),
                    DEFAULT_TIMEOUT_SECS,
                )?,
                price_input_per_1k: parse_or(
                    "MODEL_PRICE_INPUT_PER_1K",
                    get("MODEL_PRICE_INPUT_PER_1K"),
                    DEFAULT_PRICE_INPUT_PER_1K,
                )?,
                price_output_per_1k: parse_or(
                    "MODEL_PRICE_OUTPUT_PER_1K",
                    get("MODEL_PRICE_OUTPUT_PER_1K"),
                    DEFAULT_PRICE_OUTPUT_PER_1K,
                )?,
                review_focus: get("REVIEW_FOCUS").unwrap_or_else(|| DEFAULT_FOCUS.to_string()),
                review_new_ideas: parse_or(
                    "REVIEW_NEW_IDEAS",
                    get("REVIEW_NEW_IDEAS"),
                    DEFAULT_NEW_IDEAS,
                )?,
                acs_connection_string: get("ACS_CONNECTION_STRING"),
                sender_email: get("SENDER_EMAIL"),
                receiver_emails,
                receiver_display_name: get("RECEIVER_DISPLAY_NAME"),
                report_utc_offset_hours,
                sentry_dsn: get("SENTRY_DSN"),
            })
        }

        pub fn is_development(&self) -> bool {
            self.run_mode == RunMode::Development
        }

        pub fn require_storage_account_name(&self) -> anyhow::Result<&str> {
            require(&self.storage_account_name, "AZURE_STORAGE_ACCOUNT_NAME")
        }

        pub fn require_azure_openai_endpoint(&self) -> anyhow::Result<&str> {
            require(&self.azure_openai_endpoint, "AZURE_OPENAI_ENDPOINT")
        }

        pub fn require_azure_openai_api_key(&self) -> anyhow::Result<&str> {
            require(&self.azure_openai_api_key, "AZURE_OPENAI_API_KEY")
        }

        pub fn require_acs_connection_string(&self) -> anyhow::Result<&str> {
            require(&self.acs_connection_string, "ACS_CONNECTION_STRING")
        }

        pub fn require_sender_email(&self) -> anyhow::Result<&str> {
            require(&self.sender_email, "SENDER_EMAIL")
        }

        pub fn require_receiver_emails(&self) -> anyhow::Result<&[String]> {
            if self.receiver_emails.is_empty() {
                return Err(ReviewError::configuration("RECEIVER_EMAIL is required").into());
            }
            Ok(&self.receiver_emails)
        }
    }

    fn require<'a>(value: &'a Option<String>, key: &str) -> anyhow::Result<&'a str> {
        value
            .as_deref()
            .ok_or_else(|| ReviewError::configuration(format!("{key} is required")).into())
    }

    fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> anyhow::Result<T>
    where
        T: std::str::FromStr,
    {
        match raw {
            None => Ok(default),
            Some(s) => s.parse::<T>().map_err(|_| {
                ReviewError::configuration(format!("{key} has an invalid value: {s:?}")).into()
            }),
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::error::{ErrorKind, ReviewError};
        use std::collections::HashMap;

        fn settings(pairs: &[(&str, &str)]) -> anyhow::Result<Settings> {
            let env: HashMap<String, String> = pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            Settings::from_lookup(|key| env.get(key).cloned())
        }

        #[test]
        fn defaults_apply_when_unset() {
            let s = settings(&[]).unwrap();
            assert_eq!(s.run_mode, RunMode::Production);
            assert_eq!(s.storage_container, "source");
            assert_eq!(s.storage_blob, "portfolio.tsv");
            assert_eq!(s.azure_openai_deployment, "gpt-4");
            assert_eq!(s.azure_openai_max_tokens, 1000);
            assert_eq!(s.review_new_ideas, 5);
            assert!(s.receiver_emails.is_empty());
        }

        #[test]
        fn development_mode_and_receiver_list() {
            let s = settings(&[
                ("AZURE_FUNCTIONS_ENVIRONMENT", "Development"),
                ("RECEIVER_EMAIL", "a@example.com, b@example.com ,"),
            ])
            .unwrap();
            assert!(s.is_development());
            assert_eq!(s.receiver_emails, vec!["a@example.com", "b@example.com"]);
        }

        #[test]
        fn missing_required_value_is_configuration_error() {
            let s = settings(&[("AZURE_OPENAI_API_KEY", "   ")]).unwrap();
            let err = s.require_azure_openai_api_key().unwrap_err();
            assert_eq!(ReviewError::kind_of(&err), Some(ErrorKind::Configuration));
            assert!(err.to_string().contains("AZURE_OPENAI_API_KEY"));
        }

        #[test]
        fn unparseable_number_is_configuration_error() {
            let err = settings(&[("AZURE_OPENAI_MAX_TOKENS", "lots")]).unwrap_err();
            assert_eq!(ReviewError::kind_of(&err), Some(ErrorKind::Configuration));
        }

        #[test]
        fn utc_offset_must_be_a_real_offset() {
            assert_eq!(
                settings(&[("REPORT_UTC_OFFSET_HOURS", "-5")])
                    .unwrap()
                    .report_utc_offset_hours,
                -5
            );
            for bad in ["30", "600000", "-24"] {
                let err = settings(&[("REPORT_UTC_OFFSET_HOURS", bad)]).unwrap_err();
                assert_eq!(
                    ReviewError::kind_of(&err),
                    Some(ErrorKind::Configuration),
                    "{bad}"
                );
            }
        }
    }
}
