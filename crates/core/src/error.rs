use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Storage,
    Model,
    Email,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Service::Storage => "storage",
            Service::Model => "model",
            Service::Email => "email",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    ExternalService,
}

/// Failure classes surfaced at the invocation boundary. Neither is retried.
#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("configuration error: {detail}")]
    Configuration { detail: String },

    #[error("external service error (service={service}, stage={stage}): {detail}")]
    ExternalService {
        service: Service,
        stage: &'static str,
        detail: String,
        raw_output: Option<String>,
        raw_response_json: Option<Value>,
    },
}

impl ReviewError {
    pub fn configuration(detail: impl Into<String>) -> Self {
        ReviewError::Configuration {
            detail: detail.into(),
        }
    }

    pub fn external(service: Service, stage: &'static str, detail: impl Into<String>) -> Self {
        ReviewError::ExternalService {
            service,
            stage,
            detail: detail.into(),
            raw_output: None,
            raw_response_json: None,
        }
    }

    /// Attaches the upstream body. Only meaningful for `ExternalService`.
    pub fn with_raw_output(mut self, raw: String) -> Self {
        if let ReviewError::ExternalService {
            raw_output,
            raw_response_json,
            ..
        } = &mut self
        {
            *raw_response_json = serde_json::from_str::<Value>(&raw).ok();
            *raw_output = Some(raw);
        }
        self
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ReviewError::Configuration { .. } => ErrorKind::Configuration,
            ReviewError::ExternalService { .. } => ErrorKind::ExternalService,
        }
    }

    /// Finds the first classified error anywhere in the chain, so added context does not hide it.
    pub fn find(err: &anyhow::Error) -> Option<&ReviewError> {
        err.chain().find_map(|cause| cause.downcast_ref::<ReviewError>())
    }

    pub fn kind_of(err: &anyhow::Error) -> Option<ErrorKind> {
        Self::find(err).map(ReviewError::kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn classification_survives_context() {
        let res: anyhow::Result<()> =
            Err(ReviewError::external(Service::Model, "http", "status=500").into());
        let err = res.context("generate recommendations").unwrap_err();
        assert_eq!(ReviewError::kind_of(&err), Some(ErrorKind::ExternalService));
    }

    #[test]
    fn raw_output_is_parsed_when_json() {
        let err = ReviewError::external(Service::Email, "send", "status=400")
            .with_raw_output("{\"error\":{\"code\":\"BadRequest\"}}".to_string());
        match err {
            ReviewError::ExternalService {
                raw_output,
                raw_response_json,
                ..
            } => {
                assert!(raw_output.is_some());
                assert_eq!(raw_response_json.unwrap()["error"]["code"], "BadRequest");
            }
            _ => panic!("expected external service error"),
        }
    }

    #[test]
    fn unclassified_errors_have_no_kind() {
        let err = anyhow::anyhow!("boom");
        assert_eq!(ReviewError::kind_of(&err), None);
    }
}
