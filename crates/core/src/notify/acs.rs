use crate::config::Settings;
use crate::error::{ReviewError, Service};
use crate::notify::{EmailMessage, Notifier};
use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

const API_VERSION: &str = "2023-03-31";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_MAX_POLLS: u32 = 60;
const MAX_RETRY_AFTER: Duration = Duration::from_secs(10);

/// Azure Communication Services Email, authenticated with the access key from the
/// connection string (HMAC-SHA256 request signing).
#[derive(Debug, Clone)]
pub struct AcsEmailClient {
    http: reqwest::Client,
    endpoint: Url,
    access_key: Vec<u8>,
    sender: String,
    poll_interval: Duration,
    max_polls: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SignedHeaders {
    date: String,
    content_hash: String,
    authorization: String,
}

impl AcsEmailClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let connection_string = settings.require_acs_connection_string()?;
        let sender = settings.require_sender_email()?;
        Self::new(connection_string, sender)
    }

    pub fn new(connection_string: &str, sender: impl Into<String>) -> anyhow::Result<Self> {
        let (endpoint, access_key) = parse_connection_string(connection_string)?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .context("failed to build email http client")?;

        Ok(Self {
            http,
            endpoint,
            access_key,
            sender: sender.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
        })
    }

    pub fn with_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }

    fn sign(
        &self,
        method: &Method,
        url: &Url,
        date: &str,
        body: &[u8],
    ) -> anyhow::Result<SignedHeaders> {
        let content_hash = BASE64.encode(Sha256::digest(body));

        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => anyhow::bail!("email endpoint has no host: {url}"),
        };
        let path_and_query = match url.query() {
            Some(q) => format!("{}?{q}", url.path()),
            None => url.path().to_string(),
        };

        let string_to_sign = format!("{method}\n{path_and_query}\n{date};{host};{content_hash}");
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.access_key)
            .context("invalid ACS access key")?;
        mac.update(string_to_sign.as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());

        Ok(SignedHeaders {
            date: date.to_string(),
            content_hash,
            authorization: format!(
                "HMAC-SHA256 SignedHeaders=x-ms-date;host;x-ms-content-sha256&Signature={signature}"
            ),
        })
    }

    async fn signed_request(
        &self,
        method: Method,
        url: Url,
        body: Vec<u8>,
        stage: &'static str,
    ) -> anyhow::Result<reqwest::Response> {
        let date = chrono::Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let signed = self.sign(&method, &url, &date, &body)?;

        let mut headers = HeaderMap::new();
        headers.insert("x-ms-date", HeaderValue::from_str(&signed.date)?);
        headers.insert("x-ms-content-sha256", HeaderValue::from_str(&signed.content_hash)?);
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&signed.authorization)?);
        if !body.is_empty() {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        let mut req = self.http.request(method, url).headers(headers);
        if !body.is_empty() {
            req = req.body(body);
        }
        req.send().await.map_err(|e| {
            ReviewError::external(Service::Email, stage, format!("request failed: {e}")).into()
        })
    }

    fn operation_url(
        &self,
        location: Option<&str>,
        operation_id: Option<&str>,
    ) -> anyhow::Result<Url> {
        if let Some(location) = location {
            return self
                .endpoint
                .join(location)
                .with_context(|| format!("invalid operation-location: {location}"));
        }
        let id = operation_id.ok_or_else(|| {
            ReviewError::external(
                Service::Email,
                "send",
                "response has neither operation-location nor id",
            )
        })?;
        let mut url = self
            .endpoint
            .join(&format!("emails/operations/{id}"))
            .context("invalid operation id")?;
        url.query_pairs_mut().append_pair("api-version", API_VERSION);
        Ok(url)
    }

    async fn operation_status(&self, url: &Url) -> anyhow::Result<OperationStatus> {
        let res = self
            .signed_request(Method::GET, url.clone(), Vec::new(), "delivery")
            .await?;
        let status = res.status();
        let text = res.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ReviewError::external(
                Service::Email,
                "delivery",
                format!("status poll returned status={status}"),
            )
            .with_raw_output(text)
            .into());
        }
        serde_json::from_str::<OperationStatus>(&text).map_err(|e| {
            let detail = format!("unexpected status payload: {e}");
            ReviewError::external(Service::Email, "delivery", detail)
                .with_raw_output(text)
                .into()
        })
    }
}

#[async_trait::async_trait]
impl Notifier for AcsEmailClient {
    fn channel(&self) -> &'static str {
        "acs_email"
    }

    async fn send(&self, message: &EmailMessage) -> anyhow::Result<()> {
        if message.to.is_empty() {
            return Err(ReviewError::configuration("email has no recipients").into());
        }

        let payload = SendRequest {
            sender_address: &self.sender,
            content: Content {
                subject: &message.subject,
                plain_text: &message.plain_text,
                html: &message.html,
            },
            recipients: Recipients {
                to: message
                    .to
                    .iter()
                    .map(|r| Address {
                        address: &r.address,
                        display_name: r.display_name.as_deref(),
                    })
                    .collect(),
            },
        };
        let body = serde_json::to_vec(&payload).context("failed to encode email payload")?;

        let mut url = self.endpoint.join("./emails:send").context("invalid email endpoint")?;
        url.query_pairs_mut().append_pair("api-version", API_VERSION);

        let res = self.signed_request(Method::POST, url, body, "send").await?;
        let status = res.status();
        let location = res
            .headers()
            .get("operation-location")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let retry_after = res
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        let text = res.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(ReviewError::external(Service::Email, "send", format!("status={status}"))
                .with_raw_output(text)
                .into());
        }

        let accepted = serde_json::from_str::<OperationStatus>(&text).ok();
        if accepted.as_ref().map(|s| s.status.as_str()) == Some("Succeeded") {
            tracing::info!(recipients = message.to.len(), "email delivered");
            return Ok(());
        }

        let op_url = self.operation_url(
            location.as_deref(),
            accepted.as_ref().and_then(|s| s.id.as_deref()),
        )?;
        let delay = retry_after
            .map(|d| d.min(MAX_RETRY_AFTER))
            .unwrap_or(self.poll_interval);

        for attempt in 1..=self.max_polls {
            tokio::time::sleep(delay).await;
            let op = self.operation_status(&op_url).await?;
            match op.status.as_str() {
                "Succeeded" => {
                    tracing::info!(recipients = message.to.len(), attempt, "email delivered");
                    return Ok(());
                }
                "Failed" | "Canceled" => {
                    let detail = op
                        .error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "no error detail".to_string());
                    return Err(ReviewError::external(
                        Service::Email,
                        "delivery",
                        format!("send operation {}: {detail}", op.status),
                    )
                    .into());
                }
                other => {
                    tracing::debug!(attempt, status = other, "email send still in progress");
                }
            }
        }

        Err(ReviewError::external(
            Service::Email,
            "delivery",
            format!("send operation did not finish after {} polls", self.max_polls),
        )
        .into())
    }
}

fn parse_connection_string(s: &str) -> anyhow::Result<(Url, Vec<u8>)> {
    let mut endpoint = None;
    let mut access_key = None;
    for part in s.split(';') {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "endpoint" => endpoint = Some(value.trim()),
            "accesskey" => access_key = Some(value.trim()),
            _ => {}
        }
    }

    let invalid = |detail: &str| -> anyhow::Error {
        ReviewError::configuration(format!("ACS_CONNECTION_STRING {detail}")).into()
    };

    let endpoint = endpoint.ok_or_else(|| invalid("has no endpoint"))?;
    let access_key = access_key.ok_or_else(|| invalid("has no accesskey"))?;

    // A trailing slash keeps `Url::join` relative to the endpoint.
    let endpoint = if endpoint.ends_with('/') {
        endpoint.to_string()
    } else {
        format!("{endpoint}/")
    };
    let endpoint = Url::parse(&endpoint).map_err(|_| invalid("has an invalid endpoint"))?;
    let access_key = BASE64
        .decode(access_key)
        .map_err(|_| invalid("has an accesskey that is not base64"))?;

    Ok((endpoint, access_key))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest<'a> {
    sender_address: &'a str,
    content: Content<'a>,
    recipients: Recipients<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Content<'a> {
    subject: &'a str,
    plain_text: &'a str,
    html: &'a str,
}

#[derive(Debug, Serialize)]
struct Recipients<'a> {
    to: Vec<Address<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Address<'a> {
    address: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<&'a str>,
}

#[derive(Debug, Clone, Deserialize)]
struct OperationStatus {
    #[serde(default)]
    id: Option<String>,
    status: String,
    #[serde(default)]
    error: Option<serde_json::Value>,
}
