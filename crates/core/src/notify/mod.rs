pub mod acs;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub address: String,
    pub display_name: Option<String>,
}

impl Recipient {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            display_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub subject: String,
    pub plain_text: String,
    pub html: String,
    pub to: Vec<Recipient>,
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    fn channel(&self) -> &'static str;

    /// Returns once the provider has accepted and delivered the message, or fails.
    async fn send(&self, message: &EmailMessage) -> anyhow::Result<()>;
}

/// Builds the recipient list: every address gets the same optional display name.
pub fn recipients_from(addresses: &[String], display_name: Option<&str>) -> Vec<Recipient> {
    addresses
        .iter()
        .map(|address| Recipient {
            address: address.clone(),
            display_name: display_name.map(str::to_string),
        })
        .collect()
}
