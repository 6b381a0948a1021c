// =============================================================================
// Notification Sink — push delivery for alerts and digests
// =============================================================================
//
// Delivery failure is never fatal: callers log it and carry on, no retries.
// The bundled sink posts to the ServerChan push API:
//
//   POST https://sctapi.ftqq.com/<SENDKEY>.send   (form: text, desp)
//
// SECURITY: the send key is part of the URL path and is never logged.
// =============================================================================

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::error::{ConfigurationError, NotifyError};

const SERVERCHAN_BASE_URL: &str = "https://sctapi.ftqq.com";
/// Response bodies are truncated to this many characters in receipts.
const RECEIPT_BODY_LIMIT: usize = 200;

/// What the push endpoint said about a delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReceipt {
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, title: &str, body: &str) -> Result<DeliveryReceipt, NotifyError>;
}

#[derive(Serialize)]
struct PushForm<'a> {
    text: &'a str,
    desp: &'a str,
}

/// ServerChan push client.
pub struct ServerChanSink {
    send_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for ServerChanSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerChanSink")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ServerChanSink {
    /// Build a sink for `send_key`.  An empty key is a configuration error.
    pub fn new(send_key: impl Into<String>) -> Result<Self, ConfigurationError> {
        let send_key = send_key.into().trim().to_string();
        if send_key.is_empty() {
            return Err(ConfigurationError::Missing("SC_SENDKEY"));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ConfigurationError::Invalid {
                name: "http_client",
                reason: e.to_string(),
            })?;

        Ok(Self {
            send_key,
            base_url: SERVERCHAN_BASE_URL.to_string(),
            client,
        })
    }

    /// Build a sink from the `SC_SENDKEY` environment variable.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        let key = std::env::var("SC_SENDKEY").map_err(|_| ConfigurationError::Missing("SC_SENDKEY"))?;
        Self::new(key)
    }

    fn endpoint(&self) -> String {
        format!("{}/{}.send", self.base_url, self.send_key)
    }
}

#[async_trait]
impl NotificationSink for ServerChanSink {
    #[instrument(skip(self, body), name = "serverchan::send")]
    async fn send(&self, title: &str, body: &str) -> Result<DeliveryReceipt, NotifyError> {
        let resp = self
            .client
            .post(self.endpoint())
            .form(&PushForm { text: title, desp: body })
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.without_url().to_string()))?;

        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|e| NotifyError::Transport(e.without_url().to_string()))?;
        let body: String = text.chars().take(RECEIPT_BODY_LIMIT).collect();

        if !(200..300).contains(&status) {
            return Err(NotifyError::Rejected { status, body });
        }

        debug!(status, "push delivered");
        Ok(DeliveryReceipt { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_is_a_configuration_error() {
        assert_eq!(
            ServerChanSink::new("  ").unwrap_err(),
            ConfigurationError::Missing("SC_SENDKEY")
        );
    }

    #[test]
    fn endpoint_embeds_key_but_debug_hides_it() {
        let sink = ServerChanSink::new("SCT123abc").unwrap();
        assert_eq!(sink.endpoint(), "https://sctapi.ftqq.com/SCT123abc.send");
        assert!(!format!("{sink:?}").contains("SCT123abc"));
    }
}
