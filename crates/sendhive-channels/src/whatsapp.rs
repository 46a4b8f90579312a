//! WhatsApp instance client.
//!
//! Talks to the per-account instance API on its assigned port. The
//! instance owns the actual WhatsApp session; this client only submits
//! sends and surfaces failures as generic send errors.

use async_trait::async_trait;
use chrono::Utc;
use sendhive_core::error::{Result, SendHiveError};
use sendhive_core::traits::MessageSender;
use sendhive_core::types::{Account, Platform, SendReceipt};

const SEND_TIMEOUT_SECS: u64 = 15;

pub struct WhatsAppInstanceClient {
    client: reqwest::Client,
    host: String,
}

impl Default for WhatsAppInstanceClient {
    fn default() -> Self {
        Self::new()
    }
}

impl WhatsAppInstanceClient {
    pub fn new() -> Self {
        Self::with_host("127.0.0.1")
    }

    /// Instances normally bind loopback; tests and remote runtimes can
    /// point elsewhere.
    pub fn with_host(host: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            host: host.to_string(),
        }
    }

    fn api_url(&self, port: u16, method: &str) -> String {
        format!("http://{}:{}/api/{}", self.host, port, method)
    }
}

#[async_trait]
impl MessageSender for WhatsAppInstanceClient {
    fn platform(&self) -> Platform {
        Platform::Whatsapp
    }

    async fn send(&self, account: &Account, target: &str, content: &str) -> Result<SendReceipt> {
        let port = account
            .runtime
            .as_ref()
            .ok_or_else(|| {
                SendHiveError::Send(format!("account {} not connected", account.id))
            })?
            .port;

        let body = serde_json::json!({
            "to": target,
            "type": "text",
            "text": { "body": content }
        });

        let response = self
            .client
            .post(self.api_url(port, "send"))
            .json(&body)
            .timeout(std::time::Duration::from_secs(SEND_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| SendHiveError::Send(format!("WhatsApp instance request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(SendHiveError::Send(format!(
                "WhatsApp instance error {status}: {error_text}"
            )));
        }

        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SendHiveError::Send(format!("Invalid instance response: {e}")))?;
        let message_id = result["messageId"].as_str().unwrap_or("unknown").to_string();

        tracing::debug!("WhatsApp send ok: {} → {}", message_id, target);
        Ok(SendReceipt {
            message_id,
            at: Utc::now(),
        })
    }
}
