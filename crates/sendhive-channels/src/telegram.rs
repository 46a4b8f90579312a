//! Telegram instance client — same contract as WhatsApp, Bot-API-shaped
//! request body.

use async_trait::async_trait;
use chrono::Utc;
use sendhive_core::error::{Result, SendHiveError};
use sendhive_core::traits::MessageSender;
use sendhive_core::types::{Account, Platform, SendReceipt};
use serde::Deserialize;

const SEND_TIMEOUT_SECS: u64 = 15;

pub struct TelegramInstanceClient {
    client: reqwest::Client,
    host: String,
}

#[derive(Debug, Deserialize)]
struct InstanceSendResponse {
    ok: bool,
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

impl Default for TelegramInstanceClient {
    fn default() -> Self {
        Self::new()
    }
}

impl TelegramInstanceClient {
    pub fn new() -> Self {
        Self::with_host("127.0.0.1")
    }

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
impl MessageSender for TelegramInstanceClient {
    fn platform(&self) -> Platform {
        Platform::Telegram
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
            "chat_id": target,
            "text": content,
        });

        let response = self
            .client
            .post(self.api_url(port, "sendMessage"))
            .json(&body)
            .timeout(std::time::Duration::from_secs(SEND_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| SendHiveError::Send(format!("Telegram instance request failed: {e}")))?;

        let parsed: InstanceSendResponse = response
            .json()
            .await
            .map_err(|e| SendHiveError::Send(format!("Invalid instance response: {e}")))?;

        if !parsed.ok {
            return Err(SendHiveError::Send(format!(
                "Telegram instance error: {}",
                parsed.description.unwrap_or_default()
            )));
        }

        let message_id = parsed.message_id.unwrap_or_else(|| "unknown".into());
        tracing::debug!("Telegram send ok: {} → {}", message_id, target);
        Ok(SendReceipt {
            message_id,
            at: Utc::now(),
        })
    }
}
