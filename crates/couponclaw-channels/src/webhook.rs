//! Generic HTTP webhook: POST the message as JSON.

use async_trait::async_trait;
use couponclaw_core::config::WebhookChannelConfig;
use couponclaw_core::error::ChannelError;
use couponclaw_core::traits::Channel;
use couponclaw_core::types::{ChannelKind, Message};

use crate::http::{send_error, success_body};

pub struct WebhookChannel {
    client: reqwest::Client,
    url: Option<String>,
}

impl WebhookChannel {
    pub fn new(client: reqwest::Client, config: &WebhookChannelConfig) -> Self {
        Self { client, url: Some(config.url.clone()).filter(|u| !u.is_empty()) }
    }
}

#[async_trait]
impl Channel for WebhookChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Webhook
    }

    fn default_destination(&self) -> Option<&str> {
        self.url.as_deref()
    }

    async fn send(&self, url: &str, message: &Message) -> Result<(), ChannelError> {
        let resp = self
            .client
            .post(url)
            .json(&serde_json::json!({
                "title": message.title,
                "body": message.body,
                "priority": format!("{:?}", message.priority),
                "source": message.source,
                "timestamp": message.timestamp.to_rfc3339(),
            }))
            .send()
            .await
            .map_err(|e| send_error(self.kind(), e))?;
        success_body(self.kind(), resp).await?;
        tracing::debug!("✅ Webhook notification sent: {}", message.title);
        Ok(())
    }
}
