//! Discord webhook: one embed per message.

use async_trait::async_trait;
use couponclaw_core::config::WebhookChannelConfig;
use couponclaw_core::error::ChannelError;
use couponclaw_core::traits::Channel;
use couponclaw_core::types::{ChannelKind, Message, NotifyPriority};

use crate::http::{send_error, success_body};

pub struct DiscordChannel {
    client: reqwest::Client,
    webhook_url: Option<String>,
}

impl DiscordChannel {
    pub fn new(client: reqwest::Client, config: &WebhookChannelConfig) -> Self {
        Self { client, webhook_url: Some(config.url.clone()).filter(|u| !u.is_empty()) }
    }
}

fn embed(message: &Message) -> serde_json::Value {
    let color = match message.priority {
        NotifyPriority::High => 0xFF8800,   // Orange
        NotifyPriority::Normal => 0x00AAFF, // Blue
        NotifyPriority::Low => 0x888888,    // Gray
    };
    serde_json::json!({
        "embeds": [{
            "title": message.title,
            "description": message.body,
            "color": color,
            "footer": {
                "text": format!("{} • {}", message.source, message.timestamp.format("%H:%M:%S UTC"))
            }
        }]
    })
}

#[async_trait]
impl Channel for DiscordChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Discord
    }

    fn default_destination(&self) -> Option<&str> {
        self.webhook_url.as_deref()
    }

    async fn send(&self, webhook_url: &str, message: &Message) -> Result<(), ChannelError> {
        let resp = self
            .client
            .post(webhook_url)
            .json(&embed(message))
            .send()
            .await
            .map_err(|e| send_error(self.kind(), e))?;
        success_body(self.kind(), resp).await?;
        tracing::debug!("✅ Discord notification sent: {}", message.title);
        Ok(())
    }
}
