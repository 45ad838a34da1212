//! Feishu (Lark) custom-bot webhook.

use async_trait::async_trait;
use couponclaw_core::config::WebhookChannelConfig;
use couponclaw_core::error::ChannelError;
use couponclaw_core::traits::Channel;
use couponclaw_core::types::{ChannelKind, Message};
use serde::Deserialize;

use crate::http::{delivery_error, send_error, success_body};

/// Feishu answers 200 even for rejected messages; the body carries the code.
#[derive(Debug, Deserialize)]
struct FeishuResponse {
    #[serde(default, alias = "StatusCode")]
    code: i64,
    #[serde(default, alias = "StatusMessage")]
    msg: String,
}

pub struct FeishuChannel {
    client: reqwest::Client,
    webhook_url: Option<String>,
}

impl FeishuChannel {
    pub fn new(client: reqwest::Client, config: &WebhookChannelConfig) -> Self {
        Self { client, webhook_url: Some(config.url.clone()).filter(|u| !u.is_empty()) }
    }
}

fn check_body(body: &str) -> Result<(), ChannelError> {
    match serde_json::from_str::<FeishuResponse>(body) {
        Ok(r) if r.code != 0 => Err(delivery_error(ChannelKind::Feishu, format!("code {}: {}", r.code, r.msg))),
        _ => Ok(()),
    }
}

#[async_trait]
impl Channel for FeishuChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Feishu
    }

    fn default_destination(&self) -> Option<&str> {
        self.webhook_url.as_deref()
    }

    async fn send(&self, webhook_url: &str, message: &Message) -> Result<(), ChannelError> {
        let resp = self
            .client
            .post(webhook_url)
            .json(&serde_json::json!({
                "msg_type": "text",
                "content": { "text": message.text() }
            }))
            .send()
            .await
            .map_err(|e| send_error(self.kind(), e))?;
        let body = success_body(self.kind(), resp).await?;
        check_body(&body)?;
        tracing::debug!("✅ Feishu message sent: {}", message.title);
        Ok(())
    }
}
