//! Telegram Bot channel: `sendMessage` via the Bot API.

use async_trait::async_trait;
use couponclaw_core::config::TelegramChannelConfig;
use couponclaw_core::error::ChannelError;
use couponclaw_core::traits::Channel;
use couponclaw_core::types::{ChannelKind, Message};
use serde::Deserialize;

use crate::http::{delivery_error, send_error, success_body};

/// Telegram messages are capped at 4096 characters.
const MAX_TEXT_CHARS: usize = 4096;

#[derive(Debug, Deserialize)]
struct TelegramApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

pub struct TelegramChannel {
    client: reqwest::Client,
    bot_token: String,
    default_chat_id: Option<String>,
}

impl TelegramChannel {
    pub fn new(client: reqwest::Client, config: &TelegramChannelConfig) -> Self {
        Self {
            client,
            bot_token: config.bot_token.clone(),
            default_chat_id: Some(config.default_chat_id.clone()).filter(|c| !c.is_empty()),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{}", self.bot_token, method)
    }
}

fn clip(text: &str) -> String {
    if text.chars().count() <= MAX_TEXT_CHARS {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(MAX_TEXT_CHARS - 1).collect();
    clipped.push('…');
    clipped
}

#[async_trait]
impl Channel for TelegramChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Telegram
    }

    fn default_destination(&self) -> Option<&str> {
        self.default_chat_id.as_deref()
    }

    fn addresses_by_user_id(&self) -> bool {
        true
    }

    async fn send(&self, chat_id: &str, message: &Message) -> Result<(), ChannelError> {
        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "text": clip(&message.text()),
                "disable_web_page_preview": true,
            }))
            .send()
            .await
            .map_err(|e| send_error(self.kind(), e))?;

        let body = success_body(self.kind(), resp).await?;
        let parsed: TelegramApiResponse = serde_json::from_str(&body)
            .map_err(|e| delivery_error(self.kind(), format!("invalid response: {e}")))?;
        if !parsed.ok {
            return Err(delivery_error(self.kind(), parsed.description.unwrap_or_default()));
        }
        tracing::debug!("✅ Telegram message sent to {chat_id}: {}", message.title);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_chat_id() {
        let cfg = TelegramChannelConfig { enabled: true, bot_token: "t".into(), default_chat_id: String::new() };
        let ch = TelegramChannel::new(reqwest::Client::new(), &cfg);
        assert_eq!(ch.default_destination(), None);
        assert!(ch.api_url("sendMessage").ends_with("/bott/sendMessage"));

        let cfg = TelegramChannelConfig { default_chat_id: "42".into(), ..cfg };
        let ch = TelegramChannel::new(reqwest::Client::new(), &cfg);
        assert_eq!(ch.default_destination(), Some("42"));
    }

    #[test]
    fn test_clip_long_text() {
        let long = "字".repeat(MAX_TEXT_CHARS + 10);
        assert_eq!(clip(&long).chars().count(), MAX_TEXT_CHARS);
        assert_eq!(clip("short"), "short");
    }
}
