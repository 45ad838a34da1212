//! Bark push (iOS): `GET {server}/{device_key}/{title}/{body}`.

use async_trait::async_trait;
use couponclaw_core::config::KeyedChannelConfig;
use couponclaw_core::error::ChannelError;
use couponclaw_core::traits::Channel;
use couponclaw_core::types::{ChannelKind, Message};

use crate::http::{delivery_error, send_error, success_body};

const PUBLIC_SERVER: &str = "https://api.day.app";

pub struct BarkChannel {
    client: reqwest::Client,
    server: String,
    device_key: Option<String>,
}

impl BarkChannel {
    pub fn new(client: reqwest::Client, config: &KeyedChannelConfig) -> Self {
        Self {
            client,
            server: config.server.clone().unwrap_or_else(|| PUBLIC_SERVER.into()),
            device_key: Some(config.key.clone()).filter(|k| !k.is_empty()),
        }
    }

    /// Path segments are percent-encoded; titles and bodies may contain `/`.
    fn push_url(&self, device_key: &str, message: &Message) -> Result<reqwest::Url, ChannelError> {
        let mut url = reqwest::Url::parse(&self.server)
            .map_err(|e| delivery_error(ChannelKind::Bark, format!("bad server url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| delivery_error(ChannelKind::Bark, "server url cannot carry a path"))?
            .pop_if_empty()
            .push(device_key)
            .push(&message.title)
            .push(&message.body);
        Ok(url)
    }
}

#[async_trait]
impl Channel for BarkChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Bark
    }

    fn default_destination(&self) -> Option<&str> {
        self.device_key.as_deref()
    }

    async fn send(&self, device_key: &str, message: &Message) -> Result<(), ChannelError> {
        let url = self.push_url(device_key, message)?;
        let resp = self
            .client
            .get(url)
            .query(&[("group", "couponclaw")])
            .send()
            .await
            .map_err(|e| send_error(self.kind(), e))?;
        success_body(self.kind(), resp).await?;
        tracing::debug!("✅ Bark push sent: {}", message.title);
        Ok(())
    }
}
