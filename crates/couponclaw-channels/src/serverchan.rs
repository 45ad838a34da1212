//! ServerChan (Server酱): form POST to `{server}/{sendkey}.send`.

use async_trait::async_trait;
use couponclaw_core::config::KeyedChannelConfig;
use couponclaw_core::error::ChannelError;
use couponclaw_core::traits::Channel;
use couponclaw_core::types::{ChannelKind, Message};

use crate::http::{send_error, success_body};

const PUBLIC_SERVER: &str = "https://sctapi.ftqq.com";

pub struct ServerChanChannel {
    client: reqwest::Client,
    server: String,
    send_key: Option<String>,
}

impl ServerChanChannel {
    pub fn new(client: reqwest::Client, config: &KeyedChannelConfig) -> Self {
        Self {
            client,
            server: config
                .server
                .as_deref()
                .unwrap_or(PUBLIC_SERVER)
                .trim_end_matches('/')
                .to_string(),
            send_key: Some(config.key.clone()).filter(|k| !k.is_empty()),
        }
    }

    fn send_url(&self, send_key: &str) -> String {
        format!("{}/{}.send", self.server, send_key)
    }
}

#[async_trait]
impl Channel for ServerChanChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::ServerChan
    }

    fn default_destination(&self) -> Option<&str> {
        self.send_key.as_deref()
    }

    async fn send(&self, send_key: &str, message: &Message) -> Result<(), ChannelError> {
        let resp = self
            .client
            .post(self.send_url(send_key))
            .form(&[("title", message.title.as_str()), ("desp", message.body.as_str())])
            .send()
            .await
            .map_err(|e| send_error(self.kind(), e))?;
        success_body(self.kind(), resp).await?;
        tracing::debug!("✅ ServerChan message sent: {}", message.title);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_url() {
        let cfg = KeyedChannelConfig { enabled: true, key: "SCT123".into(), server: None };
        let ch = ServerChanChannel::new(reqwest::Client::new(), &cfg);
        assert_eq!(ch.send_url("SCT123"), "https://sctapi.ftqq.com/SCT123.send");

        let cfg = KeyedChannelConfig { server: Some("https://sc.example/".into()), ..cfg };
        let ch = ServerChanChannel::new(reqwest::Client::new(), &cfg);
        assert_eq!(ch.send_url("k"), "https://sc.example/k.send");
    }
}
