//! Notification dispatch: fans one message out to every channel a user can be
//! reached on. Each send is isolated: a failing channel is logged and counted,
//! never raised, and never blocks the others.

use couponclaw_core::config::ChannelsConfig;
use couponclaw_core::error::ChannelError;
use couponclaw_core::traits::Channel;
use couponclaw_core::types::{ChannelKind, Message, User};
use std::sync::Arc;
use std::time::Duration;

use crate::bark::BarkChannel;
use crate::discord::DiscordChannel;
use crate::feishu::FeishuChannel;
use crate::serverchan::ServerChanChannel;
use crate::telegram::TelegramChannel;
use crate::webhook::WebhookChannel;

/// What happened to one dispatched message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub delivered: Vec<ChannelKind>,
    pub failed: Vec<(ChannelKind, ChannelError)>,
    /// Preferences naming a channel this deployment has not configured.
    pub skipped: Vec<ChannelKind>,
}

impl DispatchReport {
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }

    /// Some channels delivered, some failed.
    pub fn is_partial(&self) -> bool {
        !self.delivered.is_empty() && !self.failed.is_empty()
    }
}

/// Routes messages to the configured channels.
pub struct Dispatcher {
    channels: Vec<Arc<dyn Channel>>,
    send_timeout: Duration,
}

enum Target {
    Send(Arc<dyn Channel>, String),
    Missing(ChannelKind),
}

impl Dispatcher {
    pub fn new(send_timeout: Duration) -> Self {
        Self { channels: Vec::new(), send_timeout }
    }

    /// Register a channel. A later channel of the same kind replaces the earlier one.
    pub fn with_channel(mut self, channel: Arc<dyn Channel>) -> Self {
        self.channels.retain(|c| c.kind() != channel.kind());
        self.channels.push(channel);
        self
    }

    /// Build every enabled channel from config, sharing one HTTP client.
    pub fn from_config(config: &ChannelsConfig) -> Self {
        let send_timeout = Duration::from_secs(config.send_timeout_secs.max(1));
        let client = reqwest::Client::builder()
            .timeout(send_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("⚠️ Falling back to default HTTP client: {e}");
                reqwest::Client::new()
            });

        let mut dispatcher = Self::new(send_timeout);
        if let Some(tg) = config.telegram.as_ref().filter(|c| c.enabled && !c.bot_token.is_empty()) {
            dispatcher = dispatcher.with_channel(Arc::new(TelegramChannel::new(client.clone(), tg)));
        }
        if let Some(bark) = config.bark.as_ref().filter(|c| c.enabled) {
            dispatcher = dispatcher.with_channel(Arc::new(BarkChannel::new(client.clone(), bark)));
        }
        if let Some(feishu) = config.feishu.as_ref().filter(|c| c.enabled) {
            dispatcher = dispatcher.with_channel(Arc::new(FeishuChannel::new(client.clone(), feishu)));
        }
        if let Some(sc) = config.serverchan.as_ref().filter(|c| c.enabled) {
            dispatcher = dispatcher.with_channel(Arc::new(ServerChanChannel::new(client.clone(), sc)));
        }
        if let Some(discord) = config.discord.as_ref().filter(|c| c.enabled) {
            dispatcher = dispatcher.with_channel(Arc::new(DiscordChannel::new(client.clone(), discord)));
        }
        if let Some(hook) = config.webhook.as_ref().filter(|c| c.enabled) {
            dispatcher = dispatcher.with_channel(Arc::new(WebhookChannel::new(client.clone(), hook)));
        }

        tracing::info!(
            "📣 Notification channels: [{}]",
            dispatcher.channel_kinds().iter().map(|k| k.as_str()).collect::<Vec<_>>().join(", ")
        );
        dispatcher
    }

    pub fn channel_kinds(&self) -> Vec<ChannelKind> {
        self.channels.iter().map(|c| c.kind()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    fn channel(&self, kind: ChannelKind) -> Option<&Arc<dyn Channel>> {
        self.channels.iter().find(|c| c.kind() == kind)
    }

    /// Resolve the user's capability set into concrete sends.
    ///
    /// A user without any preferences falls back to the global configuration:
    /// the owner gets every channel's default destination, and anyone is
    /// reached by user id on channels that address users that way.
    fn targets(&self, user: &User) -> (Vec<Target>, Vec<ChannelKind>) {
        let mut targets = Vec::new();
        let mut skipped = Vec::new();

        if user.channels.is_empty() {
            for ch in &self.channels {
                let dest = user
                    .is_owner()
                    .then(|| ch.default_destination())
                    .flatten()
                    .or_else(|| ch.addresses_by_user_id().then_some(user.id.as_str()));
                if let Some(dest) = dest {
                    targets.push(Target::Send(ch.clone(), dest.to_string()));
                }
            }
            return (targets, skipped);
        }

        for pref in user.channels.iter().filter(|p| p.enabled) {
            let Some(ch) = self.channel(pref.kind) else {
                skipped.push(pref.kind);
                continue;
            };
            let dest = pref
                .destination
                .as_deref()
                .filter(|d| !d.is_empty())
                .or_else(|| ch.default_destination());
            match dest {
                Some(dest) => targets.push(Target::Send(ch.clone(), dest.to_string())),
                None => targets.push(Target::Missing(pref.kind)),
            }
        }
        (targets, skipped)
    }

    /// Deliver `message` to every channel of `user`, concurrently.
    pub async fn dispatch(&self, user: &User, message: &Message) -> DispatchReport {
        let (targets, skipped) = self.targets(user);
        let mut report = DispatchReport { skipped, ..Default::default() };

        if targets.is_empty() {
            tracing::debug!("🔕 No reachable channel for user {}", user.id);
            return report;
        }

        let secs = self.send_timeout.as_secs();
        let sends = targets.into_iter().map(|target| async move {
            match target {
                Target::Missing(kind) => (kind, Err(ChannelError::NoDestination { channel: kind.to_string() })),
                Target::Send(ch, dest) => {
                    let kind = ch.kind();
                    let result = match tokio::time::timeout(self.send_timeout, ch.send(&dest, message)).await {
                        Ok(result) => result,
                        Err(_) => Err(ChannelError::Timeout { channel: kind.to_string(), secs }),
                    };
                    (kind, result)
                }
            }
        });

        for (kind, result) in futures::future::join_all(sends).await {
            match result {
                Ok(()) => report.delivered.push(kind),
                Err(e) => {
                    tracing::warn!("📭 Notification to user {} via {kind} failed: {e}", user.id);
                    report.failed.push((kind, e));
                }
            }
        }

        if report.is_partial() {
            tracing::info!(
                "📨 '{}' → user {}: {} delivered, {} failed",
                message.title,
                user.id,
                report.delivered.len(),
                report.failed.len()
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use couponclaw_core::types::{ChannelPreference, NotifyPriority, Role};
    use std::sync::Mutex;

    struct RecordingChannel {
        kind: ChannelKind,
        fail: bool,
        hang: bool,
        sent: Mutex<Vec<String>>,
    }

    impl RecordingChannel {
        fn new(kind: ChannelKind) -> Arc<Self> {
            Arc::new(Self { kind, fail: false, hang: false, sent: Mutex::new(Vec::new()) })
        }

        fn failing(kind: ChannelKind) -> Arc<Self> {
            Arc::new(Self { kind, fail: true, hang: false, sent: Mutex::new(Vec::new()) })
        }

        fn hanging(kind: ChannelKind) -> Arc<Self> {
            Arc::new(Self { kind, fail: false, hang: true, sent: Mutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        fn kind(&self) -> ChannelKind {
            self.kind
        }

        fn default_destination(&self) -> Option<&str> {
            Some("default")
        }

        fn addresses_by_user_id(&self) -> bool {
            self.kind == ChannelKind::Telegram
        }

        async fn send(&self, destination: &str, _message: &Message) -> Result<(), ChannelError> {
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.fail {
                return Err(ChannelError::Delivery { channel: self.kind.to_string(), reason: "boom".into() });
            }
            self.sent.lock().unwrap().push(destination.to_string());
            Ok(())
        }
    }

    fn user(role: Role, channels: Vec<ChannelPreference>) -> User {
        User {
            id: "u1".into(),
            display_name: "alice".into(),
            role,
            report_enabled: true,
            reminders_enabled: true,
            channels,
            created_at: Utc::now(),
        }
    }

    fn message() -> Message {
        Message::new("title", "body", "test", NotifyPriority::Normal)
    }

    #[tokio::test]
    async fn test_one_failing_channel_is_isolated() {
        let tg = RecordingChannel::new(ChannelKind::Telegram);
        let bark = RecordingChannel::failing(ChannelKind::Bark);
        let feishu = RecordingChannel::new(ChannelKind::Feishu);
        let dispatcher = Dispatcher::new(Duration::from_secs(1))
            .with_channel(tg.clone())
            .with_channel(bark)
            .with_channel(feishu.clone());

        let u = user(
            Role::Member,
            vec![
                ChannelPreference::new(ChannelKind::Telegram, Some("chat-1".into())),
                ChannelPreference::new(ChannelKind::Bark, None),
                ChannelPreference::new(ChannelKind::Feishu, None),
            ],
        );
        let report = dispatcher.dispatch(&u, &message()).await;

        assert!(report.is_partial());
        assert_eq!(report.delivered.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, ChannelKind::Bark);
        assert_eq!(tg.sent.lock().unwrap().as_slice(), ["chat-1"]);
        assert_eq!(feishu.sent.lock().unwrap().as_slice(), ["default"]);
    }

    #[tokio::test]
    async fn test_hanging_channel_times_out() {
        let slow = RecordingChannel::hanging(ChannelKind::Webhook);
        let fast = RecordingChannel::new(ChannelKind::Discord);
        let dispatcher = Dispatcher::new(Duration::from_millis(50)).with_channel(slow).with_channel(fast);
        let u = user(
            Role::Member,
            vec![
                ChannelPreference::new(ChannelKind::Webhook, None),
                ChannelPreference::new(ChannelKind::Discord, None),
            ],
        );
        let report = dispatcher.dispatch(&u, &message()).await;
        assert_eq!(report.delivered, vec![ChannelKind::Discord]);
        assert!(matches!(report.failed[0].1, ChannelError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_unconfigured_and_disabled_preferences() {
        let tg = RecordingChannel::new(ChannelKind::Telegram);
        let dispatcher = Dispatcher::new(Duration::from_secs(1)).with_channel(tg.clone());
        let mut disabled = ChannelPreference::new(ChannelKind::Telegram, Some("x".into()));
        disabled.enabled = false;
        let u = user(Role::Member, vec![disabled, ChannelPreference::new(ChannelKind::ServerChan, None)]);

        let report = dispatcher.dispatch(&u, &message()).await;
        assert_eq!(report.attempted(), 0);
        assert_eq!(report.skipped, vec![ChannelKind::ServerChan]);
        assert!(tg.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_users_without_preferences_fall_back() {
        let tg = RecordingChannel::new(ChannelKind::Telegram);
        let bark = RecordingChannel::new(ChannelKind::Bark);
        let dispatcher = Dispatcher::new(Duration::from_secs(1)).with_channel(tg.clone()).with_channel(bark.clone());

        let owner = dispatcher.dispatch(&user(Role::Owner, vec![]), &message()).await;
        assert_eq!(owner.delivered.len(), 2);
        assert_eq!(bark.sent.lock().unwrap().as_slice(), ["default"]);

        // Members are only reachable where the user id is an address.
        tg.sent.lock().unwrap().clear();
        let member = dispatcher.dispatch(&user(Role::Member, vec![]), &message()).await;
        assert_eq!(member.delivered, vec![ChannelKind::Telegram]);
        assert_eq!(tg.sent.lock().unwrap().as_slice(), ["u1"]);
        assert_eq!(bark.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_from_config_builds_enabled_channels() {
        use couponclaw_core::config::{KeyedChannelConfig, WebhookChannelConfig};
        let mut config = ChannelsConfig::default();
        config.bark = Some(KeyedChannelConfig { enabled: true, key: "k".into(), server: None });
        config.feishu = Some(WebhookChannelConfig { enabled: false, url: "https://x".into() });
        let dispatcher = Dispatcher::from_config(&config);
        assert_eq!(dispatcher.channel_kinds(), vec![ChannelKind::Bark]);
        assert!(!Dispatcher::new(Duration::from_secs(1)).channel_kinds().contains(&ChannelKind::Bark));
    }
}
