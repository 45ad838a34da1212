//! CouponClaw configuration system.

use chrono::{FixedOffset, NaiveTime};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CouponClawError, Result};
use crate::types::TriggerKind;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouponClawConfig {
    /// Credential-encryption secret. Empty means tokens are stored as plaintext.
    #[serde(default)]
    pub secret: String,
    /// Identity of the owning principal (allowed to run admin sweeps).
    #[serde(default)]
    pub owner_id: String,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub claim: ClaimConfig,
    #[serde(default)]
    pub reminders: ReminderConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
}

fn default_db_path() -> String { "~/.couponclaw/couponclaw.db".into() }

impl Default for CouponClawConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            owner_id: String::new(),
            db_path: default_db_path(),
            schedule: ScheduleConfig::default(),
            claim: ClaimConfig::default(),
            reminders: ReminderConfig::default(),
            provider: ProviderConfig::default(),
            channels: ChannelsConfig::default(),
        }
    }
}

impl CouponClawConfig {
    /// Load config from the default path (~/.couponclaw/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CouponClawError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| CouponClawError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the given path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| CouponClawError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the CouponClaw home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".couponclaw")
    }

    /// Apply secrets and destinations from the process environment.
    /// Environment values win over the file.
    pub fn apply_env(&mut self) {
        fn env(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.trim().is_empty())
        }

        if let Some(v) = env("COUPONCLAW_SECRET") {
            self.secret = v;
        }
        if let Some(v) = env("COUPONCLAW_OWNER") {
            self.owner_id = v;
        }
        if let Some(v) = env("COUPONCLAW_DB") {
            self.db_path = v;
        }
        if let Some(v) = env("TG_BOT_TOKEN") {
            let tg = self.channels.telegram.get_or_insert_with(TelegramChannelConfig::default);
            tg.bot_token = v;
            tg.enabled = true;
        }
        if let Some(v) = env("TG_CHAT_ID") {
            let tg = self.channels.telegram.get_or_insert_with(TelegramChannelConfig::default);
            tg.default_chat_id = v;
        }
        if let Some(v) = env("BARK_KEY") {
            self.channels.bark = Some(KeyedChannelConfig { enabled: true, key: v, server: None });
        }
        if let Some(v) = env("FEISHU_WEBHOOK") {
            self.channels.feishu = Some(WebhookChannelConfig { enabled: true, url: v });
        }
        if let Some(v) = env("SERVERCHAN_SENDKEY") {
            self.channels.serverchan = Some(KeyedChannelConfig { enabled: true, key: v, server: None });
        }
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.schedule.offset()?;
        for kind in TriggerKind::ALL {
            self.schedule.trigger(kind).time()?;
        }
        if self.claim.concurrency == 0 {
            return Err(CouponClawError::Config("claim.concurrency must be at least 1".into()));
        }
        if self.claim.timeout_secs == 0 {
            return Err(CouponClawError::Config("claim.timeout_secs must be at least 1".into()));
        }
        if self.schedule.tick_secs == 0 || self.schedule.tick_secs > 60 {
            return Err(CouponClawError::Config("schedule.tick_secs must be within 1..=60".into()));
        }
        Ok(())
    }

    /// The configured secret, if any.
    pub fn secret(&self) -> Option<&str> {
        Some(self.secret.as_str()).filter(|s| !s.is_empty())
    }
}

/// Daily timeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// UTC offset all trigger times are interpreted in, e.g. "+08:00".
    ///
    /// A fixed offset, not a named zone: in a zone with daylight saving the
    /// triggers drift by the DST shift until this is edited.
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,
    /// How often the timeline is checked.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Reminder triggers found overdue by more than this are skipped for the day.
    #[serde(default = "default_late_grace_mins")]
    pub late_grace_mins: u32,
    #[serde(default)]
    pub triggers: TriggersConfig,
}

fn default_utc_offset() -> String { "+08:00".into() }
fn default_tick_secs() -> u64 { 30 }
fn default_late_grace_mins() -> u32 { 15 }

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            utc_offset: default_utc_offset(),
            tick_secs: default_tick_secs(),
            late_grace_mins: default_late_grace_mins(),
            triggers: TriggersConfig::default(),
        }
    }
}

impl ScheduleConfig {
    /// Parse `utc_offset` ("+08:00", "-05:30", "Z").
    pub fn offset(&self) -> Result<FixedOffset> {
        parse_utc_offset(&self.utc_offset)
    }

    pub fn trigger(&self, kind: TriggerKind) -> &TriggerConfig {
        match kind {
            TriggerKind::Claim => &self.triggers.claim,
            TriggerKind::Recommend => &self.triggers.recommend,
            TriggerKind::LunchReminder => &self.triggers.lunch_reminder,
            TriggerKind::DinnerReminder => &self.triggers.dinner_reminder,
            TriggerKind::ExpiryReminder => &self.triggers.expiry_reminder,
        }
    }
}

fn parse_utc_offset(raw: &str) -> Result<FixedOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(|| CouponClawError::Config("bad offset".into()));
    }
    let invalid = || CouponClawError::Config(format!("Invalid utc_offset '{raw}' (expected +HH:MM)"));
    let (sign, rest) = match raw.as_bytes().first() {
        Some(b'+') => (1, &raw[1..]),
        Some(b'-') => (-1, &raw[1..]),
        _ => return Err(invalid()),
    };
    let (h, m) = rest.split_once(':').unwrap_or((rest, "0"));
    let hours: i32 = h.parse().map_err(|_| invalid())?;
    let minutes: i32 = m.parse().map_err(|_| invalid())?;
    if hours > 14 || minutes > 59 {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

/// The five daily checkpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TriggersConfig {
    #[serde(default = "default_claim_trigger")]
    pub claim: TriggerConfig,
    #[serde(default = "default_recommend_trigger")]
    pub recommend: TriggerConfig,
    #[serde(default = "default_lunch_trigger")]
    pub lunch_reminder: TriggerConfig,
    #[serde(default = "default_dinner_trigger")]
    pub dinner_reminder: TriggerConfig,
    #[serde(default = "default_expiry_trigger")]
    pub expiry_reminder: TriggerConfig,
}

fn default_claim_trigger() -> TriggerConfig { TriggerConfig::at("10:30") }
fn default_recommend_trigger() -> TriggerConfig { TriggerConfig::at("09:00") }
fn default_lunch_trigger() -> TriggerConfig { TriggerConfig::at("11:00") }
fn default_dinner_trigger() -> TriggerConfig { TriggerConfig::at("17:00") }
fn default_expiry_trigger() -> TriggerConfig { TriggerConfig::at("20:00") }

impl Default for TriggersConfig {
    fn default() -> Self {
        Self {
            claim: default_claim_trigger(),
            recommend: default_recommend_trigger(),
            lunch_reminder: default_lunch_trigger(),
            dinner_reminder: default_dinner_trigger(),
            expiry_reminder: default_expiry_trigger(),
        }
    }
}

/// One daily checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Local time of day, "HH:MM".
    pub at: String,
}

fn bool_true() -> bool { true }

impl TriggerConfig {
    pub fn at(at: &str) -> Self {
        Self { enabled: true, at: at.into() }
    }

    pub fn time(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(self.at.trim(), "%H:%M")
            .map_err(|e| CouponClawError::Config(format!("Invalid trigger time '{}': {e}", self.at)))
    }
}

/// Claim execution limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimConfig {
    /// Maximum simultaneous claim executions.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Upper bound for one account's whole claim cycle.
    #[serde(default = "default_claim_timeout")]
    pub timeout_secs: u64,
    /// Push transient failures to end users, not just the owner summary.
    #[serde(default)]
    pub notify_transient: bool,
}

fn default_concurrency() -> usize { 5 }
fn default_claim_timeout() -> u64 { 60 }

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            timeout_secs: default_claim_timeout(),
            notify_transient: false,
        }
    }
}

/// Reminder content tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderConfig {
    /// Owned benefits expiring within this many days are reported.
    #[serde(default = "default_expiry_days")]
    pub expiry_days: i64,
    /// How many recommendations to include.
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

fn default_expiry_days() -> i64 { 3 }
fn default_top_n() -> usize { 5 }

impl Default for ReminderConfig {
    fn default() -> Self {
        Self { expiry_days: default_expiry_days(), top_n: default_top_n() }
    }
}

/// Upstream provider endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    /// Per HTTP request.
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

fn default_endpoint() -> String { "https://mcp.mcd.cn/mcp-servers/mcd-mcp".into() }
fn default_protocol_version() -> String { "2025-06-18".into() }
fn default_provider_timeout() -> u64 { 30 }

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            protocol_version: default_protocol_version(),
            timeout_secs: default_provider_timeout(),
        }
    }
}

/// Notification channel credentials. Each channel is enabled independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub telegram: Option<TelegramChannelConfig>,
    #[serde(default)]
    pub bark: Option<KeyedChannelConfig>,
    #[serde(default)]
    pub feishu: Option<WebhookChannelConfig>,
    #[serde(default)]
    pub serverchan: Option<KeyedChannelConfig>,
    #[serde(default)]
    pub discord: Option<WebhookChannelConfig>,
    #[serde(default)]
    pub webhook: Option<WebhookChannelConfig>,
    /// Per-send timeout.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
}

fn default_send_timeout() -> u64 { 10 }

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            telegram: None,
            bark: None,
            feishu: None,
            serverchan: None,
            discord: None,
            webhook: None,
            send_timeout_secs: default_send_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelegramChannelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub bot_token: String,
    /// Used when a user has no chat id of their own (usually the owner).
    #[serde(default)]
    pub default_chat_id: String,
}

/// Channels addressed by a device or send key (Bark, ServerChan).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyedChannelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub key: String,
    /// Self-hosted server base URL; `None` uses the public service.
    #[serde(default)]
    pub server: Option<String>,
}

/// Channels addressed by a webhook URL (Feishu, Discord, generic).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WebhookChannelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
}
