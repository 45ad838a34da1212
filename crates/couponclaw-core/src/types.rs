//! Domain model: users, accounts, credentials, benefits and claim outcomes.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CouponClawError;

/// Opaque external identity of a registrant (e.g. a Telegram chat id).
pub type UserId = String;

/// Role of a registered user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Member => "member",
        }
    }
}

impl FromStr for Role {
    type Err = CouponClawError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Role::Owner),
            "member" => Ok(Role::Member),
            other => Err(CouponClawError::Database(format!("unknown role '{other}'"))),
        }
    }
}

/// Notification channel kinds the dispatcher knows how to reach.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Telegram,
    Bark,
    Feishu,
    ServerChan,
    Discord,
    Webhook,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 6] = [
        ChannelKind::Telegram,
        ChannelKind::Bark,
        ChannelKind::Feishu,
        ChannelKind::ServerChan,
        ChannelKind::Discord,
        ChannelKind::Webhook,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Telegram => "telegram",
            ChannelKind::Bark => "bark",
            ChannelKind::Feishu => "feishu",
            ChannelKind::ServerChan => "serverchan",
            ChannelKind::Discord => "discord",
            ChannelKind::Webhook => "webhook",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = CouponClawError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        ChannelKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| CouponClawError::Config(format!("unknown channel '{s}'")))
    }
}

/// One entry of a user's channel capability set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelPreference {
    pub kind: ChannelKind,
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Channel-specific address (chat id, device key, webhook URL).
    /// `None` falls back to the channel's configured default.
    #[serde(default)]
    pub destination: Option<String>,
}

fn bool_true() -> bool {
    true
}

impl ChannelPreference {
    pub fn new(kind: ChannelKind, destination: Option<String>) -> Self {
        Self { kind, enabled: true, destination }
    }
}

/// A registered user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    pub role: Role,
    /// Push the daily autoclaim report.
    pub report_enabled: bool,
    /// Push recommendation, meal-time and expiry reminders.
    pub reminders_enabled: bool,
    pub channels: Vec<ChannelPreference>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_owner(&self) -> bool {
        self.role == Role::Owner
    }
}

/// Input for registering (or refreshing) a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: UserId,
    pub display_name: String,
    pub role: Role,
    /// Applied only when the user is created.
    pub channels: Vec<ChannelPreference>,
}

impl NewUser {
    pub fn member(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            role: Role::Member,
            channels: Vec::new(),
        }
    }

    pub fn owner(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self { role: Role::Owner, ..Self::member(id, display_name) }
    }

    pub fn with_channels(mut self, channels: Vec<ChannelPreference>) -> Self {
        self.channels = channels;
        self
    }
}

/// Claim state of an account.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccountState {
    Active,
    Paused,
}

impl AccountState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountState::Active => "active",
            AccountState::Paused => "paused",
        }
    }
}

impl FromStr for AccountState {
    type Err = CouponClawError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AccountState::Active),
            "paused" => Ok(AccountState::Paused),
            other => Err(CouponClawError::Database(format!("unknown account state '{other}'"))),
        }
    }
}

/// Cumulative claim statistics for one account.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AccountStats {
    /// Number of benefits successfully claimed.
    pub success_count: u64,
    /// Number of claim cycles that ended in any failure.
    pub failure_count: u64,
    pub last_claim_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Credential as persisted: plaintext, or `enc:`-prefixed ciphertext.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoredCredential(String);

impl StoredCredential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for StoredCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoredCredential({} bytes)", self.0.len())
    }
}

/// Decrypted provider token. Lives only for the duration of a provider call.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// One bound provider credential.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: String,
    pub user_id: UserId,
    pub label: String,
    pub credential: StoredCredential,
    pub state: AccountState,
    pub autoclaim: bool,
    pub stats: AccountStats,
    pub is_current: bool,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Active with autoclaim enabled.
    pub fn is_eligible(&self) -> bool {
        self.state == AccountState::Active && self.autoclaim
    }
}

/// A time-limited item claimable from the provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Benefit {
    pub id: Option<String>,
    pub name: String,
    pub expires_on: Option<NaiveDate>,
}

impl Benefit {
    pub fn named(name: impl Into<String>) -> Self {
        Self { id: None, name: name.into(), expires_on: None }
    }

    pub fn expiring(name: impl Into<String>, on: NaiveDate) -> Self {
        Self { id: None, name: name.into(), expires_on: Some(on) }
    }

    /// Whole days from `today` until expiry, if the expiry is known.
    pub fn days_left(&self, today: NaiveDate) -> Option<i64> {
        self.expires_on.map(|d| (d - today).num_days())
    }
}

/// Result kind of one claim cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcomeKind {
    Success(Vec<Benefit>),
    NoneAvailable,
    InvalidCredential,
    TransientFailure(String),
    /// The stored credential could not be decrypted with the current secret.
    CredentialUnreadable(String),
}

impl ClaimOutcomeKind {
    pub fn label(&self) -> &'static str {
        match self {
            ClaimOutcomeKind::Success(_) => "success",
            ClaimOutcomeKind::NoneAvailable => "none_available",
            ClaimOutcomeKind::InvalidCredential => "invalid_credential",
            ClaimOutcomeKind::TransientFailure(_) => "transient_failure",
            ClaimOutcomeKind::CredentialUnreadable(_) => "credential_unreadable",
        }
    }
}

/// Ephemeral result of one claim cycle for one account.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimOutcome {
    pub account_id: String,
    pub user_id: UserId,
    pub label: String,
    /// The stored credential this cycle ran with.
    pub credential: StoredCredential,
    pub at: DateTime<Utc>,
    pub kind: ClaimOutcomeKind,
}

impl ClaimOutcome {
    pub fn new(account: &Account, kind: ClaimOutcomeKind) -> Self {
        Self {
            account_id: account.id.clone(),
            user_id: account.user_id.clone(),
            label: account.label.clone(),
            credential: account.credential.clone(),
            at: Utc::now(),
            kind,
        }
    }

    pub fn claimed(&self) -> &[Benefit] {
        match &self.kind {
            ClaimOutcomeKind::Success(b) => b,
            _ => &[],
        }
    }

    pub fn is_failure(&self) -> bool {
        !matches!(self.kind, ClaimOutcomeKind::Success(_) | ClaimOutcomeKind::NoneAvailable)
    }

    /// The account can no longer be used until the user resubmits a token.
    pub fn requires_rebind(&self) -> bool {
        matches!(
            self.kind,
            ClaimOutcomeKind::InvalidCredential | ClaimOutcomeKind::CredentialUnreadable(_)
        )
    }

    /// Short text stored as the account's `last_error`.
    pub fn error_summary(&self) -> Option<String> {
        match &self.kind {
            ClaimOutcomeKind::InvalidCredential => Some("token rejected by provider".into()),
            ClaimOutcomeKind::TransientFailure(reason) => Some(format!("transient: {reason}")),
            ClaimOutcomeKind::CredentialUnreadable(reason) => {
                Some(format!("stored token unreadable: {reason}"))
            }
            _ => None,
        }
    }
}

/// What `record_claim_outcome` changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordEffect {
    /// This outcome performed the `Active -> Paused` transition.
    pub paused: bool,
}

/// Named daily checkpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerKind {
    Claim,
    Recommend,
    LunchReminder,
    DinnerReminder,
    ExpiryReminder,
}

impl TriggerKind {
    pub const ALL: [TriggerKind; 5] = [
        TriggerKind::Claim,
        TriggerKind::Recommend,
        TriggerKind::LunchReminder,
        TriggerKind::DinnerReminder,
        TriggerKind::ExpiryReminder,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Claim => "claim",
            TriggerKind::Recommend => "recommend",
            TriggerKind::LunchReminder => "lunch-reminder",
            TriggerKind::DinnerReminder => "dinner-reminder",
            TriggerKind::ExpiryReminder => "expiry-reminder",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification priority.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NotifyPriority {
    Low,
    Normal,
    High,
}

/// A short text summary pushed to a user's channels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub title: String,
    pub body: String,
    pub priority: NotifyPriority,
    /// Which trigger or workflow produced this message.
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(title: &str, body: &str, source: &str, priority: NotifyPriority) -> Self {
        Self {
            title: title.to_string(),
            body: body.to_string(),
            priority,
            source: source.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Title and body as one plain-text block.
    pub fn text(&self) -> String {
        format!("{}\n\n{}", self.title, self.body)
    }
}

/// Aggregate counters for the admin report.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct StoreSummary {
    pub users: u64,
    pub accounts: u64,
    pub eligible: u64,
    pub paused: u64,
    pub total_success: u64,
    pub total_failed: u64,
}
