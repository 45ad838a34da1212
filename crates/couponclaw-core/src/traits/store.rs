//! Persistence traits: accounts/users and the per-trigger firing ledger.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::time::Duration;

use crate::error::Result;
use crate::types::{
    Account, ChannelPreference, ClaimOutcome, NewUser, RecordEffect, StoreSummary,
    StoredCredential, TriggerKind, User,
};

/// Held for the duration of any multi-step operation on one account.
pub type AccountGuard = tokio::sync::OwnedMutexGuard<()>;

/// Durable storage of users and their accounts.
///
/// Backends must provide atomic per-account read-modify-write and a
/// consistent snapshot for `list_eligible_for_autoclaim`.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Create the user, or refresh its display name if it exists.
    async fn upsert_user(&self, user: &NewUser) -> Result<User>;
    async fn get_user(&self, id: &str) -> Result<Option<User>>;
    async fn list_users(&self) -> Result<Vec<User>>;
    async fn set_preferences(&self, id: &str, report_enabled: bool, reminders_enabled: bool) -> Result<()>;
    async fn set_channels(&self, id: &str, channels: &[ChannelPreference]) -> Result<()>;

    /// Bind a credential under `label`, creating the account or rebinding it.
    /// Rebinding reactivates the account. The bound account becomes current.
    async fn bind_credential(&self, user_id: &str, label: &str, credential: StoredCredential) -> Result<Account>;
    async fn get_account(&self, id: &str) -> Result<Option<Account>>;
    async fn list_accounts(&self, user_id: &str) -> Result<Vec<Account>>;
    async fn current_account(&self, user_id: &str) -> Result<Option<Account>>;
    async fn set_current(&self, user_id: &str, label: &str) -> Result<Account>;
    /// Enabling autoclaim also reactivates a paused account.
    async fn set_autoclaim(&self, account_id: &str, enabled: bool) -> Result<()>;
    async fn delete_account(&self, account_id: &str) -> Result<()>;
    /// Remove every account of the user; returns how many were removed.
    async fn clear_credentials(&self, user_id: &str) -> Result<usize>;
    async fn reset_stats(&self, account_id: &str) -> Result<()>;

    /// Point-in-time snapshot of Active accounts with autoclaim enabled.
    async fn list_eligible_for_autoclaim(&self) -> Result<Vec<Account>>;
    /// Fold an outcome into stats; pause the account on credential failures.
    async fn record_claim_outcome(&self, outcome: &ClaimOutcome) -> Result<RecordEffect>;
    async fn summary(&self) -> Result<StoreSummary>;

    /// Enter the account's critical section.
    async fn lock_account(&self, account_id: &str) -> AccountGuard;
}

/// Store-wide lease keeping whole-store claim sweeps from overlapping, also
/// between processes sharing one store.
///
/// Calls are short and synchronous so a holder can release on drop.
pub trait SweepLease: Send + Sync {
    /// Take or extend the lease for `holder` until `ttl` from now. Returns
    /// `false` while another holder's lease is unexpired.
    fn try_acquire_lease(&self, holder: &str, ttl: Duration) -> Result<bool>;

    /// Give the lease up if `holder` still has it.
    fn release_lease(&self, holder: &str) -> Result<()>;
}

/// Remembers the last local date each trigger fired on.
#[async_trait]
pub trait FireLedger: Send + Sync {
    async fn last_fired(&self, trigger: TriggerKind) -> Result<Option<NaiveDate>>;

    /// Record that `trigger` fired on `date`. Returns `true` only for the
    /// first caller on that date.
    async fn mark_fired(&self, trigger: TriggerKind, date: NaiveDate) -> Result<bool>;
}
