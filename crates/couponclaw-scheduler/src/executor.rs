//! Claim executor: one claim cycle for one account.
//!
//! This is the only place a stored credential is decrypted. The plaintext
//! `Credential` lives for the duration of the provider calls and is dropped
//! before the outcome is returned.

use couponclaw_core::error::{ProviderError, Result};
use couponclaw_core::traits::{AccountStore, BenefitProvider};
use couponclaw_core::types::{Account, AccountState, Benefit, ClaimOutcome, ClaimOutcomeKind, RecordEffect};
use couponclaw_security::{CredentialCipher, DecryptionError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// A read-only benefit query could not be answered.
#[derive(Debug, Error)]
pub enum BenefitQueryError {
    #[error("stored token unreadable: {0}")]
    Unreadable(#[from] DecryptionError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("timed out after {0}s")]
    TimedOut(u64),
}

/// Outcome of `run_claim` once recorded in the store.
#[derive(Debug, Clone)]
pub struct ClaimRecord {
    pub outcome: ClaimOutcome,
    pub effect: RecordEffect,
}

pub struct ClaimExecutor {
    store: Arc<dyn AccountStore>,
    provider: Arc<dyn BenefitProvider>,
    cipher: Arc<CredentialCipher>,
    timeout: Duration,
}

impl ClaimExecutor {
    pub fn new(
        store: Arc<dyn AccountStore>,
        provider: Arc<dyn BenefitProvider>,
        cipher: Arc<CredentialCipher>,
        timeout: Duration,
    ) -> Self {
        Self { store, provider, cipher, timeout }
    }

    /// Run one claim cycle, bounded by the claim timeout. Never touches the store.
    pub async fn execute_claim(&self, account: &Account) -> ClaimOutcome {
        let kind = match tokio::time::timeout(self.timeout, self.claim_cycle(account)).await {
            Ok(kind) => kind,
            Err(_) => ClaimOutcomeKind::TransientFailure(format!("timed out after {}s", self.timeout.as_secs())),
        };
        ClaimOutcome::new(account, kind)
    }

    async fn claim_cycle(&self, account: &Account) -> ClaimOutcomeKind {
        let credential = match self.cipher.decrypt(&account.credential) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("🔐 Account '{}' of user {}: {e}", account.label, account.user_id);
                return ClaimOutcomeKind::CredentialUnreadable(e.to_string());
            }
        };

        // Probe first: an auth failure here spares the claim call.
        if let Err(e) = self.provider.list_claimable(&credential).await {
            return classify(e);
        }

        match self.provider.claim_all(&credential).await {
            Ok(claimed) if claimed.is_empty() => ClaimOutcomeKind::NoneAvailable,
            Ok(claimed) => ClaimOutcomeKind::Success(claimed),
            Err(e) => classify(e),
        }
    }

    /// Claim inside the account's critical section and record the outcome.
    ///
    /// The account is re-read after the lock is taken, so a rebind that landed
    /// while waiting is honoured. Returns `None` if the account was removed or
    /// is no longer Active by then.
    pub async fn run_claim(&self, account: &Account) -> Result<Option<ClaimRecord>> {
        let _guard = self.store.lock_account(&account.id).await;

        let Some(fresh) = self.store.get_account(&account.id).await? else {
            tracing::debug!("Account {} removed before its claim ran", account.id);
            return Ok(None);
        };
        if fresh.state != AccountState::Active {
            tracing::debug!("Account {} paused before its claim ran", account.id);
            return Ok(None);
        }

        let outcome = self.execute_claim(&fresh).await;
        let effect = self.store.record_claim_outcome(&outcome).await?;
        log_outcome(&outcome);
        Ok(Some(ClaimRecord { outcome, effect }))
    }

    /// Benefits the account already owns.
    pub async fn owned_benefits(&self, account: &Account) -> std::result::Result<Vec<Benefit>, BenefitQueryError> {
        let credential = self.cipher.decrypt(&account.credential)?;
        self.bounded(self.provider.list_owned(&credential)).await
    }

    /// Benefits the account could claim right now.
    pub async fn claimable_benefits(&self, account: &Account) -> std::result::Result<Vec<Benefit>, BenefitQueryError> {
        let credential = self.cipher.decrypt(&account.credential)?;
        self.bounded(self.provider.list_claimable(&credential)).await
    }

    async fn bounded<F>(&self, call: F) -> std::result::Result<Vec<Benefit>, BenefitQueryError>
    where
        F: std::future::Future<Output = std::result::Result<Vec<Benefit>, ProviderError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(BenefitQueryError::TimedOut(self.timeout.as_secs())),
        }
    }
}

fn classify(e: ProviderError) -> ClaimOutcomeKind {
    match e {
        ProviderError::Auth(_) => ClaimOutcomeKind::InvalidCredential,
        ProviderError::Network(reason) | ProviderError::Protocol(reason) => ClaimOutcomeKind::TransientFailure(reason),
    }
}

fn log_outcome(outcome: &ClaimOutcome) {
    match &outcome.kind {
        ClaimOutcomeKind::Success(claimed) => tracing::info!(
            "🎉 Account '{}' of user {}: claimed {} benefit(s)",
            outcome.label,
            outcome.user_id,
            claimed.len()
        ),
        ClaimOutcomeKind::NoneAvailable => {
            tracing::info!("🫙 Account '{}' of user {}: nothing to claim", outcome.label, outcome.user_id)
        }
        ClaimOutcomeKind::InvalidCredential => {
            tracing::warn!("🚫 Account '{}' of user {}: token rejected", outcome.label, outcome.user_id)
        }
        ClaimOutcomeKind::TransientFailure(reason) => tracing::warn!(
            "⚠️ Account '{}' of user {}: transient failure: {reason}",
            outcome.label,
            outcome.user_id
        ),
        ClaimOutcomeKind::CredentialUnreadable(_) => tracing::warn!(
            "🔐 Account '{}' of user {}: stored token unreadable",
            outcome.label,
            outcome.user_id
        ),
    }
}
