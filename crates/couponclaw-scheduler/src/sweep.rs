//! Claim sweeps: the scheduled daily run and the owner's on-demand run.
//!
//! Both go through [`ClaimSweep::run_claim_sweep`] under one [`SweepGuard`],
//! so a scheduled sweep and an admin sweep never overlap, even when they run
//! in different processes on the same store.

use couponclaw_channels::Dispatcher;
use couponclaw_core::error::CouponClawError;
use couponclaw_core::traits::{AccountStore, SweepLease};
use couponclaw_core::types::{Account, ClaimOutcome, ClaimOutcomeKind, RecordEffect, User};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;

use crate::executor::{ClaimExecutor, ClaimRecord};
use crate::messages;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("a claim sweep is already running")]
    Busy,
    #[error(transparent)]
    Store(#[from] CouponClawError),
}

/// Lease lifetime. A holder renews it every third of this; a crashed
/// holder's lease lapses after it.
const LEASE_TTL: Duration = Duration::from_secs(120);
const LEASE_POLL: Duration = Duration::from_millis(250);

/// Mutual exclusion between whole-store sweeps.
///
/// An in-process mutex orders local callers; the store lease excludes other
/// processes.
#[derive(Clone)]
pub struct SweepGuard {
    local: Arc<Mutex<()>>,
    lease: Arc<dyn SweepLease>,
}

/// Held for the duration of one sweep. Dropping it releases the lease.
pub struct SweepPermit {
    lease: Arc<dyn SweepLease>,
    holder: String,
    renew: JoinHandle<()>,
    _local: OwnedMutexGuard<()>,
}

impl SweepGuard {
    pub fn new(lease: Arc<dyn SweepLease>) -> Self {
        Self { local: Arc::new(Mutex::new(())), lease }
    }

    /// Wait until no other sweep holds the guard, here or in another process.
    pub async fn acquire(&self) -> Result<SweepPermit, CouponClawError> {
        let local = self.local.clone().lock_owned().await;
        let holder = new_holder();
        let mut waiting = false;
        while !self.lease.try_acquire_lease(&holder, LEASE_TTL)? {
            if !waiting {
                tracing::info!("⏳ Another process is sweeping, waiting for its lease");
                waiting = true;
            }
            tokio::time::sleep(LEASE_POLL).await;
        }
        Ok(self.permit(holder, local))
    }

    /// `None` if a sweep holds the guard.
    pub fn try_acquire(&self) -> Result<Option<SweepPermit>, CouponClawError> {
        let Ok(local) = self.local.clone().try_lock_owned() else {
            return Ok(None);
        };
        let holder = new_holder();
        if !self.lease.try_acquire_lease(&holder, LEASE_TTL)? {
            return Ok(None);
        }
        Ok(Some(self.permit(holder, local)))
    }

    fn permit(&self, holder: String, local: OwnedMutexGuard<()>) -> SweepPermit {
        let lease = self.lease.clone();
        let renewing = holder.clone();
        let renew = tokio::spawn(async move {
            let mut interval = tokio::time::interval(LEASE_TTL / 3);
            interval.tick().await;
            loop {
                interval.tick().await;
                match lease.try_acquire_lease(&renewing, LEASE_TTL) {
                    Ok(true) => {}
                    Ok(false) => tracing::warn!("⚠️ Sweep lease {renewing} was taken over"),
                    Err(e) => tracing::warn!("⚠️ Sweep lease renewal failed: {e}"),
                }
            }
        });
        SweepPermit { lease: self.lease.clone(), holder, renew, _local: local }
    }
}

impl Drop for SweepPermit {
    fn drop(&mut self) {
        self.renew.abort();
        if let Err(e) = self.lease.release_lease(&self.holder) {
            tracing::warn!("⚠️ Releasing sweep lease failed, it lapses on its own: {e}");
        }
    }
}

fn new_holder() -> String {
    format!("{}-{}", std::process::id(), uuid::Uuid::new_v4())
}

/// Counters for one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub total: usize,
    pub succeeded: usize,
    pub benefits_claimed: usize,
    pub none_available: usize,
    pub invalid: usize,
    pub transient: usize,
    pub unreadable: usize,
    /// Accounts this sweep moved from Active to Paused.
    pub paused: usize,
    pub channel_failures: usize,
}

impl SweepSummary {
    fn count(&mut self, record: &ClaimRecord) {
        match &record.outcome.kind {
            ClaimOutcomeKind::Success(claimed) => {
                self.succeeded += 1;
                self.benefits_claimed += claimed.len();
            }
            ClaimOutcomeKind::NoneAvailable => self.none_available += 1,
            ClaimOutcomeKind::InvalidCredential => self.invalid += 1,
            ClaimOutcomeKind::TransientFailure(_) => self.transient += 1,
            ClaimOutcomeKind::CredentialUnreadable(_) => self.unreadable += 1,
        }
        if record.effect.paused {
            self.paused += 1;
        }
    }
}

pub struct ClaimSweep {
    executor: Arc<ClaimExecutor>,
    store: Arc<dyn AccountStore>,
    dispatcher: Arc<Dispatcher>,
    guard: SweepGuard,
    concurrency: usize,
    notify_transient: bool,
    owner_id: String,
}

impl ClaimSweep {
    pub fn new(
        executor: Arc<ClaimExecutor>,
        store: Arc<dyn AccountStore>,
        dispatcher: Arc<Dispatcher>,
        guard: SweepGuard,
        concurrency: usize,
        notify_transient: bool,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            store,
            dispatcher,
            guard,
            concurrency: concurrency.max(1),
            notify_transient,
            owner_id: owner_id.into(),
        }
    }

    pub fn guard(&self) -> &SweepGuard {
        &self.guard
    }

    /// Daily claim trigger. Waits for a running admin sweep to finish first.
    pub async fn run_scheduled(&self) -> Result<SweepSummary, SweepError> {
        let _permit = self.guard.acquire().await?;
        let summary = self.run_claim_sweep("scheduled").await?;
        if let Some(owner) = self.store.get_user(&self.owner_id).await? {
            self.send_summary(&owner, &summary, "scheduled").await;
        } else if !self.owner_id.is_empty() {
            tracing::warn!("⚠️ Owner {} not registered, summary not sent", self.owner_id);
        }
        Ok(summary)
    }

    /// Claim for every eligible account. The caller holds the guard.
    pub(crate) async fn run_claim_sweep(&self, source: &str) -> Result<SweepSummary, SweepError> {
        let accounts = self.store.list_eligible_for_autoclaim().await?;
        tracing::info!("🎟️ Claim sweep ({source}): {} eligible account(s)", accounts.len());

        let mut summary = SweepSummary { total: accounts.len(), ..Default::default() };
        let results: Vec<(Account, Option<ClaimRecord>)> = futures::stream::iter(accounts)
            .map(|account| async move {
                let record = match self.executor.run_claim(&account).await {
                    Ok(record) => record,
                    Err(e) => {
                        tracing::error!("❌ Recording claim for account {} failed: {e}", account.id);
                        store_failure_record(&account, e)
                    }
                };
                (account, record)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut per_user: BTreeMap<String, Vec<ClaimRecord>> = BTreeMap::new();
        for (account, record) in results {
            match record {
                Some(record) => {
                    summary.count(&record);
                    per_user.entry(account.user_id).or_default().push(record);
                }
                // Removed or paused between the snapshot and its turn.
                None => summary.total -= 1,
            }
        }

        for (user_id, records) in per_user {
            let user = match self.store.get_user(&user_id).await {
                Ok(Some(u)) => u,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("⚠️ Cannot load user {user_id} for claim report: {e}");
                    continue;
                }
            };
            let Some(message) = messages::claim_report(&user, &records, self.notify_transient) else {
                continue;
            };
            let report = self.dispatcher.dispatch(&user, &message).await;
            summary.channel_failures += report.failed.len();
        }

        tracing::info!(
            "📊 Claim sweep ({source}) done: {}/{} succeeded, {} benefit(s), {} paused",
            summary.succeeded,
            summary.total,
            summary.benefits_claimed,
            summary.paused
        );
        Ok(summary)
    }

    async fn send_summary(&self, owner: &User, summary: &SweepSummary, source: &str) {
        let totals = match self.store.summary().await {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!("⚠️ Store summary unavailable: {e}");
                Default::default()
            }
        };
        let message = messages::sweep_summary(summary, &totals, source);
        self.dispatcher.dispatch(owner, &message).await;
    }
}

/// A store failure while recording is reported like a transient failure;
/// nothing was persisted, so the account is retried on the next run.
fn store_failure_record(account: &Account, e: CouponClawError) -> Option<ClaimRecord> {
    Some(ClaimRecord {
        outcome: ClaimOutcome::new(account, ClaimOutcomeKind::TransientFailure(format!("store error: {e}"))),
        effect: RecordEffect::default(),
    })
}

/// Owner-triggered sweep over all eligible accounts.
pub struct AdminSweep {
    sweep: Arc<ClaimSweep>,
}

impl AdminSweep {
    pub fn new(sweep: Arc<ClaimSweep>) -> Self {
        Self { sweep }
    }

    /// Run a full claim sweep now. Fails fast with `Busy` instead of queueing
    /// behind a running sweep.
    pub async fn run_full_sweep(&self, requester: &User) -> Result<SweepSummary, SweepError> {
        if !requester.is_owner() {
            tracing::warn!("🚫 User {} attempted an admin sweep", requester.id);
            return Err(SweepError::Forbidden(format!("user {} is not the owner", requester.id)));
        }
        let Some(_permit) = self.sweep.guard().try_acquire()? else {
            return Err(SweepError::Busy);
        };
        tracing::info!("🛠️ Admin sweep requested by {}", requester.id);
        let summary = self.sweep.run_claim_sweep("admin").await?;
        self.sweep.send_summary(requester, &summary, "admin").await;
        Ok(summary)
    }
}
