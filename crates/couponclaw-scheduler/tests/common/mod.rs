#![allow(dead_code)]

use async_trait::async_trait;
use couponclaw_channels::Dispatcher;
use couponclaw_core::config::ReminderConfig;
use couponclaw_core::error::{ChannelError, ProviderError};
use couponclaw_core::traits::{AccountStore, BenefitProvider, Channel};
use couponclaw_core::types::{Account, Benefit, ChannelKind, ChannelPreference, Credential, Message, NewUser, User};
use couponclaw_db::SqliteStore;
use couponclaw_scheduler::{ClaimExecutor, ClaimSweep, ReminderRunner, SweepGuard};
use couponclaw_security::CredentialCipher;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SECRET: &str = "test-secret";

/// How the fake provider answers for one token.
#[derive(Clone)]
pub enum Behavior {
    Claims(Vec<Benefit>),
    Rejects,
    Unreachable,
    Owns(Vec<Benefit>),
}

#[derive(Default)]
pub struct FakeProvider {
    behaviors: Mutex<HashMap<String, Behavior>>,
    pub claim_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    /// Added to every call, to widen race windows.
    pub delay: Mutex<Duration>,
}

impl FakeProvider {
    pub fn with(self, token: &str, behavior: Behavior) -> Self {
        self.set(token, behavior);
        self
    }

    pub fn set(&self, token: &str, behavior: Behavior) {
        self.behaviors.lock().unwrap().insert(token.to_string(), behavior);
    }

    pub fn claims(&self) -> usize {
        self.claim_calls.load(Ordering::SeqCst)
    }

    async fn answer(&self, credential: &Credential, claiming: bool) -> Result<Vec<Benefit>, ProviderError> {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let behavior = self.behaviors.lock().unwrap().get(credential.expose()).cloned();
        match behavior {
            Some(Behavior::Claims(benefits)) => Ok(benefits),
            Some(Behavior::Owns(benefits)) => Ok(if claiming { vec![] } else { benefits }),
            Some(Behavior::Unreachable) => Err(ProviderError::Network("HTTP 503".into())),
            Some(Behavior::Rejects) | None => Err(ProviderError::Auth("token invalid".into())),
        }
    }
}

#[async_trait]
impl BenefitProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    async fn list_claimable(&self, credential: &Credential) -> Result<Vec<Benefit>, ProviderError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.answer(credential, false).await
    }

    async fn claim_all(&self, credential: &Credential) -> Result<Vec<Benefit>, ProviderError> {
        self.claim_calls.fetch_add(1, Ordering::SeqCst);
        self.answer(credential, true).await
    }

    async fn list_owned(&self, credential: &Credential) -> Result<Vec<Benefit>, ProviderError> {
        self.answer(credential, false).await
    }
}

/// Channel that records every message it is asked to send.
pub struct RecordingChannel {
    kind: ChannelKind,
    fail: bool,
    pub sent: Mutex<Vec<(String, Message)>>,
}

impl RecordingChannel {
    pub fn new(kind: ChannelKind) -> Self {
        Self { kind, fail: false, sent: Mutex::new(Vec::new()) }
    }

    pub fn failing(kind: ChannelKind) -> Self {
        Self { fail: true, ..Self::new(kind) }
    }

    pub fn bodies(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(_, m)| m.body.clone()).collect()
    }

    pub fn sent_to(&self, destination: &str) -> Vec<Message> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(d, _)| d == destination)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn default_destination(&self) -> Option<&str> {
        Some("owner-inbox")
    }

    fn addresses_by_user_id(&self) -> bool {
        self.kind == ChannelKind::Telegram
    }

    async fn send(&self, destination: &str, message: &Message) -> Result<(), ChannelError> {
        self.sent.lock().unwrap().push((destination.to_string(), message.clone()));
        if self.fail {
            return Err(ChannelError::Delivery { channel: self.kind.to_string(), reason: "HTTP 500".into() });
        }
        Ok(())
    }
}

/// Everything a sweep needs, wired over an in-memory store.
pub struct Harness {
    pub store: Arc<SqliteStore>,
    pub cipher: Arc<CredentialCipher>,
    pub provider: Arc<FakeProvider>,
    pub channel: Arc<RecordingChannel>,
    pub executor: Arc<ClaimExecutor>,
    pub sweep: Arc<ClaimSweep>,
    pub reminders: Arc<ReminderRunner>,
}

impl Harness {
    pub fn new(provider: FakeProvider) -> Self {
        Self::wired(Arc::new(SqliteStore::open_in_memory().unwrap()), Arc::new(provider))
    }

    /// One engine over a database file, as the daemon or the CLI opens it.
    pub fn on_disk(path: &Path, provider: Arc<FakeProvider>) -> Self {
        Self::wired(Arc::new(SqliteStore::open(path).unwrap()), provider)
    }

    fn wired(store: Arc<SqliteStore>, provider: Arc<FakeProvider>) -> Self {
        let cipher = Arc::new(CredentialCipher::from_secret(Some(SECRET)));
        let channel = Arc::new(RecordingChannel::new(ChannelKind::Telegram));
        let dispatcher =
            Arc::new(Dispatcher::new(Duration::from_secs(2)).with_channel(channel.clone() as Arc<dyn Channel>));
        let executor = Arc::new(ClaimExecutor::new(
            store.clone(),
            provider.clone(),
            cipher.clone(),
            Duration::from_secs(5),
        ));
        let sweep = Arc::new(ClaimSweep::new(
            executor.clone(),
            store.clone(),
            dispatcher.clone(),
            SweepGuard::new(store.clone()),
            5,
            false,
            "owner",
        ));
        let reminders = Arc::new(ReminderRunner::new(
            store.clone(),
            executor.clone(),
            dispatcher,
            ReminderConfig::default(),
            5,
        ));
        Self { store, cipher, provider, channel, executor, sweep, reminders }
    }

    pub async fn owner(&self) -> User {
        self.store.upsert_user(&NewUser::owner("owner", "boss")).await.unwrap()
    }

    /// Member reachable on the recording channel at `inbox-<id>`.
    pub async fn member(&self, id: &str) -> User {
        let prefs = vec![ChannelPreference::new(ChannelKind::Telegram, Some(format!("inbox-{id}")))];
        self.store.upsert_user(&NewUser::member(id, id).with_channels(prefs)).await.unwrap()
    }

    /// Bind `token` encrypted, as the CLI does.
    pub async fn bind(&self, user_id: &str, label: &str, token: &str) -> Account {
        let stored = self.cipher.encrypt(token).unwrap();
        self.store.bind_credential(user_id, label, stored).await.unwrap()
    }

    pub async fn account(&self, id: &str) -> Account {
        self.store.get_account(id).await.unwrap().unwrap()
    }
}
