//! Per-account async lock table.

use couponclaw_core::traits::AccountGuard;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// One async mutex per account id, created on first use.
#[derive(Default)]
pub struct AccountLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the account's critical section.
    pub async fn acquire(&self, account_id: &str) -> AccountGuard {
        let slot = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(account_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        slot.lock_owned().await
    }

    /// Drop the slot of a deleted account. Holders keep their guard.
    pub fn forget(&self, account_id: &str) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.remove(account_id);
    }
}
