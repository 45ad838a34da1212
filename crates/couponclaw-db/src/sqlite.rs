//! SQLite account store: users, accounts and trigger runs in one file.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use couponclaw_core::error::{CouponClawError, Result};
use couponclaw_core::traits::{AccountGuard, AccountStore, FireLedger, SweepLease};
use couponclaw_core::types::{
    Account, AccountState, AccountStats, ChannelPreference, ClaimOutcome, ClaimOutcomeKind,
    NewUser, RecordEffect, Role, StoreSummary, StoredCredential, TriggerKind, User,
};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::locks::AccountLocks;

/// SQLite-backed store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    locks: AccountLocks,
}

/// Shared SELECT column list for account queries.
const ACCOUNT_SELECT: &str = "SELECT id,user_id,label,credential,state,autoclaim,success_count,failure_count,last_claim_at,last_error,is_current,created_at FROM accounts";

const CLAIM_SWEEP_LEASE: &str = "claim-sweep";

const USER_SELECT: &str =
    "SELECT id,display_name,role,report_enabled,reminders_enabled,channels,created_at FROM users";

fn db_err(e: rusqlite::Error) -> CouponClawError {
    CouponClawError::Database(e.to_string())
}

fn conversion_err<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

fn row_to_account(row: &rusqlite::Row) -> rusqlite::Result<Account> {
    let state: String = row.get(4)?;
    let last_claim_at: Option<String> = row.get(8)?;
    let created_at: String = row.get(11)?;
    Ok(Account {
        id: row.get(0)?,
        user_id: row.get(1)?,
        label: row.get(2)?,
        credential: StoredCredential::new(row.get::<_, String>(3)?),
        state: AccountState::from_str(&state).map_err(|e| conversion_err(4, e))?,
        autoclaim: row.get(5)?,
        stats: AccountStats {
            success_count: row.get::<_, i64>(6)? as u64,
            failure_count: row.get::<_, i64>(7)? as u64,
            last_claim_at: last_claim_at.as_deref().map(|s| parse_ts(8, s)).transpose()?,
            last_error: row.get(9)?,
        },
        is_current: row.get(10)?,
        created_at: parse_ts(11, &created_at)?,
    })
}

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    let role: String = row.get(2)?;
    let channels: String = row.get(5)?;
    let created_at: String = row.get(6)?;
    Ok(User {
        id: row.get(0)?,
        display_name: row.get(1)?,
        role: Role::from_str(&role).map_err(|e| conversion_err(2, e))?,
        report_enabled: row.get(3)?,
        reminders_enabled: row.get(4)?,
        channels: serde_json::from_str(&channels).map_err(|e| conversion_err(5, e))?,
        created_at: parse_ts(6, &created_at)?,
    })
}

impl SqliteStore {
    /// Open or create the store database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| CouponClawError::Database(format!("DB open error: {e}")))?;

        // WAL lets the CLI read while the daemon writes.
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(|e| CouponClawError::Database(format!("DB pragma error: {e}")))?;

        Self::with_connection(conn)
    }

    /// In-memory store, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;").map_err(db_err)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self { conn: Mutex::new(conn), locks: AccountLocks::new() };
        store.migrate()?;
        Ok(store)
    }

    /// Run schema migrations.
    fn migrate(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL DEFAULT '',
                role TEXT NOT NULL DEFAULT 'member',
                report_enabled INTEGER NOT NULL DEFAULT 1,
                reminders_enabled INTEGER NOT NULL DEFAULT 1,
                channels TEXT NOT NULL DEFAULT '[]',   -- JSON capability set
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                label TEXT NOT NULL,
                credential TEXT NOT NULL,              -- plaintext or enc:v1:...
                state TEXT NOT NULL DEFAULT 'active',  -- active, paused
                autoclaim INTEGER NOT NULL DEFAULT 1,
                success_count INTEGER NOT NULL DEFAULT 0,
                failure_count INTEGER NOT NULL DEFAULT 0,
                last_claim_at TEXT,
                last_error TEXT,
                is_current INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                UNIQUE (user_id, label)
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_accounts_one_current
                ON accounts(user_id) WHERE is_current = 1;
            CREATE INDEX IF NOT EXISTS idx_accounts_eligible
                ON accounts(state, autoclaim);

            CREATE TABLE IF NOT EXISTS trigger_runs (
                name TEXT PRIMARY KEY,
                last_fired TEXT NOT NULL,              -- local date, YYYY-MM-DD
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sweep_lease (
                name TEXT PRIMARY KEY,
                holder TEXT NOT NULL,
                expires_at INTEGER NOT NULL            -- unix millis
            );
            ",
            )
            .map_err(|e| CouponClawError::Database(format!("Migration error: {e}")))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| CouponClawError::Database(format!("DB lock poisoned: {e}")))
    }

    fn query_account(conn: &Connection, sql: &str, args: impl rusqlite::Params) -> Result<Option<Account>> {
        conn.query_row(sql, args, row_to_account).optional().map_err(db_err)
    }

    fn query_accounts(conn: &Connection, sql: &str, args: impl rusqlite::Params) -> Result<Vec<Account>> {
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let rows = stmt.query_map(args, row_to_account).map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// Make `account_id` the only current account of `user_id`.
    fn make_current(tx: &rusqlite::Transaction, user_id: &str, account_id: &str) -> Result<()> {
        tx.execute(
            "UPDATE accounts SET is_current = 0 WHERE user_id = ?1 AND id != ?2",
            params![user_id, account_id],
        )
        .map_err(db_err)?;
        tx.execute("UPDATE accounts SET is_current = 1 WHERE id = ?1", params![account_id])
            .map_err(db_err)?;
        Ok(())
    }

    fn account_or_not_found(&self, id: &str) -> Result<Account> {
        let conn = self.conn()?;
        Self::query_account(&conn, &format!("{ACCOUNT_SELECT} WHERE id = ?1"), params![id])?
            .ok_or_else(|| CouponClawError::NotFound(format!("account {id}")))
    }

    fn account_id_for(&self, user_id: &str, label: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id FROM accounts WHERE user_id = ?1 AND label = ?2",
            params![user_id, label],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)
    }

    fn ensure_changed(changed: usize, what: impl FnOnce() -> String) -> Result<()> {
        if changed == 0 {
            Err(CouponClawError::NotFound(what()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AccountStore for SqliteStore {
    async fn upsert_user(&self, user: &NewUser) -> Result<User> {
        {
            let conn = self.conn()?;
            let channels = serde_json::to_string(&user.channels)?;
            conn.execute(
                "INSERT INTO users (id, display_name, role, channels, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET display_name = excluded.display_name, role = excluded.role",
                params![user.id, user.display_name, user.role.as_str(), channels, Utc::now().to_rfc3339()],
            )
            .map_err(db_err)?;
        }
        self.get_user(&user.id)
            .await?
            .ok_or_else(|| CouponClawError::NotFound(format!("user {}", user.id)))
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn()?;
        conn.query_row(&format!("{USER_SELECT} WHERE id = ?1"), params![id], row_to_user)
            .optional()
            .map_err(db_err)
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{USER_SELECT} ORDER BY created_at")).map_err(db_err)?;
        let rows = stmt.query_map([], row_to_user).map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    async fn set_preferences(&self, id: &str, report_enabled: bool, reminders_enabled: bool) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE users SET report_enabled = ?2, reminders_enabled = ?3 WHERE id = ?1",
                params![id, report_enabled, reminders_enabled],
            )
            .map_err(db_err)?;
        Self::ensure_changed(changed, || format!("user {id}"))
    }

    async fn set_channels(&self, id: &str, channels: &[ChannelPreference]) -> Result<()> {
        let json = serde_json::to_string(channels)?;
        let conn = self.conn()?;
        let changed = conn
            .execute("UPDATE users SET channels = ?2 WHERE id = ?1", params![id, json])
            .map_err(db_err)?;
        Self::ensure_changed(changed, || format!("user {id}"))
    }

    async fn bind_credential(&self, user_id: &str, label: &str, credential: StoredCredential) -> Result<Account> {
        let label = label.trim();
        if label.is_empty() {
            return Err(CouponClawError::Conflict("account label must not be empty".into()));
        }

        // A rebind waits for any claim in flight on the same account.
        let _guard = match self.account_id_for(user_id, label)? {
            Some(id) => Some(self.locks.acquire(&id).await),
            None => None,
        };

        let account_id = {
            let mut conn = self.conn()?;
            let tx = conn.transaction().map_err(db_err)?;

            let user_exists: bool = tx
                .query_row("SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)", params![user_id], |r| r.get(0))
                .map_err(db_err)?;
            if !user_exists {
                return Err(CouponClawError::NotFound(format!("user {user_id}")));
            }

            let existing: Option<String> = tx
                .query_row(
                    "SELECT id FROM accounts WHERE user_id = ?1 AND label = ?2",
                    params![user_id, label],
                    |r| r.get(0),
                )
                .optional()
                .map_err(db_err)?;

            let id = match existing {
                Some(id) => {
                    // Rebind: a fresh credential lifts any pause.
                    tx.execute(
                        "UPDATE accounts SET credential = ?2, state = 'active', autoclaim = 1, last_error = NULL
                         WHERE id = ?1",
                        params![id, credential.as_str()],
                    )
                    .map_err(db_err)?;
                    tracing::info!("🔁 Credential rebound for user {user_id} account '{label}'");
                    id
                }
                None => {
                    let id = uuid::Uuid::new_v4().to_string();
                    tx.execute(
                        "INSERT INTO accounts (id, user_id, label, credential, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![id, user_id, label, credential.as_str(), Utc::now().to_rfc3339()],
                    )
                    .map_err(db_err)?;
                    tracing::info!("🆕 Account '{label}' bound for user {user_id}");
                    id
                }
            };

            Self::make_current(&tx, user_id, &id)?;
            tx.commit().map_err(db_err)?;
            id
        };

        self.account_or_not_found(&account_id)
    }

    async fn get_account(&self, id: &str) -> Result<Option<Account>> {
        let conn = self.conn()?;
        Self::query_account(&conn, &format!("{ACCOUNT_SELECT} WHERE id = ?1"), params![id])
    }

    async fn list_accounts(&self, user_id: &str) -> Result<Vec<Account>> {
        let conn = self.conn()?;
        Self::query_accounts(
            &conn,
            &format!("{ACCOUNT_SELECT} WHERE user_id = ?1 ORDER BY created_at, label"),
            params![user_id],
        )
    }

    async fn current_account(&self, user_id: &str) -> Result<Option<Account>> {
        let conn = self.conn()?;
        Self::query_account(
            &conn,
            &format!("{ACCOUNT_SELECT} WHERE user_id = ?1 AND is_current = 1"),
            params![user_id],
        )
    }

    async fn set_current(&self, user_id: &str, label: &str) -> Result<Account> {
        let account_id = {
            let mut conn = self.conn()?;
            let tx = conn.transaction().map_err(db_err)?;
            let id: String = tx
                .query_row(
                    "SELECT id FROM accounts WHERE user_id = ?1 AND label = ?2",
                    params![user_id, label],
                    |r| r.get(0),
                )
                .optional()
                .map_err(db_err)?
                .ok_or_else(|| CouponClawError::NotFound(format!("account '{label}' of user {user_id}")))?;
            Self::make_current(&tx, user_id, &id)?;
            tx.commit().map_err(db_err)?;
            id
        };
        self.account_or_not_found(&account_id)
    }

    async fn set_autoclaim(&self, account_id: &str, enabled: bool) -> Result<()> {
        let _guard = self.locks.acquire(account_id).await;
        let conn = self.conn()?;
        let sql = if enabled {
            "UPDATE accounts SET autoclaim = 1, state = 'active' WHERE id = ?1"
        } else {
            "UPDATE accounts SET autoclaim = 0 WHERE id = ?1"
        };
        let changed = conn.execute(sql, params![account_id]).map_err(db_err)?;
        Self::ensure_changed(changed, || format!("account {account_id}"))
    }

    async fn delete_account(&self, account_id: &str) -> Result<()> {
        let _guard = self.locks.acquire(account_id).await;
        {
            let mut conn = self.conn()?;
            let tx = conn.transaction().map_err(db_err)?;
            let (user_id, was_current): (String, bool) = tx
                .query_row(
                    "SELECT user_id, is_current FROM accounts WHERE id = ?1",
                    params![account_id],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()
                .map_err(db_err)?
                .ok_or_else(|| CouponClawError::NotFound(format!("account {account_id}")))?;

            tx.execute("DELETE FROM accounts WHERE id = ?1", params![account_id])
                .map_err(db_err)?;
            if was_current {
                tx.execute(
                    "UPDATE accounts SET is_current = 1 WHERE id =
                        (SELECT id FROM accounts WHERE user_id = ?1 ORDER BY created_at, label LIMIT 1)",
                    params![user_id],
                )
                .map_err(db_err)?;
            }
            tx.commit().map_err(db_err)?;
        }
        self.locks.forget(account_id);
        Ok(())
    }

    async fn clear_credentials(&self, user_id: &str) -> Result<usize> {
        let ids: Vec<String> = {
            let conn = self.conn()?;
            let mut stmt = conn
                .prepare("SELECT id FROM accounts WHERE user_id = ?1 ORDER BY id")
                .map_err(db_err)?;
            let rows = stmt.query_map(params![user_id], |r| r.get(0)).map_err(db_err)?;
            rows.collect::<rusqlite::Result<Vec<String>>>().map_err(db_err)?
        };

        // Ids are sorted, and a claim only ever holds one account lock.
        let mut guards = Vec::with_capacity(ids.len());
        for id in &ids {
            guards.push(self.locks.acquire(id).await);
        }

        let removed = {
            let mut conn = self.conn()?;
            let tx = conn.transaction().map_err(db_err)?;
            let removed = tx
                .execute("DELETE FROM accounts WHERE user_id = ?1", params![user_id])
                .map_err(db_err)?;
            tx.commit().map_err(db_err)?;
            removed
        };
        for id in &ids {
            self.locks.forget(id);
        }
        tracing::info!("🗑️ Cleared {removed} account(s) of user {user_id}");
        Ok(removed)
    }

    async fn reset_stats(&self, account_id: &str) -> Result<()> {
        let _guard = self.locks.acquire(account_id).await;
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE accounts SET success_count = 0, failure_count = 0, last_claim_at = NULL, last_error = NULL
                 WHERE id = ?1",
                params![account_id],
            )
            .map_err(db_err)?;
        Self::ensure_changed(changed, || format!("account {account_id}"))
    }

    async fn list_eligible_for_autoclaim(&self) -> Result<Vec<Account>> {
        let conn = self.conn()?;
        Self::query_accounts(
            &conn,
            &format!("{ACCOUNT_SELECT} WHERE state = 'active' AND autoclaim = 1 ORDER BY user_id, created_at"),
            [],
        )
    }

    async fn record_claim_outcome(&self, outcome: &ClaimOutcome) -> Result<RecordEffect> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        let at = outcome.at.to_rfc3339();
        let error = outcome.error_summary();

        let changed = match &outcome.kind {
            ClaimOutcomeKind::Success(claimed) => tx.execute(
                "UPDATE accounts SET success_count = success_count + ?2, last_claim_at = ?3, last_error = NULL
                 WHERE id = ?1",
                params![outcome.account_id, claimed.len() as i64, at],
            ),
            ClaimOutcomeKind::NoneAvailable => tx.execute(
                "UPDATE accounts SET last_claim_at = ?2, last_error = NULL WHERE id = ?1",
                params![outcome.account_id, at],
            ),
            _ => tx.execute(
                "UPDATE accounts SET failure_count = failure_count + 1, last_claim_at = ?2, last_error = ?3
                 WHERE id = ?1",
                params![outcome.account_id, at, error],
            ),
        }
        .map_err(db_err)?;
        Self::ensure_changed(changed, || format!("account {}", outcome.account_id))?;

        let mut effect = RecordEffect::default();
        if outcome.requires_rebind() {
            // Only one racing outcome wins, and never against a credential
            // rebound after the claim started.
            let paused = tx
                .execute(
                    "UPDATE accounts SET state = 'paused', autoclaim = 0
                     WHERE id = ?1 AND state = 'active' AND credential = ?2",
                    params![outcome.account_id, outcome.credential.as_str()],
                )
                .map_err(db_err)?;
            effect.paused = paused == 1;
        }
        tx.commit().map_err(db_err)?;

        if effect.paused {
            tracing::warn!(
                "⏸️ Account '{}' of user {} paused ({})",
                outcome.label,
                outcome.user_id,
                outcome.kind.label()
            );
        }
        Ok(effect)
    }

    async fn summary(&self) -> Result<StoreSummary> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT
                (SELECT COUNT(*) FROM users),
                (SELECT COUNT(*) FROM accounts),
                (SELECT COUNT(*) FROM accounts WHERE state = 'active' AND autoclaim = 1),
                (SELECT COUNT(*) FROM accounts WHERE state = 'paused'),
                (SELECT COALESCE(SUM(success_count), 0) FROM accounts),
                (SELECT COALESCE(SUM(failure_count), 0) FROM accounts)",
            [],
            |r| {
                Ok(StoreSummary {
                    users: r.get::<_, i64>(0)? as u64,
                    accounts: r.get::<_, i64>(1)? as u64,
                    eligible: r.get::<_, i64>(2)? as u64,
                    paused: r.get::<_, i64>(3)? as u64,
                    total_success: r.get::<_, i64>(4)? as u64,
                    total_failed: r.get::<_, i64>(5)? as u64,
                })
            },
        )
        .map_err(db_err)
    }

    async fn lock_account(&self, account_id: &str) -> AccountGuard {
        self.locks.acquire(account_id).await
    }
}

#[async_trait]
impl FireLedger for SqliteStore {
    async fn last_fired(&self, trigger: TriggerKind) -> Result<Option<NaiveDate>> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT last_fired FROM trigger_runs WHERE name = ?1",
                params![trigger.as_str()],
                |r| r.get(0),
            )
            .optional()
            .map_err(db_err)?;
        raw.map(|s| {
            NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .map_err(|e| CouponClawError::Database(format!("bad trigger date '{s}': {e}")))
        })
        .transpose()
    }

    async fn mark_fired(&self, trigger: TriggerKind, date: NaiveDate) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "INSERT INTO trigger_runs (name, last_fired, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET last_fired = excluded.last_fired, updated_at = excluded.updated_at
                 WHERE trigger_runs.last_fired < excluded.last_fired",
                params![trigger.as_str(), date.format("%Y-%m-%d").to_string(), Utc::now().to_rfc3339()],
            )
            .map_err(db_err)?;
        Ok(changed == 1)
    }
}

impl SweepLease for SqliteStore {
    fn try_acquire_lease(&self, holder: &str, ttl: Duration) -> Result<bool> {
        let now = Utc::now().timestamp_millis();
        let expires_at = now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX));
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "INSERT INTO sweep_lease (name, holder, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET holder = excluded.holder, expires_at = excluded.expires_at
                 WHERE sweep_lease.holder = excluded.holder OR sweep_lease.expires_at <= ?4",
                params![CLAIM_SWEEP_LEASE, holder, expires_at, now],
            )
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    fn release_lease(&self, holder: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM sweep_lease WHERE name = ?1 AND holder = ?2",
            params![CLAIM_SWEEP_LEASE, holder],
        )
        .map_err(db_err)?;
        Ok(())
    }
}
