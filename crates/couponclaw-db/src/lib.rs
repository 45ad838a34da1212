//! # CouponClaw DB
//! Durable storage for users, accounts and trigger firing dates.
//!
//! `SqliteStore` implements both `AccountStore` and `FireLedger` on one
//! SQLite file (WAL mode). Per-account critical sections live in
//! [`locks::AccountLocks`] so distinct accounts never contend.

pub mod locks;
pub mod sqlite;

pub use locks::AccountLocks;
pub use sqlite::SqliteStore;
