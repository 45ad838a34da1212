//! # CouponClaw Scheduler
//!
//! The daily timeline and everything it sets off.
//!
//! ```text
//! Scheduler (tokio interval, FireLedger marks each trigger once per day)
//!   ├── claim           → ClaimSweep → ClaimExecutor per account → per-user report
//!   ├── recommend       → ReminderRunner → ranked claimable coupons
//!   ├── lunch / dinner  → ReminderRunner → owned coupons
//!   └── expiry-reminder → ReminderRunner → owned coupons expiring soon
//!
//! AdminSweep → same ClaimSweep path, owner only, fails fast when busy
//! ```

pub mod engine;
pub mod executor;
pub mod messages;
pub mod reminders;
pub mod sweep;
pub mod triggers;

pub use engine::Scheduler;
pub use executor::{BenefitQueryError, ClaimExecutor, ClaimRecord};
pub use reminders::{ReminderReport, ReminderRunner};
pub use sweep::{AdminSweep, ClaimSweep, SweepError, SweepGuard, SweepPermit, SweepSummary};
