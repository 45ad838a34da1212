//! Daily trigger evaluation.
//!
//! Each trigger is `Pending(date) → Fired(date)` per local calendar date. The
//! claim trigger always catches up after a late start; reminders are only
//! worth sending close to their time and are skipped once past the grace window.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use couponclaw_core::types::TriggerKind;

/// What a tick should do with one trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Not yet time today.
    NotYet,
    /// Already fired (or skipped) for today's date.
    Done,
    /// Due: mark fired and run the action.
    Fire,
    /// Overdue beyond grace: mark fired, do not run.
    Skip,
}

impl Decision {
    /// Whether the ledger must be updated for today.
    pub fn marks_ledger(self) -> bool {
        matches!(self, Decision::Fire | Decision::Skip)
    }
}

/// Decide for `kind` at local time `now`, given when it last fired.
pub fn evaluate(
    kind: TriggerKind,
    at: NaiveTime,
    now: NaiveDateTime,
    last_fired: Option<NaiveDate>,
    late_grace: TimeDelta,
) -> Decision {
    let today = now.date();
    if last_fired.is_some_and(|d| d >= today) {
        return Decision::Done;
    }
    if now.time() < at {
        return Decision::NotYet;
    }
    if kind == TriggerKind::Claim {
        return Decision::Fire;
    }
    let late_by = now.time() - at;
    if late_by <= late_grace { Decision::Fire } else { Decision::Skip }
}
