//! Plain-text notification bodies.

use couponclaw_core::types::{Benefit, ClaimOutcomeKind, Message, NotifyPriority, StoreSummary, TriggerKind, User};
use std::fmt::Write as _;

use crate::executor::ClaimRecord;
use crate::sweep::SweepSummary;

pub const SEPARATOR: &str = "━━━━━━━━━━━━━━━━━━━";

/// Maximum benefits listed by name in one message.
const MAX_LISTED: usize = 10;

fn push_benefit_lines(body: &mut String, benefits: &[Benefit]) {
    for b in benefits.iter().take(MAX_LISTED) {
        let _ = writeln!(body, "  • {}", b.name);
    }
    if benefits.len() > MAX_LISTED {
        let _ = writeln!(body, "  … and {} more", benefits.len() - MAX_LISTED);
    }
}

/// Per-user report for one claim run. `None` when there is nothing the user
/// should hear about.
///
/// Pause notices are always included; they are the only way a user learns
/// to resend a token. Transient failures are included only on request.
pub fn claim_report(user: &User, records: &[ClaimRecord], notify_transient: bool) -> Option<Message> {
    let mut body = String::new();
    let mut priority = NotifyPriority::Normal;

    for record in records {
        let label = &record.outcome.label;
        match &record.outcome.kind {
            ClaimOutcomeKind::Success(claimed) if user.report_enabled => {
                let _ = writeln!(body, "✅ {label}: claimed {} coupon(s)", claimed.len());
                push_benefit_lines(&mut body, claimed);
            }
            ClaimOutcomeKind::NoneAvailable if user.report_enabled => {
                let _ = writeln!(body, "🫙 {label}: nothing new to claim today");
            }
            ClaimOutcomeKind::InvalidCredential if record.effect.paused => {
                priority = NotifyPriority::High;
                let _ = writeln!(
                    body,
                    "🚫 {label}: token invalid, please resend it. Autoclaim is paused for this account."
                );
            }
            ClaimOutcomeKind::CredentialUnreadable(_) if record.effect.paused => {
                priority = NotifyPriority::High;
                let _ = writeln!(
                    body,
                    "🔐 {label}: stored token unreadable, please resend it. Autoclaim is paused for this account."
                );
            }
            ClaimOutcomeKind::TransientFailure(reason) if notify_transient => {
                let _ = writeln!(body, "⚠️ {label}: provider unavailable ({reason}), will try again next run");
            }
            _ => {}
        }
    }

    if body.is_empty() {
        return None;
    }
    Some(Message::new("🎟️ Coupon claim report", body.trim_end(), TriggerKind::Claim.as_str(), priority))
}

/// Owner-facing summary of a whole claim run.
pub fn sweep_summary(summary: &SweepSummary, totals: &StoreSummary, source: &str) -> Message {
    let mut body = String::new();
    let _ = writeln!(body, "Accounts processed: {}", summary.total);
    let _ = writeln!(
        body,
        "✅ {} succeeded ({} coupons) · 🫙 {} nothing new",
        summary.succeeded, summary.benefits_claimed, summary.none_available
    );
    let _ = writeln!(
        body,
        "🚫 {} invalid · 🔐 {} unreadable · ⚠️ {} transient",
        summary.invalid, summary.unreadable, summary.transient
    );
    let _ = writeln!(body, "⏸️ {} newly paused · 📭 {} channel failures", summary.paused, summary.channel_failures);
    let _ = writeln!(body, "{SEPARATOR}");
    let _ = writeln!(body, "Users: {} · accounts: {} ({} on autoclaim, {} paused)", totals.users, totals.accounts, totals.eligible, totals.paused);
    let _ = write!(body, "All-time: {} claimed · {} failed runs", totals.total_success, totals.total_failed);

    let priority = if summary.invalid + summary.unreadable + summary.transient > 0 {
        NotifyPriority::High
    } else {
        NotifyPriority::Low
    };
    Message::new("📊 Claim run summary", &body, source, priority)
}

/// Top-ranked claimable benefits, best first.
pub fn recommendation(ranked: &[(Benefit, u8)]) -> Option<Message> {
    if ranked.is_empty() {
        return None;
    }
    const MEDALS: [&str; 5] = ["🥇", "🥈", "🥉", "🏅", "⭐"];
    let mut body = format!("Today's {} best coupons to claim:\n\n", ranked.len());
    for (i, (benefit, _score)) in ranked.iter().enumerate() {
        let medal = MEDALS.get(i).copied().unwrap_or("📌");
        let _ = writeln!(body, "{medal} {}", benefit.name);
    }
    body.push_str("\n💰 First come, first served.");
    Some(Message::new("🌅 Daily picks", &body, TriggerKind::Recommend.as_str(), NotifyPriority::Low))
}

/// Meal-time nudge listing owned coupons.
pub fn meal_reminder(trigger: TriggerKind, owned: &[Benefit]) -> Option<Message> {
    if owned.is_empty() {
        return None;
    }
    let title = match trigger {
        TriggerKind::DinnerReminder => "🍗 Dinner time",
        _ => "🍔 Lunch time",
    };
    let mut body = format!("You have {} coupon(s) ready to use:\n", owned.len());
    push_benefit_lines(&mut body, owned);
    Some(Message::new(title, body.trim_end(), trigger.as_str(), NotifyPriority::Normal))
}

/// Coupons about to expire, soonest first. `expiring` pairs a benefit with its days left.
pub fn expiry_reminder(expiring: &[(Benefit, i64)]) -> Option<Message> {
    if expiring.is_empty() {
        return None;
    }
    let mut body = format!("{} coupon(s) expire soon:\n\n", expiring.len());
    for (benefit, days_left) in expiring {
        let urgency = match days_left {
            0 => "🔴 today".to_string(),
            1 => "🟠 tomorrow".to_string(),
            n => format!("🟡 in {n} days"),
        };
        match benefit.expires_on {
            Some(date) => {
                let _ = writeln!(body, "{urgency}: {} (until {date})", benefit.name);
            }
            None => {
                let _ = writeln!(body, "{urgency}: {}", benefit.name);
            }
        }
    }
    body.push_str("\n💡 Use them before they go to waste.");
    Some(Message::new("⏰ Coupon expiry reminder", &body, TriggerKind::ExpiryReminder.as_str(), NotifyPriority::High))
}
