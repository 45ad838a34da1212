//! Recommendation, meal-time and expiry reminders.

use chrono::NaiveDate;
use couponclaw_channels::Dispatcher;
use couponclaw_core::config::ReminderConfig;
use couponclaw_core::error::Result;
use couponclaw_core::traits::AccountStore;
use couponclaw_core::types::{AccountState, Benefit, Message, TriggerKind, User};
use futures::StreamExt;
use std::sync::Arc;

use crate::executor::ClaimExecutor;
use crate::messages;

/// Keyword weights for ranking claimable coupons. Each group counts once.
const VALUE_RULES: [(&[&str], u8); 7] = [
    (&["免费", "0元", "free"], 50),
    (&["买一送一", "1+1", "买1送1", "bogo"], 40),
    (&["半价", "5折", "half price"], 35),
    (&["19.9", "29.9", "39.9"], 25),
    (&["9.9", "6.9", "4.9"], 15),
    (&["巨无霸", "麦辣鸡腿堡", "薯条", "汉堡", "big mac", "fries", "burger"], 10),
    (&["限时", "今日", "today only"], 5),
];

const BASE_SCORE: u8 = 50;
const MAX_SCORE: u8 = 100;

/// Rough value of a coupon from its name, 50..=100.
pub fn value_score(name: &str) -> u8 {
    let lower = name.to_lowercase();
    let bonus: u32 = VALUE_RULES
        .iter()
        .filter(|(words, _)| words.iter().any(|w| lower.contains(w)))
        .map(|(_, weight)| u32::from(*weight))
        .sum();
    (u32::from(BASE_SCORE) + bonus).min(u32::from(MAX_SCORE)) as u8
}

/// Best `top_n` benefits by value, stable for equal scores.
pub fn rank_benefits(benefits: Vec<Benefit>, top_n: usize) -> Vec<(Benefit, u8)> {
    let mut scored: Vec<_> = benefits
        .into_iter()
        .map(|b| {
            let score = value_score(&b.name);
            (b, score)
        })
        .collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored.truncate(top_n);
    scored
}

/// Benefits expiring within `days` of `today` (inclusive), soonest first.
pub fn expiring_within(benefits: Vec<Benefit>, today: NaiveDate, days: i64) -> Vec<(Benefit, i64)> {
    let mut expiring: Vec<_> = benefits
        .into_iter()
        .filter_map(|b| {
            let left = b.days_left(today)?;
            (0..=days).contains(&left).then_some((b, left))
        })
        .collect();
    expiring.sort_by_key(|(_, left)| *left);
    expiring
}

/// Counters for one reminder trigger run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReminderReport {
    pub users: usize,
    pub notified: usize,
    pub query_failures: usize,
    pub channel_failures: usize,
}

/// Runs reminder triggers against each opted-in user's current account.
pub struct ReminderRunner {
    store: Arc<dyn AccountStore>,
    executor: Arc<ClaimExecutor>,
    dispatcher: Arc<Dispatcher>,
    config: ReminderConfig,
    concurrency: usize,
}

enum UserResult {
    Notified { channel_failures: usize },
    Quiet,
    QueryFailed,
}

impl ReminderRunner {
    pub fn new(
        store: Arc<dyn AccountStore>,
        executor: Arc<ClaimExecutor>,
        dispatcher: Arc<Dispatcher>,
        config: ReminderConfig,
        concurrency: usize,
    ) -> Self {
        Self { store, executor, dispatcher, config, concurrency: concurrency.max(1) }
    }

    /// Run `trigger` for every user with reminders enabled. `today` is the
    /// local date used for expiry arithmetic.
    pub async fn run(&self, trigger: TriggerKind, today: NaiveDate) -> Result<ReminderReport> {
        let users: Vec<User> = self
            .store
            .list_users()
            .await?
            .into_iter()
            .filter(|u| u.reminders_enabled)
            .collect();

        let mut report = ReminderReport { users: users.len(), ..Default::default() };
        let results: Vec<UserResult> = futures::stream::iter(users)
            .map(|user| async move { self.remind_user(trigger, &user, today).await })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for result in results {
            match result {
                UserResult::Notified { channel_failures } => {
                    report.notified += 1;
                    report.channel_failures += channel_failures;
                }
                UserResult::QueryFailed => report.query_failures += 1,
                UserResult::Quiet => {}
            }
        }

        tracing::info!(
            "🔔 {trigger}: {} user(s) notified, {} query failure(s)",
            report.notified,
            report.query_failures
        );
        Ok(report)
    }

    async fn remind_user(&self, trigger: TriggerKind, user: &User, today: NaiveDate) -> UserResult {
        let account = match self.store.current_account(&user.id).await {
            Ok(Some(a)) if a.state == AccountState::Active => a,
            Ok(_) => return UserResult::Quiet,
            Err(e) => {
                tracing::warn!("⚠️ {trigger}: cannot load account of user {}: {e}", user.id);
                return UserResult::QueryFailed;
            }
        };

        let query = match trigger {
            TriggerKind::Recommend => self.executor.claimable_benefits(&account).await,
            _ => self.executor.owned_benefits(&account).await,
        };
        let benefits = match query {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!("⚠️ {trigger}: query for user {} account '{}' failed: {e}", user.id, account.label);
                return UserResult::QueryFailed;
            }
        };

        let Some(message) = self.compose(trigger, benefits, today) else {
            return UserResult::Quiet;
        };
        let dispatched = self.dispatcher.dispatch(user, &message).await;
        UserResult::Notified { channel_failures: dispatched.failed.len() }
    }

    fn compose(&self, trigger: TriggerKind, benefits: Vec<Benefit>, today: NaiveDate) -> Option<Message> {
        match trigger {
            TriggerKind::Recommend => messages::recommendation(&rank_benefits(benefits, self.config.top_n)),
            TriggerKind::LunchReminder | TriggerKind::DinnerReminder => messages::meal_reminder(trigger, &benefits),
            TriggerKind::ExpiryReminder => {
                messages::expiry_reminder(&expiring_within(benefits, today, self.config.expiry_days))
            }
            TriggerKind::Claim => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_score() {
        assert_eq!(value_score("麦辣鸡腿堡"), 60);
        assert_eq!(value_score("免费薯条"), 100);
        assert_eq!(value_score("买一送一 圆筒"), 90);
        assert_eq!(value_score("咖啡"), 50);
        // 19.9 also contains 9.9.
        assert_eq!(value_score("19.9 套餐"), 90);
    }

    #[test]
    fn test_rank_benefits() {
        let ranked = rank_benefits(
            vec![Benefit::named("咖啡"), Benefit::named("半价 派"), Benefit::named("免费 可乐"), Benefit::named("茶")],
            2,
        );
        let names: Vec<_> = ranked.iter().map(|(b, _)| b.name.as_str()).collect();
        assert_eq!(names, ["免费 可乐", "半价 派"]);
    }

    #[test]
    fn test_expiring_within() {
        let today = NaiveDate::from_ymd_opt(2026, 1, 20).unwrap();
        let d = |day| NaiveDate::from_ymd_opt(2026, 1, day).unwrap();
        let expiring = expiring_within(
            vec![
                Benefit::expiring("later", d(30)),
                Benefit::expiring("soon", d(22)),
                Benefit::expiring("past", d(19)),
                Benefit::named("unknown"),
                Benefit::expiring("today", d(20)),
            ],
            today,
            3,
        );
        let names: Vec<_> = expiring.iter().map(|(b, left)| (b.name.as_str(), *left)).collect();
        assert_eq!(names, [("today", 0), ("soon", 2)]);
    }
}
