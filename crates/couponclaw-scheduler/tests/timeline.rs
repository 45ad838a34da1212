mod common;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use common::{Behavior, FakeProvider, Harness};
use couponclaw_core::config::{ScheduleConfig, TriggerConfig};
use couponclaw_core::traits::{AccountStore, FireLedger};
use couponclaw_core::types::{Benefit, TriggerKind};
use couponclaw_scheduler::Scheduler;
use std::sync::Arc;

/// Claim at 10:30 and lunch at 11:00, local time +08:00.
fn schedule() -> ScheduleConfig {
    let mut schedule = ScheduleConfig::default();
    schedule.triggers.recommend.enabled = false;
    schedule.triggers.dinner_reminder.enabled = false;
    schedule.triggers.expiry_reminder.enabled = false;
    schedule.triggers.claim = TriggerConfig::at("10:30");
    schedule.triggers.lunch_reminder = TriggerConfig::at("11:00");
    schedule
}

fn build_scheduler(h: &Harness) -> Scheduler {
    Scheduler::new(&schedule(), h.store.clone(), h.sweep.clone(), h.reminders.clone()).unwrap()
}

/// UTC instant for a local +08:00 wall-clock time on 2026-03-02.
fn local(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap() - chrono::TimeDelta::hours(8)
}

async fn join_all(spawned: Vec<(TriggerKind, tokio::task::JoinHandle<()>)>) -> Vec<TriggerKind> {
    let mut kinds = Vec::new();
    for (kind, handle) in spawned {
        handle.await.unwrap();
        kinds.push(kind);
    }
    kinds
}

#[tokio::test]
async fn test_claim_trigger_fires_once_per_day() {
    let provider = FakeProvider::default().with("tok", Behavior::Claims(vec![Benefit::named("Pie")]));
    let h = Harness::new(provider);
    h.member("alice").await;
    let account = h.bind("alice", "main", "tok").await;
    let scheduler = build_scheduler(&h);

    assert!(join_all(scheduler.tick_at(local(10, 29)).await.unwrap()).await.is_empty());
    assert_eq!(join_all(scheduler.tick_at(local(10, 30)).await.unwrap()).await, [TriggerKind::Claim]);
    assert!(join_all(scheduler.tick_at(local(10, 31)).await.unwrap()).await.is_empty());

    // A restart later the same day finds the ledger already marked.
    let restarted = build_scheduler(&h);
    assert!(join_all(restarted.tick_at(local(10, 45)).await.unwrap()).await.is_empty());

    assert_eq!(h.provider.claims(), 1);
    assert_eq!(h.account(&account.id).await.stats.success_count, 1);
    let day = NaiveDate::from_ymd_opt(2026, 3, 2);
    assert_eq!(h.store.last_fired(TriggerKind::Claim).await.unwrap(), day);
}

#[tokio::test]
async fn test_late_start_catches_up_claim_but_skips_stale_reminder() {
    let provider = FakeProvider::default().with("tok", Behavior::Owns(vec![Benefit::named("Nuggets")]));
    let h = Harness::new(provider);
    h.member("bob").await;
    h.bind("bob", "main", "tok").await;
    let scheduler = build_scheduler(&h);

    let fired = join_all(scheduler.tick_at(local(15, 0)).await.unwrap()).await;
    assert_eq!(fired, [TriggerKind::Claim]);
    // The lunch reminder was marked for the day without running.
    let day = NaiveDate::from_ymd_opt(2026, 3, 2);
    assert_eq!(h.store.last_fired(TriggerKind::LunchReminder).await.unwrap(), day);
    assert!(h.channel.bodies().iter().all(|b| !b.contains("ready to use")));
}

#[tokio::test]
async fn test_lunch_reminder_lists_owned_coupons() {
    let provider = FakeProvider::default().with("tok", Behavior::Owns(vec![Benefit::named("Nuggets")]));
    let h = Harness::new(provider);
    h.member("carol").await;
    h.bind("carol", "main", "tok").await;
    // Already claimed today.
    let day = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
    h.store.mark_fired(TriggerKind::Claim, day).await.unwrap();

    let fired = join_all(build_scheduler(&h).tick_at(local(11, 5)).await.unwrap()).await;
    assert_eq!(fired, [TriggerKind::LunchReminder]);
    let msgs = h.channel.sent_to("inbox-carol");
    assert_eq!(msgs.len(), 1);
    assert!(msgs[0].body.contains("Nuggets"));
}

#[tokio::test]
async fn test_reminders_respect_opt_out_and_paused_accounts() {
    let d = |day| NaiveDate::from_ymd_opt(2026, 3, day).unwrap();
    let owned = vec![Benefit::expiring("Pie", d(3)), Benefit::expiring("Cola", d(20))];
    let provider = FakeProvider::default()
        .with("tok-a", Behavior::Owns(owned.clone()))
        .with("tok-b", Behavior::Owns(owned))
        .with("tok-c", Behavior::Rejects);
    let h = Harness::new(provider);
    for id in ["a", "b", "c"] {
        h.member(id).await;
    }
    h.bind("a", "main", "tok-a").await;
    h.bind("b", "main", "tok-b").await;
    h.bind("c", "main", "tok-c").await;
    h.store.set_preferences("b", true, false).await.unwrap();
    // c gets paused by the claim run.
    h.sweep.run_scheduled().await.unwrap();

    let report = h.reminders.run(TriggerKind::ExpiryReminder, d(2)).await.unwrap();
    assert_eq!(report.users, 2);
    assert_eq!(report.notified, 1);
    assert_eq!(report.query_failures, 0);

    let msgs = h.channel.sent_to("inbox-a");
    let expiry = msgs.iter().find(|m| m.source == "expiry-reminder").unwrap();
    assert!(expiry.body.contains("Pie"));
    assert!(!expiry.body.contains("Cola"));
    assert!(h.channel.sent_to("inbox-b").iter().all(|m| m.source != "expiry-reminder"));
}

#[tokio::test]
async fn test_recommend_ranks_claimable() {
    let claimable = vec![Benefit::named("咖啡"), Benefit::named("免费薯条"), Benefit::named("半价派")];
    let h = Harness::new(FakeProvider::default().with("tok", Behavior::Claims(claimable)));
    h.member("dan").await;
    h.bind("dan", "main", "tok").await;

    let report = h.reminders.run(TriggerKind::Recommend, NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()).await.unwrap();
    assert_eq!(report.notified, 1);
    let body = &h.channel.sent_to("inbox-dan")[0].body;
    assert!(body.find("免费薯条").unwrap() < body.find("半价派").unwrap());
    // Recommendations never claim.
    assert_eq!(h.provider.claims(), 0);
}

#[tokio::test]
async fn test_scheduler_rejects_bad_trigger_time() {
    let h = Harness::new(FakeProvider::default());
    let mut bad = schedule();
    bad.triggers.claim = TriggerConfig::at("25:99");
    assert!(Scheduler::new(&bad, h.store.clone(), h.sweep.clone(), Arc::clone(&h.reminders)).is_err());
}
