mod common;

use common::{Behavior, FakeProvider, Harness};
use couponclaw_core::traits::AccountStore;
use couponclaw_core::types::{AccountState, Benefit, ClaimOutcome, ClaimOutcomeKind, NewUser};
use couponclaw_scheduler::{AdminSweep, SweepError};
use couponclaw_security::CredentialCipher;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_success_end_to_end() {
    let provider = FakeProvider::default().with(
        "tok-alice",
        Behavior::Claims(vec![Benefit::named("Fries"), Benefit::named("McFlurry")]),
    );
    let h = Harness::new(provider);
    h.owner().await;
    h.member("alice").await;
    let account = h.bind("alice", "main", "tok-alice").await;

    let summary = h.sweep.run_scheduled().await.unwrap();
    assert_eq!(summary.total, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.benefits_claimed, 2);

    let account = h.account(&account.id).await;
    assert_eq!(account.state, AccountState::Active);
    assert!(account.autoclaim);
    assert_eq!(account.stats.success_count, 2);
    assert!(account.stats.last_claim_at.is_some());

    let report = h.channel.sent_to("inbox-alice");
    assert_eq!(report.len(), 1);
    assert!(report[0].body.contains("claimed 2 coupon(s)"));
    // Owner has no preferences and falls back to the channel default.
    let owner_msgs = h.channel.sent_to("owner-inbox");
    assert_eq!(owner_msgs.len(), 1);
    assert!(owner_msgs[0].title.contains("summary"));
}

#[tokio::test]
async fn test_auth_failure_end_to_end() {
    let h = Harness::new(FakeProvider::default().with("tok-bob", Behavior::Rejects));
    h.member("bob").await;
    let account = h.bind("bob", "main", "tok-bob").await;

    let summary = h.sweep.run_scheduled().await.unwrap();
    assert_eq!(summary.invalid, 1);
    assert_eq!(summary.paused, 1);

    let account = h.account(&account.id).await;
    assert_eq!(account.state, AccountState::Paused);
    assert!(!account.autoclaim);
    assert_eq!(account.stats.failure_count, 1);
    // Rejected at the probe, never asked to claim.
    assert_eq!(h.provider.claims(), 0);

    let bodies = h.channel.bodies();
    assert!(bodies.iter().any(|b| b.contains("token invalid, please resend")));

    // Paused accounts are left alone on the next run.
    let again = h.sweep.run_scheduled().await.unwrap();
    assert_eq!(again.total, 0);
    assert_eq!(h.provider.list_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_member_without_preferences_gets_notice_by_user_id() {
    let h = Harness::new(FakeProvider::default().with("tok", Behavior::Rejects));
    h.store.upsert_user(&NewUser::member("12345", "hana")).await.unwrap();
    h.bind("12345", "main", "tok").await;

    let summary = h.sweep.run_scheduled().await.unwrap();
    assert_eq!(summary.paused, 1);
    let msgs = h.channel.sent_to("12345");
    assert_eq!(msgs.len(), 1);
    assert!(msgs[0].body.contains("token invalid, please resend"));
}

#[tokio::test]
async fn test_one_account_failure_does_not_abort_sweep() {
    let provider = FakeProvider::default()
        .with("good", Behavior::Claims(vec![Benefit::named("Pie")]))
        .with("down", Behavior::Unreachable)
        .with("bad", Behavior::Rejects);
    let h = Harness::new(provider);
    for id in ["a", "b", "c"] {
        h.member(id).await;
    }
    let good = h.bind("a", "main", "good").await;
    let down = h.bind("b", "main", "down").await;
    h.bind("c", "main", "bad").await;

    let summary = h.sweep.run_scheduled().await.unwrap();
    assert_eq!(summary.total, 3);
    assert_eq!((summary.succeeded, summary.transient, summary.invalid), (1, 1, 1));

    assert_eq!(h.account(&good.id).await.stats.success_count, 1);
    // Transient failures keep the account eligible for the next run.
    let down = h.account(&down.id).await;
    assert!(down.is_eligible());
    assert!(down.stats.last_error.unwrap().contains("503"));
    // Not pushed to the user unless requested.
    assert!(h.channel.sent_to("inbox-b").is_empty());
}

#[tokio::test]
async fn test_unreadable_credential_pauses_with_distinct_notice() {
    let h = Harness::new(FakeProvider::default());
    h.member("carol").await;
    let foreign = CredentialCipher::from_secret(Some("another-secret")).encrypt("tok").unwrap();
    let account = h.store.bind_credential("carol", "main", foreign).await.unwrap();

    let summary = h.sweep.run_scheduled().await.unwrap();
    assert_eq!(summary.unreadable, 1);
    assert_eq!(h.account(&account.id).await.state, AccountState::Paused);
    assert_eq!(h.provider.list_calls.load(std::sync::atomic::Ordering::SeqCst), 0);

    let msgs = h.channel.sent_to("inbox-carol");
    assert_eq!(msgs.len(), 1);
    assert!(msgs[0].body.contains("stored token unreadable"));
}

#[tokio::test]
async fn test_rebind_reactivates_paused_account() {
    let h = Harness::new(FakeProvider::default().with("old", Behavior::Rejects));
    h.member("dan").await;
    let account = h.bind("dan", "main", "old").await;
    h.sweep.run_scheduled().await.unwrap();
    assert!(!h.account(&account.id).await.is_eligible());

    h.provider.set("new", Behavior::Claims(vec![Benefit::named("Cola")]));
    let rebound = h.bind("dan", "main", "new").await;
    assert_eq!(rebound.id, account.id);
    assert!(rebound.is_eligible());

    let summary = h.sweep.run_scheduled().await.unwrap();
    assert_eq!(summary.succeeded, 1);
}

#[tokio::test]
async fn test_rebind_during_rejected_claim_stays_active() {
    let h = Harness::new(FakeProvider::default().with("old", Behavior::Rejects));
    *h.provider.delay.lock().unwrap() = Duration::from_millis(150);
    h.member("dan").await;
    let account = h.bind("dan", "main", "old").await;

    let executor = h.executor.clone();
    let in_flight = account.clone();
    let claim = tokio::spawn(async move { executor.run_claim(&in_flight).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    h.provider.set("new", Behavior::Claims(vec![Benefit::named("Cola")]));
    let rebound = h.bind("dan", "main", "new").await;
    let record = claim.await.unwrap().unwrap().unwrap();
    assert_eq!(record.outcome.kind, ClaimOutcomeKind::InvalidCredential);

    // The rebind landed after the stale rejection was recorded.
    assert!(rebound.is_eligible());
    let account = h.account(&account.id).await;
    assert_eq!(account.state, AccountState::Active);
    assert!(account.autoclaim);
    assert_eq!(h.cipher.decrypt(&account.credential).unwrap().expose(), "new");
}

#[tokio::test]
async fn test_concurrent_auth_failures_pause_exactly_once() {
    let h = Harness::new(FakeProvider::default().with("tok", Behavior::Rejects));
    *h.provider.delay.lock().unwrap() = Duration::from_millis(30);
    h.member("erin").await;
    let account = h.bind("erin", "main", "tok").await;

    let (a, b) = tokio::join!(h.executor.run_claim(&account), h.executor.run_claim(&account));
    let records: Vec<_> = [a.unwrap(), b.unwrap()].into_iter().flatten().collect();
    // The second claim waits for the lock, then finds the account paused.
    assert_eq!(records.len(), 1);
    assert!(records[0].effect.paused);

    // Recording the same failure twice at the store level pauses once too.
    h.bind("erin", "main", "tok").await;
    let fresh = h.account(&account.id).await;
    let outcome = ClaimOutcome::new(&fresh, ClaimOutcomeKind::InvalidCredential);
    let (x, y) = tokio::join!(h.store.record_claim_outcome(&outcome), h.store.record_claim_outcome(&outcome));
    let paused = [x.unwrap(), y.unwrap()].iter().filter(|e| e.paused).count();
    assert_eq!(paused, 1);
}

#[tokio::test]
async fn test_admin_sweep_requires_owner() {
    let h = Harness::new(FakeProvider::default());
    let member = h.member("frank").await;
    let admin = AdminSweep::new(h.sweep.clone());

    assert!(matches!(admin.run_full_sweep(&member).await, Err(SweepError::Forbidden(_))));
}

#[tokio::test]
async fn test_admin_sweep_busy_while_guard_held() {
    let provider = FakeProvider::default().with("tok", Behavior::Claims(vec![Benefit::named("Pie")]));
    let h = Harness::new(provider);
    let owner = h.owner().await;
    h.bind("owner", "main", "tok").await;
    let admin = AdminSweep::new(h.sweep.clone());

    {
        let _held = h.sweep.guard().acquire().await.unwrap();
        assert!(matches!(admin.run_full_sweep(&owner).await, Err(SweepError::Busy)));
    }
    assert_eq!(h.provider.claims(), 0);

    let summary = admin.run_full_sweep(&owner).await.unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(h.provider.claims(), 1);
}

#[tokio::test]
async fn test_scheduled_sweep_waits_for_admin_sweep() {
    let provider = FakeProvider::default().with("tok", Behavior::Claims(vec![Benefit::named("Pie")]));
    let h = Harness::new(provider);
    h.store.upsert_user(&NewUser::member("gina", "gina")).await.unwrap();
    h.bind("gina", "main", "tok").await;

    let held = h.sweep.guard().acquire().await.unwrap();
    let sweep = h.sweep.clone();
    let scheduled = tokio::spawn(async move { sweep.run_scheduled().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!scheduled.is_finished());
    assert_eq!(h.provider.claims(), 0);

    drop(held);
    let summary = scheduled.await.unwrap().unwrap();
    assert_eq!(summary.succeeded, 1);
}

#[tokio::test]
async fn test_admin_sweep_busy_while_another_process_sweeps() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("couponclaw.db");
    let provider = Arc::new(FakeProvider::default().with("tok", Behavior::Claims(vec![Benefit::named("Pie")])));
    *provider.delay.lock().unwrap() = Duration::from_millis(150);
    let daemon = Harness::on_disk(&path, provider.clone());
    let cli = Harness::on_disk(&path, provider.clone());
    let owner = daemon.owner().await;
    daemon.bind("owner", "main", "tok").await;

    let sweep = daemon.sweep.clone();
    let scheduled = tokio::spawn(async move { sweep.run_scheduled().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let admin = AdminSweep::new(cli.sweep.clone());
    assert!(matches!(admin.run_full_sweep(&owner).await, Err(SweepError::Busy)));
    assert_eq!(scheduled.await.unwrap().unwrap().succeeded, 1);
    assert_eq!(provider.claims(), 1);

    // Released with the daemon's sweep.
    assert_eq!(admin.run_full_sweep(&owner).await.unwrap().succeeded, 1);
    assert_eq!(provider.claims(), 2);
}

#[tokio::test]
async fn test_scheduled_sweep_waits_for_other_process_lease() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("couponclaw.db");
    let provider = Arc::new(FakeProvider::default().with("tok", Behavior::Claims(vec![Benefit::named("Pie")])));
    let daemon = Harness::on_disk(&path, provider.clone());
    let cli = Harness::on_disk(&path, provider.clone());
    daemon.member("ivy").await;
    daemon.bind("ivy", "main", "tok").await;

    let held = cli.sweep.guard().acquire().await.unwrap();
    let sweep = daemon.sweep.clone();
    let scheduled = tokio::spawn(async move { sweep.run_scheduled().await });
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!scheduled.is_finished());
    assert_eq!(provider.claims(), 0);

    drop(held);
    let summary = scheduled.await.unwrap().unwrap();
    assert_eq!(summary.succeeded, 1);
}
