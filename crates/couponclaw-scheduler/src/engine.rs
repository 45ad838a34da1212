//! Scheduler engine: the tick loop that fires the daily triggers.
//! Uses tokio::interval; each tick only decides and spawns, it never awaits
//! claim or notification work.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeDelta, Utc};
use couponclaw_core::config::ScheduleConfig;
use couponclaw_core::error::Result;
use couponclaw_core::traits::FireLedger;
use couponclaw_core::types::TriggerKind;
use tokio::task::JoinHandle;

use crate::reminders::ReminderRunner;
use crate::sweep::ClaimSweep;
use crate::triggers::{self, Decision};

pub struct Scheduler {
    offset: FixedOffset,
    tick: Duration,
    late_grace: TimeDelta,
    /// Enabled triggers with their parsed local times.
    triggers: Vec<(TriggerKind, NaiveTime)>,
    ledger: Arc<dyn FireLedger>,
    claims: Arc<ClaimSweep>,
    reminders: Arc<ReminderRunner>,
}

impl Scheduler {
    /// Fails on an unparsable offset or trigger time.
    pub fn new(
        schedule: &ScheduleConfig,
        ledger: Arc<dyn FireLedger>,
        claims: Arc<ClaimSweep>,
        reminders: Arc<ReminderRunner>,
    ) -> Result<Self> {
        let mut triggers = Vec::new();
        for kind in TriggerKind::ALL {
            let trigger = schedule.trigger(kind);
            if trigger.enabled {
                triggers.push((kind, trigger.time()?));
            }
        }
        Ok(Self {
            offset: schedule.offset()?,
            tick: Duration::from_secs(schedule.tick_secs.max(1)),
            late_grace: TimeDelta::minutes(i64::from(schedule.late_grace_mins)),
            triggers,
            ledger,
            claims,
            reminders,
        })
    }

    pub fn enabled_triggers(&self) -> impl Iterator<Item = TriggerKind> + '_ {
        self.triggers.iter().map(|(kind, _)| *kind)
    }

    /// Evaluate every enabled trigger at `now` and spawn the due actions.
    ///
    /// The ledger is marked before anything is spawned; an action only runs
    /// when this tick won the `mark_fired` race for today's date.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<Vec<(TriggerKind, JoinHandle<()>)>> {
        let local = now.with_timezone(&self.offset).naive_local();
        let today = local.date();
        let mut spawned = Vec::new();

        for &(kind, at) in &self.triggers {
            let last = self.ledger.last_fired(kind).await?;
            let decision = triggers::evaluate(kind, at, local, last, self.late_grace);
            if !decision.marks_ledger() {
                continue;
            }
            if !self.ledger.mark_fired(kind, today).await? {
                tracing::debug!("Trigger {kind} already fired for {today}");
                continue;
            }
            if decision == Decision::Skip {
                tracing::info!("⏭️ Trigger {kind} missed its window at {at}, skipped for {today}");
                continue;
            }

            tracing::info!("🔔 Trigger fired: {kind} ({today})");
            spawned.push((kind, self.spawn_action(kind, today)));
        }
        Ok(spawned)
    }

    fn spawn_action(&self, kind: TriggerKind, today: NaiveDate) -> JoinHandle<()> {
        match kind {
            TriggerKind::Claim => {
                let claims = self.claims.clone();
                tokio::spawn(async move {
                    if let Err(e) = claims.run_scheduled().await {
                        tracing::error!("❌ Scheduled claim sweep failed: {e}");
                    }
                })
            }
            _ => {
                let reminders = self.reminders.clone();
                tokio::spawn(async move {
                    if let Err(e) = reminders.run(kind, today).await {
                        tracing::error!("❌ Trigger {kind} failed: {e}");
                    }
                })
            }
        }
    }

    /// Run the tick loop forever on a background task.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                "⏰ Scheduler started (tick: {}s, offset: {}, {} trigger(s))",
                self.tick.as_secs(),
                self.offset,
                self.triggers.len()
            );
            let mut interval = tokio::time::interval(self.tick);
            loop {
                interval.tick().await;
                if let Err(e) = self.tick_at(Utc::now()).await {
                    tracing::warn!("⚠️ Scheduler tick failed: {e}");
                }
            }
        })
    }
}
