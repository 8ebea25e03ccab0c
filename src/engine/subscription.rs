//! Periodic background work.
//!
//! Each loop implements [`ReactiveSubscription`] and is spawned as its own
//! task by [`spawn_subscriptions`]. Loops exit when the scheduler is stopped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::db::models::{CharacterIdentity, SyncType};
use crate::engine::background::{run_sync_pass, SchedulerState};
use crate::engine::collector::RunCollector;

#[async_trait::async_trait]
pub trait ReactiveSubscription: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn interval(&self) -> Duration;

    /// Delay before the first tick.
    fn initial_delay(&self) -> Duration {
        Duration::ZERO
    }

    /// One cycle. Errors are logged internally; the loop continues regardless.
    async fn tick(&self);
}

// ---------------------------------------------------------------------------
// Run sync
// ---------------------------------------------------------------------------

/// Collects the configured roster on a fixed interval.
pub struct SyncSubscription {
    pub scheduler: Arc<SchedulerState>,
    pub collector: Arc<RunCollector>,
    pub roster: Arc<Vec<CharacterIdentity>>,
    pub interval: Duration,
    pub initial_delay: Duration,
    started: AtomicBool,
}

impl SyncSubscription {
    pub fn new(
        scheduler: Arc<SchedulerState>,
        collector: Arc<RunCollector>,
        roster: Arc<Vec<CharacterIdentity>>,
        interval: Duration,
        initial_delay: Duration,
    ) -> Self {
        Self {
            scheduler,
            collector,
            roster,
            interval,
            initial_delay,
            started: AtomicBool::new(false),
        }
    }
}

#[async_trait::async_trait]
impl ReactiveSubscription for SyncSubscription {
    fn name(&self) -> &'static str {
        "run_sync"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    async fn tick(&self) {
        let sync_type = if self.started.swap(true, Ordering::Relaxed) {
            SyncType::Auto
        } else {
            SyncType::Startup
        };
        run_sync_pass(&self.scheduler, &self.collector, &self.roster, sync_type).await;
    }
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

async fn run_single(sub: Box<dyn ReactiveSubscription>, scheduler: Arc<SchedulerState>) {
    let name = sub.name();
    let shutdown = scheduler.shutdown_token();

    let delay = sub.initial_delay();
    if !delay.is_zero() {
        tracing::debug!(subscription = name, delay_secs = ?delay.as_secs(), "Delaying initial poll");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.cancelled() => {
                tracing::info!(subscription = name, "Subscription loop exited");
                return;
            }
        }
    }

    let mut interval = tokio::time::interval(sub.interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.cancelled() => break,
        }
        if !scheduler.is_running() {
            break;
        }
        sub.tick().await;
    }
    tracing::info!(subscription = name, "Subscription loop exited");
}

/// Spawn every subscription as its own task and mark the scheduler running.
pub fn spawn_subscriptions(
    subscriptions: Vec<Box<dyn ReactiveSubscription>>,
    scheduler: Arc<SchedulerState>,
) -> Vec<JoinHandle<()>> {
    scheduler.start();
    subscriptions
        .into_iter()
        .map(|sub| {
            tracing::info!(
                subscription = sub.name(),
                interval_secs = sub.interval().as_secs(),
                "Spawning subscription"
            );
            tokio::spawn(run_single(sub, scheduler.clone()))
        })
        .collect()
}
