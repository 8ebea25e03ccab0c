use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::db::models::{CharacterIdentity, SyncType};
use crate::engine::collector::{BatchReport, CollectOptions, RunCollector};

/// Runtime state for the sync scheduler, shared across tasks.
pub struct SchedulerState {
    running: AtomicBool,
    ingesting: AtomicBool,
    shutdown: CancellationToken,
    passes_run: AtomicU64,
    passes_skipped: AtomicU64,
    runs_added: AtomicU64,
    last_pass: Mutex<Option<PassSummary>>,
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerState {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            ingesting: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            passes_run: AtomicU64::new(0),
            passes_skipped: AtomicU64::new(0),
            runs_added: AtomicU64::new(0),
            last_pass: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn is_ingesting(&self) -> bool {
        self.ingesting.load(Ordering::Acquire)
    }

    /// Resolves once `stop` has been called.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::Relaxed);
        tracing::info!("Scheduler started");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        self.shutdown.cancel();
        tracing::info!("Scheduler stopped");
    }

    /// Claim the ingestion slot. `None` when a pass is already in flight.
    fn try_begin_pass(&self) -> Option<IngestGuard<'_>> {
        self.ingesting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| IngestGuard { flag: &self.ingesting })
    }

    fn record_pass(&self, sync_type: SyncType, report: &BatchReport) {
        self.passes_run.fetch_add(1, Ordering::Relaxed);
        self.runs_added
            .fetch_add(report.total_runs_added as u64, Ordering::Relaxed);
        let summary = PassSummary {
            finished_at: chrono::Utc::now().timestamp_millis(),
            sync_type,
            successful: report.successful,
            failed: report.failed,
            runs_added: report.total_runs_added,
            runs_skipped: report.total_runs_skipped,
            duration_ms: report.duration_ms,
        };
        if let Ok(mut last) = self.last_pass.lock() {
            *last = Some(summary);
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            running: self.is_running(),
            ingesting: self.is_ingesting(),
            passes_run: self.passes_run.load(Ordering::Relaxed),
            passes_skipped: self.passes_skipped.load(Ordering::Relaxed),
            runs_added: self.runs_added.load(Ordering::Relaxed),
            last_pass: self.last_pass.lock().ok().and_then(|l| l.clone()),
        }
    }
}

/// Releases the ingestion slot on drop, including on panic or early return.
struct IngestGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for IngestGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassSummary {
    pub finished_at: i64,
    pub sync_type: SyncType,
    pub successful: u32,
    pub failed: u32,
    pub runs_added: u32,
    pub runs_skipped: u32,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStats {
    pub running: bool,
    pub ingesting: bool,
    pub passes_run: u64,
    pub passes_skipped: u64,
    pub runs_added: u64,
    pub last_pass: Option<PassSummary>,
}

/// Run one collection pass over `roster` unless one is already running.
///
/// Returns `None` when the trigger was dropped by the re-entrancy guard.
pub async fn run_sync_pass(
    scheduler: &SchedulerState,
    collector: &RunCollector,
    roster: &[CharacterIdentity],
    sync_type: SyncType,
) -> Option<BatchReport> {
    let Some(_guard) = scheduler.try_begin_pass() else {
        scheduler.passes_skipped.fetch_add(1, Ordering::Relaxed);
        tracing::info!(sync_type = sync_type.as_str(), "Sync already in progress, trigger ignored");
        return None;
    };

    if roster.is_empty() {
        tracing::warn!("No characters configured, nothing to sync");
    }

    let options = CollectOptions {
        sync_type,
        ..Default::default()
    };
    let report = collector.collect_many(roster, &options).await;
    scheduler.record_pass(sync_type, &report);
    Some(report)
}

/// Manually requested pass (admin command). Shares the guard with the
/// scheduled loop.
pub async fn trigger_manual_sync(
    scheduler: Arc<SchedulerState>,
    collector: Arc<RunCollector>,
    roster: Arc<Vec<CharacterIdentity>>,
) -> Option<BatchReport> {
    run_sync_pass(&scheduler, &collector, &roster, SyncType::Manual).await
}
