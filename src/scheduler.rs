//! Periodic scheduler for collection cycles.
//!
//! Ticks on a configurable cadence and invokes the orchestrator. A tick
//! that lands while a cycle is still running is skipped, never queued.
//! Manual triggers bypass the cadence but still hit the orchestrator's
//! single-cycle guard.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::orchestrator::{CollectionOrchestrator, EnrichmentParams};

/// Default cadence between cycles.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

/// Scheduler configuration; updated atomically as a whole.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub interval: Duration,
    pub enabled: bool,
    pub params: EnrichmentParams,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            enabled: true,
            params: EnrichmentParams::default(),
        }
    }
}

/// Status snapshot for the control surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub enabled: bool,
    pub interval_secs: u64,
    pub ticks: u64,
    pub skipped_ticks: u64,
    pub last_tick: Option<DateTime<Utc>>,
}

/// The scheduler. `start` spawns one long-lived task; `stop` aborts it.
pub struct Scheduler {
    orchestrator: Arc<CollectionOrchestrator>,
    config: Arc<Mutex<ScheduleConfig>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    running: Arc<AtomicBool>,
    ticks: Arc<AtomicU64>,
    skipped_ticks: Arc<AtomicU64>,
    last_tick: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<CollectionOrchestrator>, config: ScheduleConfig) -> Self {
        Self {
            orchestrator,
            config: Arc::new(Mutex::new(config)),
            handle: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
            ticks: Arc::new(AtomicU64::new(0)),
            skipped_ticks: Arc::new(AtomicU64::new(0)),
            last_tick: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the periodic task. Starting an already-running scheduler is
    /// a no-op.
    pub fn start(&self) {
        let mut handle = self.handle.lock().expect("scheduler handle poisoned");
        if handle.is_some() {
            return;
        }

        self.running.store(true, Ordering::Release);
        let orchestrator = Arc::clone(&self.orchestrator);
        let config = Arc::clone(&self.config);
        let running = Arc::clone(&self.running);
        let ticks = Arc::clone(&self.ticks);
        let skipped_ticks = Arc::clone(&self.skipped_ticks);
        let last_tick = Arc::clone(&self.last_tick);

        *handle = Some(tokio::spawn(async move {
            info!("scheduler started");
            while running.load(Ordering::Acquire) {
                // Re-read each iteration so updates apply at the next tick.
                let (interval, enabled, params) = {
                    let config = config.lock().expect("scheduler config poisoned");
                    (config.interval, config.enabled, config.params.clone())
                };
                tokio::time::sleep(interval).await;
                if !running.load(Ordering::Acquire) {
                    break;
                }

                ticks.fetch_add(1, Ordering::Relaxed);
                *last_tick.lock().expect("last tick poisoned") = Some(Utc::now());

                if !enabled {
                    continue;
                }
                if orchestrator.cycle_in_progress() {
                    debug!("tick skipped: cycle still running");
                    skipped_ticks.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                let result = orchestrator.run_collection_cycle(&params).await;
                debug!(
                    cycle = %result.cycle_id,
                    items = result.total_items_processed,
                    "scheduled cycle finished"
                );
            }
            info!("scheduler stopped");
        }));
    }

    /// Stop the periodic task. In-flight cycles are not interrupted.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        let mut handle = self.handle.lock().expect("scheduler handle poisoned");
        if let Some(handle) = handle.take() {
            handle.abort();
        }
    }

    /// Replace the schedule configuration; applies from the next tick.
    pub fn update_schedule(&self, update: ScheduleConfig) {
        *self.config.lock().expect("scheduler config poisoned") = update;
    }

    pub fn status(&self) -> SchedulerStatus {
        let config = self.config.lock().expect("scheduler config poisoned");
        SchedulerStatus {
            running: self.running.load(Ordering::Acquire)
                && self.handle.lock().expect("scheduler handle poisoned").is_some(),
            enabled: config.enabled,
            interval_secs: config.interval.as_secs(),
            ticks: self.ticks.load(Ordering::Relaxed),
            skipped_ticks: self.skipped_ticks.load(Ordering::Relaxed),
            last_tick: *self.last_tick.lock().expect("last tick poisoned"),
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
