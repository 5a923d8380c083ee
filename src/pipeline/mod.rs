//! Pipeline supervision.
//!
//! Each pipeline owns a supervisor holding a small state machine with a
//! compare-and-set transition into `running`: at most one run per
//! pipeline exists at any time, no lock held across I/O. A crashed or
//! cancelled task must still move the supervisor out of `running`, so
//! completion is idempotent and stale runs can be force-failed on
//! restart recovery.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clock::{new_prefixed_id, SharedClock};

/// Logical pipelines. Discovery fronts the web-search adapter; there is
/// exactly one supervisor per name, so a second trigger of any name
/// reports `already_running` instead of queueing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineName {
    News,
    Academic,
    AcademicArxiv,
    AcademicPubmed,
    Discovery,
    Enrichment,
}

impl PipelineName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::News => "news",
            Self::Academic => "academic",
            Self::AcademicArxiv => "academic_arxiv",
            Self::AcademicPubmed => "academic_pubmed",
            Self::Discovery => "discovery",
            Self::Enrichment => "enrichment",
        }
    }

    pub fn all() -> [PipelineName; 6] {
        [
            Self::News,
            Self::Academic,
            Self::AcademicArxiv,
            Self::AcademicPubmed,
            Self::Discovery,
            Self::Enrichment,
        ]
    }
}

impl std::fmt::Display for PipelineName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
    Skipped,
}

/// Aggregated metrics attached to a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub batch_size: usize,
    pub success_rate: f64,
    pub processing_time_ms: u64,
}

/// Per-invocation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub pipeline_name: PipelineName,
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub items_processed: usize,
    pub items_failed: usize,
    pub duplicates_removed: usize,
    pub error: Option<String>,
    pub metrics: RunMetrics,
}

/// Counters a pipeline hands back on completion.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunCounters {
    pub items_processed: usize,
    pub items_failed: usize,
    pub duplicates_removed: usize,
    pub batch_size: usize,
}

/// How a run ended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Succeeded,
    Failed(String),
    Skipped(String),
}

/// Result of a start attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Accepted { run_id: String },
    AlreadyRunning,
}

const STATE_IDLE: u8 = 0;
const STATE_STARTING: u8 = 1;
const STATE_RUNNING: u8 = 2;

/// Supervisor for one pipeline.
pub struct Supervisor {
    name: PipelineName,
    clock: SharedClock,
    state: AtomicU8,
    cancelled: AtomicBool,
    current: Mutex<Option<PipelineRun>>,
    last_run: Mutex<Option<PipelineRun>>,
    items_total: AtomicU64,
    error_count: AtomicU64,
}

/// Status snapshot for control surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorStatus {
    pub pipeline_name: PipelineName,
    pub state: String,
    pub last_run: Option<PipelineRun>,
    pub items_processed: u64,
    pub error_count: u64,
}

impl Supervisor {
    pub fn new(name: PipelineName, clock: SharedClock) -> Self {
        Self {
            name,
            clock,
            state: AtomicU8::new(STATE_IDLE),
            cancelled: AtomicBool::new(false),
            current: Mutex::new(None),
            last_run: Mutex::new(None),
            items_total: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> PipelineName {
        self.name
    }

    /// Try to start a run. A compare-and-set on the state admits exactly
    /// one caller; everyone else observes `AlreadyRunning`.
    pub fn start(&self) -> StartOutcome {
        if self
            .state
            .compare_exchange(STATE_IDLE, STATE_STARTING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return StartOutcome::AlreadyRunning;
        }

        self.cancelled.store(false, Ordering::Release);
        let run = PipelineRun {
            pipeline_name: self.name,
            run_id: new_prefixed_id("run"),
            started_at: self.clock.now(),
            ended_at: None,
            status: RunStatus::Running,
            items_processed: 0,
            items_failed: 0,
            duplicates_removed: 0,
            error: None,
            metrics: RunMetrics::default(),
        };
        let run_id = run.run_id.clone();
        *self.current.lock().expect("current run poisoned") = Some(run);
        self.state.store(STATE_RUNNING, Ordering::Release);
        info!(pipeline = self.name.as_str(), run_id = %run_id, "pipeline run started");
        StartOutcome::Accepted { run_id }
    }

    /// Finish the current run. Idempotent: completing an already-idle
    /// supervisor is a no-op returning `false`, so a crashed task's
    /// cleanup path and the normal path can both call it safely.
    pub fn complete(&self, outcome: RunOutcome, counters: RunCounters) -> bool {
        if self
            .state
            .compare_exchange(STATE_RUNNING, STATE_STARTING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let now = self.clock.now();
        let mut current = self.current.lock().expect("current run poisoned");
        if let Some(mut run) = current.take() {
            run.ended_at = Some(now);
            run.items_processed = counters.items_processed;
            run.items_failed = counters.items_failed;
            run.duplicates_removed = counters.duplicates_removed;
            let elapsed = (now - run.started_at).num_milliseconds().max(0) as u64;
            let attempted = counters.items_processed + counters.items_failed;
            run.metrics = RunMetrics {
                batch_size: counters.batch_size,
                success_rate: if attempted == 0 {
                    1.0
                } else {
                    counters.items_processed as f64 / attempted as f64
                },
                processing_time_ms: elapsed,
            };
            match outcome {
                RunOutcome::Succeeded => run.status = RunStatus::Succeeded,
                RunOutcome::Failed(error) => {
                    run.status = RunStatus::Failed;
                    run.error = Some(error);
                    self.error_count.fetch_add(1, Ordering::Relaxed);
                }
                RunOutcome::Skipped(reason) => {
                    run.status = RunStatus::Skipped;
                    run.error = Some(reason);
                }
            }
            self.items_total
                .fetch_add(counters.items_processed as u64, Ordering::Relaxed);
            info!(
                pipeline = self.name.as_str(),
                run_id = %run.run_id,
                status = ?run.status,
                items = counters.items_processed,
                "pipeline run completed"
            );
            *self.last_run.lock().expect("last run poisoned") = Some(run);
        }
        drop(current);

        self.state.store(STATE_IDLE, Ordering::Release);
        true
    }

    /// Signal cancellation to the running task. The task observes the
    /// flag at its next checkpoint and completes with `cancelled`.
    pub fn cancel(&self) {
        if self.state.load(Ordering::Acquire) == STATE_RUNNING {
            self.cancelled.store(true, Ordering::Release);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) != STATE_IDLE
    }

    /// Force-fail a run that has been `running` longer than `threshold`.
    /// Used by restart recovery after a crash.
    pub fn recover_stale(&self, threshold: Duration) -> bool {
        let started_at = {
            let current = self.current.lock().expect("current run poisoned");
            current.as_ref().map(|run| run.started_at)
        };
        match started_at {
            Some(started_at) if self.clock.now() - started_at > threshold => {
                warn!(pipeline = self.name.as_str(), "recovering stale run");
                self.complete(
                    RunOutcome::Failed("recovered: run exceeded stale threshold".to_string()),
                    RunCounters::default(),
                )
            }
            _ => false,
        }
    }

    pub fn status(&self) -> SupervisorStatus {
        let state = match self.state.load(Ordering::Acquire) {
            STATE_RUNNING => "running",
            STATE_STARTING => "starting",
            _ => "idle",
        };
        SupervisorStatus {
            pipeline_name: self.name,
            state: state.to_string(),
            last_run: self.last_run.lock().expect("last run poisoned").clone(),
            items_processed: self.items_total.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
        }
    }
}

/// One supervisor per logical pipeline.
pub struct SupervisorRegistry {
    supervisors: HashMap<PipelineName, Arc<Supervisor>>,
}

impl SupervisorRegistry {
    pub fn new(clock: SharedClock) -> Self {
        let supervisors = PipelineName::all()
            .into_iter()
            .map(|name| (name, Arc::new(Supervisor::new(name, clock.clone()))))
            .collect();
        Self { supervisors }
    }

    pub fn get(&self, name: PipelineName) -> Arc<Supervisor> {
        Arc::clone(
            self.supervisors
                .get(&name)
                .expect("registry holds every pipeline"),
        )
    }

    pub fn status_all(&self) -> Vec<SupervisorStatus> {
        let mut statuses: Vec<SupervisorStatus> = self
            .supervisors
            .values()
            .map(|supervisor| supervisor.status())
            .collect();
        statuses.sort_by_key(|s| s.pipeline_name.as_str());
        statuses
    }

    /// Cancel every running pipeline.
    pub fn cancel_all(&self) {
        for supervisor in self.supervisors.values() {
            supervisor.cancel();
        }
    }

    /// Restart recovery: force-fail any run older than `threshold`.
    pub fn recover_stale_runs(&self, threshold: Duration) -> usize {
        self.supervisors
            .values()
            .filter(|supervisor| supervisor.recover_stale(threshold))
            .count()
    }
}
