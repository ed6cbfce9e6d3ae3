//! Periodic incremental sync on an interval or a cron schedule.

use chrono::{Local, Utc};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cron::CronSchedule;
use crate::engine::{SyncEngine, SyncTarget};
use crate::state::SyncStatus;

/// Default time `stop` waits for the loop to finish.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// The incremental sync a scheduler runs each cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncrementalJob {
    pub target: SyncTarget,
    pub modified_column: String,
    pub soft_delete_column: Option<String>,
}

impl IncrementalJob {
    /// Create a job without soft-delete handling.
    pub fn new(target: SyncTarget, modified_column: impl Into<String>) -> Self {
        Self {
            target,
            modified_column: modified_column.into(),
            soft_delete_column: None,
        }
    }

    /// Remove rows flagged in `column` from the target.
    pub fn with_soft_delete_column(mut self, column: impl Into<String>) -> Self {
        self.soft_delete_column = Some(column.into());
        self
    }
}

/// When cycles run.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Run immediately, then again `interval` after each cycle ends.
    Interval(Duration),
    /// Run at each fire time, in local time.
    Cron(CronSchedule),
}

/// Lifecycle of a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopping,
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Worker slot plus the number of `stop` calls still waiting on old loops.
#[derive(Default)]
struct Lifecycle {
    worker: Option<Worker>,
    stopping: usize,
}

impl Lifecycle {
    fn state(&self) -> SchedulerState {
        match &self.worker {
            Some(worker) if !worker.handle.is_finished() => SchedulerState::Running,
            _ if self.stopping > 0 => SchedulerState::Stopping,
            _ => SchedulerState::Idle,
        }
    }
}

/// Everything the background loop needs.
struct CycleContext {
    engine: Arc<SyncEngine>,
    job: IncrementalJob,
    state_file: Option<PathBuf>,
}

/// Runs an [`IncrementalJob`] repeatedly on a background task.
///
/// Failed cycles are logged and recorded; the loop keeps going. `stop`
/// interrupts the wait between cycles but never a cycle in progress.
pub struct Scheduler {
    engine: Arc<SyncEngine>,
    job: IncrementalJob,
    trigger: Trigger,
    state_file: Option<PathBuf>,
    stop_timeout: Duration,
    lifecycle: Mutex<Lifecycle>,
}

impl Scheduler {
    /// Create an idle scheduler.
    pub fn new(engine: Arc<SyncEngine>, job: IncrementalJob, trigger: Trigger) -> Self {
        Self {
            engine,
            job,
            trigger,
            state_file: None,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    /// Persist watermarks to `path` after every successful cycle.
    pub fn with_state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_file = Some(path.into());
        self
    }

    /// Bound how long `stop` waits for the loop.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Current lifecycle state.
    ///
    /// A loop that exited on its own (a cron schedule that never fires)
    /// reads as `Idle`.
    pub fn state(&self) -> SchedulerState {
        self.lifecycle().state()
    }

    /// Whether the background loop is active.
    pub fn is_running(&self) -> bool {
        self.state() == SchedulerState::Running
    }

    fn lifecycle(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start the background loop. Does nothing if already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut lifecycle = self.lifecycle();
        if lifecycle.state() == SchedulerState::Running {
            debug!("Scheduler already running");
            return;
        }

        let context = CycleContext {
            engine: self.engine.clone(),
            job: self.job.clone(),
            state_file: self.state_file.clone(),
        };
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_loop(context, self.trigger.clone(), cancel.clone()));
        lifecycle.worker = Some(Worker { cancel, handle });

        match &self.trigger {
            Trigger::Interval(interval) => info!(
                "Scheduler started for '{}' every {:?}",
                self.job.target.table, interval
            ),
            Trigger::Cron(schedule) => info!(
                "Scheduler started for '{}' on '{}'",
                self.job.target.table, schedule
            ),
        }
    }

    /// Stop the loop and wait up to the stop timeout for it to finish.
    ///
    /// A cycle that overruns the timeout is left to finish on its own.
    pub async fn stop(&self) {
        let worker = {
            let mut lifecycle = self.lifecycle();
            let Some(worker) = lifecycle.worker.take() else {
                return;
            };
            lifecycle.stopping += 1;
            worker
        };
        worker.cancel.cancel();

        match tokio::time::timeout(self.stop_timeout, worker.handle).await {
            Ok(Ok(())) => info!("Scheduler stopped"),
            Ok(Err(e)) => error!("Scheduler task ended abnormally: {}", e),
            Err(_) => warn!(
                "Scheduler did not stop within {:?}; abandoning the running cycle",
                self.stop_timeout
            ),
        }

        // A `start` during the wait owns the slot now; leave it alone.
        self.lifecycle().stopping -= 1;
    }
}

async fn run_loop(context: CycleContext, trigger: Trigger, cancel: CancellationToken) {
    loop {
        if cancel.is_cancelled() {
            break;
        }

        match &trigger {
            Trigger::Interval(interval) => {
                run_cycle(&context).await;
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(*interval) => {}
                }
            }
            Trigger::Cron(schedule) => {
                let now = Local::now();
                let Some(next) = schedule.next_after(&now) else {
                    warn!("Cron schedule '{}' never fires; scheduler exiting", schedule);
                    break;
                };
                let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
                debug!("Next cycle at {} (in {:?})", next, wait);

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
                run_cycle(&context).await;
            }
        }
    }

    debug!("Scheduler loop exited");
}

async fn run_cycle(context: &CycleContext) {
    let job = &context.job;
    let engine = &context.engine;
    let start = Utc::now();

    let result = engine
        .incremental_sync(
            &job.target,
            &job.modified_column,
            job.soft_delete_column.as_deref(),
        )
        .await;
    let end = Utc::now();

    match result {
        Ok(r) => {
            engine
                .save_sync_status(
                    &job.target.table,
                    start,
                    end,
                    r.changed_count,
                    SyncStatus::Success,
                )
                .await;

            if let Some(path) = &context.state_file {
                if let Err(e) = engine.persist_sync_state_to(path).await {
                    error!("Failed to persist sync state: {}", e);
                }
            }
        }
        Err(e) => {
            error!("Scheduled sync of '{}' failed: {}", job.target.table, e);
            engine
                .save_sync_status(&job.target.table, start, end, 0, SyncStatus::Failed)
                .await;
        }
    }
}
