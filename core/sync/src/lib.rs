//! indexsync Sync Engine
//!
//! This module keeps a search collection consistent with a relational
//! table:
//! - Full rebuilds, optionally batched or retried with exponential backoff
//! - Incremental sync from a per-table watermark, with soft deletes
//! - Watermark and run-history tracking, persisted as JSON
//! - Pluggable row to document transforms
//! - A background scheduler driven by an interval or a cron expression

pub mod cron;
pub mod engine;
pub mod result;
pub mod retry;
pub mod scheduler;
pub mod state;
pub mod transform;

// Re-export main types
pub use cron::CronSchedule;
pub use engine::{SyncConfig, SyncEngine, SyncTarget, DEFAULT_STATE_FILE};
pub use result::{
    BatchSyncResult, FailedBatch, FullSyncResult, IncrementalSyncResult, RetrySyncResult,
};
pub use retry::{Attempted, RetryConfig, RetryExecutor};
pub use scheduler::{IncrementalJob, Scheduler, SchedulerState, Trigger, DEFAULT_STOP_TIMEOUT};
pub use state::{SyncStateStore, SyncStatus, SyncStatusEntry};
pub use transform::{FieldMapping, IdentityTransform, Transform};
