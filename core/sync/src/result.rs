//! Result types returned by sync operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of a full rebuild.
///
/// `success` reflects the absence of an error, not count equality; a
/// caller wanting a consistency check compares the two counts itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullSyncResult {
    pub success: bool,
    /// Rows extracted from the source.
    pub source_count: u64,
    /// Documents in the target collection after the write settled.
    pub target_count: u64,
}

impl FullSyncResult {
    /// Whether source and target agree on the number of records.
    pub fn counts_match(&self) -> bool {
        self.source_count == self.target_count
    }
}

/// Result of an incremental pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncrementalSyncResult {
    pub success: bool,
    /// Rows matched by the modified-since predicate.
    pub changed_count: u64,
    /// Soft-deleted rows removed from the target.
    pub deleted_count: u64,
    /// Watermark stored after the pass.
    pub watermark: DateTime<Utc>,
}

/// Result of a full rebuild run under the retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySyncResult {
    pub success: bool,
    /// Failed attempts: before the success, or in total on failure.
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_count: Option<u64>,
    /// Text of the last error when every attempt failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Target collection name.
    pub collection: String,
    /// When the final failure was observed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A batch that could not be written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedBatch {
    /// 1-based position of the batch in the pass.
    pub batch_number: usize,
    pub error: String,
    /// Documents in the batch.
    pub record_count: usize,
}

/// Result of a batched full rebuild.
///
/// `successful_records + sum(failed_batch_info.record_count) == total_records`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSyncResult {
    pub success: bool,
    pub total_records: usize,
    pub successful_records: usize,
    pub failed_batches: usize,
    pub failed_batch_info: Vec<FailedBatch>,
}
