//! Core sync engine that orchestrates extract, transform and load.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use indexsync_common::{validate_identifier, Document, DocumentId, Error, Result};
use indexsync_source::{Predicate, SourceExtractor};
use indexsync_store::{DocumentStore, TaskHandle};

use crate::result::{
    BatchSyncResult, FailedBatch, FullSyncResult, IncrementalSyncResult, RetrySyncResult,
};
use crate::retry::{RetryConfig, RetryExecutor};
use crate::state::{SyncStateStore, SyncStatus, SyncStatusEntry};
use crate::transform::{IdentityTransform, Transform};

/// Default location of the persisted watermark file.
pub const DEFAULT_STATE_FILE: &str = "sync_state.json";

/// Configuration for the sync engine.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SyncConfig {
    /// Retry policy for `full_sync_with_retry`. Its `max_retries` is
    /// overridden per call.
    pub retry: RetryConfig,
    /// How long to wait for each store task; `None` waits forever.
    pub task_timeout: Option<Duration>,
    /// Where `persist_sync_state` and `load_sync_state` keep watermarks.
    pub state_file: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            task_timeout: Some(Duration::from_secs(300)),
            state_file: PathBuf::from(DEFAULT_STATE_FILE),
        }
    }
}

/// What a sync operation reads from and writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTarget {
    /// Source table.
    pub table: String,
    /// Field identifying a document in the target.
    pub primary_key: String,
    /// Target collection.
    pub collection: String,
}

impl SyncTarget {
    /// Target a collection named after the table.
    pub fn new(table: impl Into<String>, primary_key: impl Into<String>) -> Self {
        let table = table.into();
        Self {
            collection: table.clone(),
            table,
            primary_key: primary_key.into(),
        }
    }

    /// Write into `collection` instead of the table-named one.
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    /// Check every name before it reaches a query or a URL.
    ///
    /// # Errors
    /// - `InvalidInput` for malformed names
    pub fn validate(&self) -> Result<()> {
        validate_identifier(&self.table)?;
        validate_identifier(&self.primary_key)?;
        validate_identifier(&self.collection)
    }
}

/// Main sync engine.
///
/// Holds the extractor, the document store, the transform and the
/// watermark/history state. Operations run on the caller's task; the state
/// lock is never held across I/O.
pub struct SyncEngine {
    /// Source of rows.
    source: Arc<dyn SourceExtractor>,
    /// Target of documents.
    store: Arc<dyn DocumentStore>,
    /// Row to document mapping.
    transform: Arc<dyn Transform>,
    /// Watermarks and run history.
    state: Arc<RwLock<SyncStateStore>>,
    /// Configuration.
    config: SyncConfig,
}

impl SyncEngine {
    /// Create a new sync engine with the identity transform.
    pub fn new(
        source: Arc<dyn SourceExtractor>,
        store: Arc<dyn DocumentStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            source,
            store,
            transform: Arc::new(IdentityTransform),
            state: Arc::new(RwLock::new(SyncStateStore::new())),
            config,
        }
    }

    /// Replace the row to document mapping.
    pub fn with_transform(mut self, transform: Arc<dyn Transform>) -> Self {
        self.transform = transform;
        self
    }

    /// Get the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Get a reference to the sync state.
    pub fn state(&self) -> Arc<RwLock<SyncStateStore>> {
        self.state.clone()
    }

    /// Get the document store.
    pub fn store(&self) -> Arc<dyn DocumentStore> {
        self.store.clone()
    }

    /// Rebuild a collection from the whole source table.
    ///
    /// # Postconditions
    /// - Every extracted row was written in one task that succeeded
    /// - `target_count` is read after that task settled
    ///
    /// # Errors
    /// - Any extraction, recreate or write error, unchanged
    pub async fn full_sync(
        &self,
        target: &SyncTarget,
        recreate_index: bool,
    ) -> Result<FullSyncResult> {
        info!("Starting full sync: {} -> {}", target.table, target.collection);

        let result = self.run_full_sync(target, recreate_index).await;
        match &result {
            Ok(r) => {
                info!(
                    "Full sync of '{}' completed: {} source rows, {} target documents",
                    target.table, r.source_count, r.target_count
                );
                if !r.counts_match() {
                    warn!(
                        "Count mismatch for '{}': source {} vs target {}",
                        target.table, r.source_count, r.target_count
                    );
                }
            }
            Err(e) => error!("Full sync of '{}' failed: {}", target.table, e),
        }
        result
    }

    async fn run_full_sync(
        &self,
        target: &SyncTarget,
        recreate_index: bool,
    ) -> Result<FullSyncResult> {
        target.validate()?;
        self.prepare_collection(target, recreate_index).await?;

        let documents = self.extract_documents(target, &Predicate::All).await?;
        if documents.is_empty() {
            debug!("No rows in '{}', nothing to write", target.table);
        } else {
            let task = self.store.write(&target.collection, &documents).await?;
            self.wait(task).await?;
        }

        Ok(FullSyncResult {
            success: true,
            source_count: documents.len() as u64,
            target_count: self.target_count(&target.collection).await?,
        })
    }

    /// Apply rows changed since the table's watermark, then advance it.
    ///
    /// With a soft-delete column, flagged rows among the changed set are
    /// removed from the target instead of upserted.
    ///
    /// # Postconditions
    /// - The watermark is `max(previous, start of this call)`, even when
    ///   nothing changed
    ///
    /// # Errors
    /// - Any extraction or write error, unchanged; the watermark is not
    ///   advanced in that case
    pub async fn incremental_sync(
        &self,
        target: &SyncTarget,
        modified_column: &str,
        soft_delete_column: Option<&str>,
    ) -> Result<IncrementalSyncResult> {
        info!(
            "Starting incremental sync: {} -> {}",
            target.table, target.collection
        );

        let result = self
            .run_incremental_sync(target, modified_column, soft_delete_column)
            .await;
        match &result {
            Ok(r) => info!(
                "Incremental sync of '{}' completed: {} changed, {} deleted, watermark {}",
                target.table, r.changed_count, r.deleted_count, r.watermark
            ),
            Err(e) => error!("Incremental sync of '{}' failed: {}", target.table, e),
        }
        result
    }

    async fn run_incremental_sync(
        &self,
        target: &SyncTarget,
        modified_column: &str,
        soft_delete_column: Option<&str>,
    ) -> Result<IncrementalSyncResult> {
        target.validate()?;

        // Rows committed while this sync runs must stay above the next bound.
        let started = Utc::now();
        let since = self.get_last_sync_timestamp(&target.table).await;
        match since {
            Some(ts) => debug!("'{}' last synced at {}", target.table, ts),
            None => debug!("'{}' never synced, extracting every row", target.table),
        }

        let changed = self
            .extract_documents(target, &Predicate::modified_since(modified_column, since))
            .await?;

        let deleted_ids: Vec<DocumentId> = match soft_delete_column {
            Some(flag_column) => self
                .extract_documents(
                    target,
                    &Predicate::soft_deleted_since(modified_column, since, flag_column),
                )
                .await?
                .iter()
                .filter_map(|doc| doc.id(&target.primary_key))
                .collect(),
            None => Vec::new(),
        };
        let deleted: HashSet<&DocumentId> = deleted_ids.iter().collect();

        let upserts: Vec<Document> = changed
            .iter()
            .filter(|doc| {
                doc.id(&target.primary_key)
                    .map_or(true, |id| !deleted.contains(&id))
            })
            .cloned()
            .collect();

        if !upserts.is_empty() {
            self.prepare_collection(target, false).await?;
            let task = self.store.upsert(&target.collection, &upserts).await?;
            self.wait(task).await?;
            debug!("Upserted {} document(s) into '{}'", upserts.len(), target.collection);
        }

        if !deleted_ids.is_empty() && self.store.collection_exists(&target.collection).await? {
            let task = self
                .store
                .delete_documents(&target.collection, &deleted_ids)
                .await?;
            self.wait(task).await?;
            debug!(
                "Deleted {} soft-deleted document(s) from '{}'",
                deleted_ids.len(),
                target.collection
            );
        }

        let watermark = self
            .state
            .write()
            .await
            .advance_watermark(&target.table, started);

        Ok(IncrementalSyncResult {
            success: true,
            changed_count: changed.len() as u64,
            deleted_count: deleted_ids.len() as u64,
            watermark,
        })
    }

    /// Run `full_sync` under the retry policy.
    ///
    /// Never returns an error: exhaustion, or a failure that is not worth
    /// retrying, is reported as a result with `success == false`.
    pub async fn full_sync_with_retry(
        &self,
        target: &SyncTarget,
        recreate_index: bool,
        max_retries: u32,
    ) -> RetrySyncResult {
        let executor =
            RetryExecutor::new(self.config.retry.clone().with_max_retries(max_retries));

        let outcome = executor
            .execute(|| self.full_sync(target, recreate_index))
            .await;

        match outcome.result {
            Ok(r) => RetrySyncResult {
                success: true,
                retry_count: outcome.attempts - 1,
                source_count: Some(r.source_count),
                target_count: Some(r.target_count),
                error: None,
                collection: target.collection.clone(),
                timestamp: None,
            },
            Err(e) => {
                error!(
                    "Full sync of '{}' gave up after {} attempt(s): {}",
                    target.table, outcome.attempts, e
                );
                RetrySyncResult {
                    success: false,
                    retry_count: outcome.attempts,
                    source_count: None,
                    target_count: None,
                    error: Some(e.to_string()),
                    collection: target.collection.clone(),
                    timestamp: Some(Utc::now()),
                }
            }
        }
    }

    /// Rebuild a collection in fixed-size batches.
    ///
    /// A failing batch is recorded and the pass moves on; batches are not
    /// retried.
    ///
    /// # Errors
    /// - `InvalidInput` if `batch_size` is zero
    /// - Any extraction or recreate error, unchanged
    pub async fn full_sync_batch(
        &self,
        target: &SyncTarget,
        batch_size: usize,
        recreate_index: bool,
    ) -> Result<BatchSyncResult> {
        if batch_size == 0 {
            return Err(Error::InvalidInput(
                "batch size must be at least 1".to_string(),
            ));
        }
        target.validate()?;

        info!(
            "Starting batched full sync: {} -> {} (batch size {})",
            target.table, target.collection, batch_size
        );

        self.prepare_collection(target, recreate_index).await?;
        let documents = self.extract_documents(target, &Predicate::All).await?;

        let mut successful_records = 0;
        let mut failed_batch_info = Vec::new();

        for (index, batch) in documents.chunks(batch_size).enumerate() {
            let batch_number = index + 1;
            match self.write_batch(&target.collection, batch).await {
                Ok(()) => {
                    successful_records += batch.len();
                    debug!("Batch {} ({} records) written", batch_number, batch.len());
                }
                Err(e) => {
                    warn!("Batch {} ({} records) failed: {}", batch_number, batch.len(), e);
                    failed_batch_info.push(FailedBatch {
                        batch_number,
                        error: e.to_string(),
                        record_count: batch.len(),
                    });
                }
            }
        }

        let result = BatchSyncResult {
            success: failed_batch_info.is_empty(),
            total_records: documents.len(),
            successful_records,
            failed_batches: failed_batch_info.len(),
            failed_batch_info,
        };

        info!(
            "Batched full sync of '{}' completed: {}/{} records, {} failed batch(es)",
            target.table, result.successful_records, result.total_records, result.failed_batches
        );
        Ok(result)
    }

    async fn write_batch(&self, collection: &str, batch: &[Document]) -> Result<()> {
        let task = self.store.write(collection, batch).await?;
        self.wait(task).await?;
        Ok(())
    }

    /// Recreate the collection, or make sure it exists.
    async fn prepare_collection(&self, target: &SyncTarget, recreate: bool) -> Result<()> {
        let exists = self.store.collection_exists(&target.collection).await?;

        if recreate && exists {
            info!("Deleting collection '{}'", target.collection);
            let task = self.store.delete_collection(&target.collection).await?;
            self.wait(task).await?;
        }

        if recreate || !exists {
            info!(
                "Creating collection '{}' with primary key '{}'",
                target.collection, target.primary_key
            );
            let task = self
                .store
                .create_collection(&target.collection, &target.primary_key)
                .await?;
            self.wait(task).await?;
        }

        Ok(())
    }

    async fn extract_documents(
        &self,
        target: &SyncTarget,
        predicate: &Predicate,
    ) -> Result<Vec<Document>> {
        let rows = self.source.extract(&target.table, predicate).await?;
        debug!("Extracted {} row(s) from '{}'", rows.len(), target.table);

        let documents: Vec<Document> = rows
            .into_iter()
            .map(|row| self.transform.apply(row))
            .collect();

        let distinct: HashSet<DocumentId> = documents
            .iter()
            .filter_map(|doc| doc.id(&target.primary_key))
            .collect();
        if distinct.len() < documents.len() {
            warn!(
                "{} of {} document(s) from '{}' share or lack a '{}' value",
                documents.len() - distinct.len(),
                documents.len(),
                target.table,
                target.primary_key
            );
        }

        Ok(documents)
    }

    async fn wait(&self, task: TaskHandle) -> Result<()> {
        self.store
            .wait_for_task(task, self.config.task_timeout)
            .await?;
        Ok(())
    }

    /// Document count of a collection; a missing collection holds none.
    async fn target_count(&self, collection: &str) -> Result<u64> {
        match self.store.stats(collection).await {
            Ok(stats) => Ok(stats.document_count),
            Err(Error::NotFound(_)) => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Overwrite a table's watermark.
    pub async fn save_last_sync_timestamp(&self, table: &str, ts: DateTime<Utc>) {
        self.state.write().await.set_watermark(table, ts);
    }

    /// Get a table's watermark, if it was ever synced.
    pub async fn get_last_sync_timestamp(&self, table: &str) -> Option<DateTime<Utc>> {
        self.state.read().await.watermark(table)
    }

    /// Append a run to a table's history.
    pub async fn save_sync_status(
        &self,
        table: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        record_count: u64,
        status: SyncStatus,
    ) {
        self.state.write().await.record(SyncStatusEntry {
            table: table.to_string(),
            start_time,
            end_time,
            record_count,
            status,
        });
    }

    /// Most recent run of a table.
    pub async fn get_sync_status(&self, table: &str) -> Option<SyncStatusEntry> {
        self.state.read().await.latest(table).cloned()
    }

    /// Most recent successful run of a table.
    pub async fn get_last_successful_sync(&self, table: &str) -> Option<SyncStatusEntry> {
        self.state.read().await.last_success(table).cloned()
    }

    /// Every run of a table, oldest first.
    pub async fn get_sync_history(&self, table: &str) -> Vec<SyncStatusEntry> {
        self.state.read().await.history(table).to_vec()
    }

    /// Write the watermark map to the configured state file.
    pub async fn persist_sync_state(&self) -> Result<()> {
        self.persist_sync_state_to(&self.config.state_file).await
    }

    /// Write the watermark map to `path`.
    pub async fn persist_sync_state_to(&self, path: &Path) -> Result<()> {
        // Snapshot so the lock is not held across file I/O.
        let snapshot = self.state.read().await.watermark_snapshot();
        snapshot.save_to(path).await?;
        info!("Sync state persisted to {}", path.display());
        Ok(())
    }

    /// Replace the watermark map with the configured state file.
    pub async fn load_sync_state(&self) -> Result<()> {
        self.load_sync_state_from(&self.config.state_file).await
    }

    /// Replace the watermark map with the contents of `path`.
    ///
    /// # Errors
    /// - `Io` if the file is missing or unreadable
    /// - `Serialization` if it is malformed; state is left untouched
    pub async fn load_sync_state_from(&self, path: &Path) -> Result<()> {
        let json = tokio::fs::read_to_string(path).await?;

        let mut loaded = SyncStateStore::new();
        loaded.load_json(&json)?;
        let count = loaded.watermarks().len();

        self.state
            .write()
            .await
            .replace_watermarks(loaded.watermarks().clone());

        info!("Loaded {} watermark(s) from {}", count, path.display());
        Ok(())
    }
}
