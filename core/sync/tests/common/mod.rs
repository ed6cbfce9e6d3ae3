//! Shared fixtures for the sync integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use indexsync_common::{Document, DocumentId, Error, Result, Row};
use indexsync_source::{MemorySource, Predicate, SourceExtractor};
use indexsync_store::{
    CollectionStats, DocumentStore, Health, MemoryStore, TaskHandle, TaskInfo,
};
use indexsync_sync::{SyncConfig, SyncEngine};

/// Memory store whose `write` calls can be made to fail.
///
/// Write calls are numbered from 1 in the order they arrive.
pub struct FlakyStore {
    inner: MemoryStore,
    failing_writes: Mutex<HashSet<usize>>,
    fail_all: AtomicBool,
    writes: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            failing_writes: Mutex::new(HashSet::new()),
            fail_all: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        }
    }

    /// Reject the given write calls.
    pub fn fail_writes(&self, calls: impl IntoIterator<Item = usize>) {
        self.failing_writes.lock().unwrap().extend(calls);
    }

    /// Reject every write call.
    pub fn fail_every_write(&self) {
        self.fail_all.store(true, Ordering::SeqCst);
    }

    pub fn write_calls(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn create_collection(&self, name: &str, primary_key: &str) -> Result<TaskHandle> {
        self.inner.create_collection(name, primary_key).await
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        self.inner.collection_exists(name).await
    }

    async fn delete_collection(&self, name: &str) -> Result<TaskHandle> {
        self.inner.delete_collection(name).await
    }

    async fn write(&self, name: &str, documents: &[Document]) -> Result<TaskHandle> {
        let call = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        let failing = self.fail_all.load(Ordering::SeqCst)
            || self.failing_writes.lock().unwrap().contains(&call);
        if failing {
            return Err(Error::Write(format!(
                "write {} rejected: index unavailable",
                call
            )));
        }
        self.inner.write(name, documents).await
    }

    async fn upsert(&self, name: &str, documents: &[Document]) -> Result<TaskHandle> {
        self.inner.upsert(name, documents).await
    }

    async fn delete_document(&self, name: &str, id: &DocumentId) -> Result<TaskHandle> {
        self.inner.delete_document(name, id).await
    }

    async fn delete_documents(&self, name: &str, ids: &[DocumentId]) -> Result<TaskHandle> {
        self.inner.delete_documents(name, ids).await
    }

    async fn stats(&self, name: &str) -> Result<CollectionStats> {
        self.inner.stats(name).await
    }

    async fn health(&self) -> Result<Health> {
        self.inner.health().await
    }

    async fn wait_for_task(&self, task: TaskHandle, timeout: Option<Duration>) -> Result<TaskInfo> {
        self.inner.wait_for_task(task, timeout).await
    }
}

/// Source whose extractions never complete.
pub struct HangingSource;

#[async_trait]
impl SourceExtractor for HangingSource {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn extract(&self, _table: &str, _predicate: &Predicate) -> Result<Vec<Row>> {
        std::future::pending().await
    }
}

pub fn user(id: i64, updated_at: &str) -> Row {
    user_with_flag(id, updated_at, 0)
}

pub fn user_with_flag(id: i64, updated_at: &str, deleted: i64) -> Row {
    match json!({
        "ID": id,
        "NAME": format!("user {}", id),
        "UPDATED_AT": updated_at,
        "IS_DELETED": deleted,
    }) {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

pub fn users(count: i64) -> Vec<Row> {
    (1..=count).map(|id| user(id, "2024-01-01T00:00:00")).collect()
}

pub fn engine(source: Arc<MemorySource>, store: Arc<dyn DocumentStore>) -> SyncEngine {
    SyncEngine::new(source, store, SyncConfig::default())
}
