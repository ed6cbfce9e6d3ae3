//! Document store trait definition.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use indexsync_common::{Document, DocumentId, Result};

/// Handle to an asynchronous store task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskHandle {
    /// Store-assigned task identifier.
    pub uid: u64,
}

/// Lifecycle state of a store task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Enqueued,
    Processing,
    Succeeded,
    Failed,
    Canceled,
}

impl TaskStatus {
    /// Whether the task will not change state any more.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Canceled
        )
    }
}

/// Final state of a task as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    /// Task identifier.
    pub uid: u64,
    /// Current status.
    pub status: TaskStatus,
    /// Error message for failed tasks.
    pub error: Option<String>,
}

/// Statistics for a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionStats {
    /// Number of documents stored in the collection.
    pub document_count: u64,
}

/// Store health report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    /// Backend status string (e.g., "available").
    pub status: String,
}

impl Health {
    /// Whether the backend reports itself usable.
    pub fn is_available(&self) -> bool {
        self.status == "available"
    }
}

/// Document store trait for search-index backends.
///
/// Write-family operations enqueue work and return a [`TaskHandle`]; the
/// caller decides whether to block on [`DocumentStore::wait_for_task`].
/// Implementations must handle their own authentication.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Get the store name (e.g., "meilisearch", "memory").
    fn name(&self) -> &str;

    /// Create a collection keyed on `primary_key`.
    ///
    /// # Errors
    /// - The resulting task fails if the collection already exists
    async fn create_collection(&self, name: &str, primary_key: &str) -> Result<TaskHandle>;

    /// Check if a collection exists.
    async fn collection_exists(&self, name: &str) -> Result<bool>;

    /// Delete a collection and all its documents.
    async fn delete_collection(&self, name: &str) -> Result<TaskHandle>;

    /// Add documents, replacing any stored document with the same id.
    ///
    /// # Errors
    /// - `Write` if the request could not be submitted
    async fn write(&self, name: &str, documents: &[Document]) -> Result<TaskHandle>;

    /// Add documents, merging fields into any stored document with the
    /// same id.
    async fn upsert(&self, name: &str, documents: &[Document]) -> Result<TaskHandle>;

    /// Delete one document by id.
    async fn delete_document(&self, name: &str, id: &DocumentId) -> Result<TaskHandle>;

    /// Delete several documents by id.
    async fn delete_documents(&self, name: &str, ids: &[DocumentId]) -> Result<TaskHandle>;

    /// Get collection statistics.
    ///
    /// # Errors
    /// - `NotFound` if the collection does not exist
    async fn stats(&self, name: &str) -> Result<CollectionStats>;

    /// Report backend health.
    async fn health(&self) -> Result<Health>;

    /// Block until `task` reaches a terminal state.
    ///
    /// # Errors
    /// - `Write` if the task failed or was canceled
    /// - `Timeout` if `timeout` elapsed first
    async fn wait_for_task(&self, task: TaskHandle, timeout: Option<Duration>) -> Result<TaskInfo>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status_serialization() {
        let status: TaskStatus = serde_json::from_str("\"succeeded\"").unwrap();
        assert_eq!(status, TaskStatus::Succeeded);
        assert!(status.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
    }

    #[test]
    fn test_health_available() {
        assert!(Health { status: "available".to_string() }.is_available());
        assert!(!Health { status: "degraded".to_string() }.is_available());
    }
}
