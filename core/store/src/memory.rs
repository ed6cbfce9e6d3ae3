//! In-memory document store for testing.

use async_trait::async_trait;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use indexsync_common::{Document, DocumentId, Error, Result};

use crate::store::{CollectionStats, DocumentStore, Health, TaskHandle, TaskInfo, TaskStatus};

/// A stored collection.
#[derive(Debug, Clone)]
struct Collection {
    primary_key: String,
    documents: HashMap<DocumentId, Document>,
}

/// How incoming documents combine with stored ones.
#[derive(Debug, Clone, Copy)]
enum WriteMode {
    Replace,
    Merge,
}

/// In-memory document store.
///
/// Useful for testing and development. Tasks are processed synchronously,
/// so every handle is already terminal when it is returned. Writing to a
/// missing collection creates it, inferring the primary key from the
/// single field whose name ends in "id" (case-insensitive), the way
/// search engines do.
pub struct MemoryStore {
    collections: Arc<RwLock<HashMap<String, Collection>>>,
    tasks: RwLock<HashMap<u64, TaskInfo>>,
    next_task: AtomicU64,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            collections: Arc::new(RwLock::new(HashMap::new())),
            tasks: RwLock::new(HashMap::new()),
            next_task: AtomicU64::new(0),
        }
    }

    /// Snapshot of a collection's documents, unordered.
    pub fn documents(&self, name: &str) -> Vec<Document> {
        let collections = self.collections.read().unwrap_or_else(|e| e.into_inner());
        collections
            .get(name)
            .map(|c| c.documents.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Get a single document.
    pub fn document(&self, name: &str, id: &DocumentId) -> Option<Document> {
        let collections = self.collections.read().unwrap_or_else(|e| e.into_inner());
        collections.get(name).and_then(|c| c.documents.get(id).cloned())
    }

    /// Primary key of a collection.
    pub fn primary_key(&self, name: &str) -> Option<String> {
        let collections = self.collections.read().unwrap_or_else(|e| e.into_inner());
        collections.get(name).map(|c| c.primary_key.clone())
    }

    /// Record a finished task and return its handle.
    fn finish(&self, outcome: std::result::Result<(), String>) -> TaskHandle {
        let uid = self.next_task.fetch_add(1, Ordering::SeqCst);
        let info = match outcome {
            Ok(()) => TaskInfo {
                uid,
                status: TaskStatus::Succeeded,
                error: None,
            },
            Err(message) => TaskInfo {
                uid,
                status: TaskStatus::Failed,
                error: Some(message),
            },
        };
        self.tasks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(uid, info);
        TaskHandle { uid }
    }

    fn infer_primary_key(documents: &[Document]) -> std::result::Result<String, String> {
        let first = documents
            .first()
            .ok_or_else(|| "cannot infer a primary key from zero documents".to_string())?;

        let candidates: Vec<&String> = first
            .fields()
            .filter(|f| f.to_ascii_lowercase().ends_with("id"))
            .collect();

        match candidates.as_slice() {
            [single] => Ok((*single).clone()),
            _ => Err("primary key inference failed".to_string()),
        }
    }

    fn apply_documents(
        &self,
        name: &str,
        documents: &[Document],
        mode: WriteMode,
    ) -> std::result::Result<(), String> {
        let mut collections = self.collections.write().unwrap_or_else(|e| e.into_inner());

        if !collections.contains_key(name) {
            let primary_key = Self::infer_primary_key(documents)?;
            collections.insert(
                name.to_string(),
                Collection {
                    primary_key,
                    documents: HashMap::new(),
                },
            );
        }

        let collection = collections
            .get_mut(name)
            .ok_or_else(|| format!("index `{}` not found", name))?;

        // The whole batch is rejected if any document lacks an id.
        let mut keyed = Vec::with_capacity(documents.len());
        for (position, doc) in documents.iter().enumerate() {
            let id = doc.id(&collection.primary_key).ok_or_else(|| {
                format!(
                    "document at position {} is missing primary key `{}`",
                    position, collection.primary_key
                )
            })?;
            keyed.push((id, doc));
        }

        for (id, doc) in keyed {
            match collection.documents.entry(id) {
                Entry::Occupied(mut stored) if matches!(mode, WriteMode::Merge) => {
                    for (field, value) in doc.as_map() {
                        stored.get_mut().insert(field.clone(), value.clone());
                    }
                }
                Entry::Occupied(mut stored) => {
                    stored.insert(doc.clone());
                }
                Entry::Vacant(slot) => {
                    slot.insert(doc.clone());
                }
            }
        }

        Ok(())
    }

    fn remove_documents(&self, name: &str, ids: &[DocumentId]) -> std::result::Result<(), String> {
        let mut collections = self.collections.write().unwrap_or_else(|e| e.into_inner());
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| format!("index `{}` not found", name))?;

        for id in ids {
            collection.documents.remove(id);
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create_collection(&self, name: &str, primary_key: &str) -> Result<TaskHandle> {
        let mut collections = self.collections.write().unwrap_or_else(|e| e.into_inner());
        let outcome = if collections.contains_key(name) {
            Err(format!("index `{}` already exists", name))
        } else {
            collections.insert(
                name.to_string(),
                Collection {
                    primary_key: primary_key.to_string(),
                    documents: HashMap::new(),
                },
            );
            Ok(())
        };
        drop(collections);

        Ok(self.finish(outcome))
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        let collections = self.collections.read().unwrap_or_else(|e| e.into_inner());
        Ok(collections.contains_key(name))
    }

    async fn delete_collection(&self, name: &str) -> Result<TaskHandle> {
        let removed = self
            .collections
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name);

        let outcome = match removed {
            Some(_) => Ok(()),
            None => Err(format!("index `{}` not found", name)),
        };
        Ok(self.finish(outcome))
    }

    async fn write(&self, name: &str, documents: &[Document]) -> Result<TaskHandle> {
        let outcome = self.apply_documents(name, documents, WriteMode::Replace);
        Ok(self.finish(outcome))
    }

    async fn upsert(&self, name: &str, documents: &[Document]) -> Result<TaskHandle> {
        let outcome = self.apply_documents(name, documents, WriteMode::Merge);
        Ok(self.finish(outcome))
    }

    async fn delete_document(&self, name: &str, id: &DocumentId) -> Result<TaskHandle> {
        let outcome = self.remove_documents(name, std::slice::from_ref(id));
        Ok(self.finish(outcome))
    }

    async fn delete_documents(&self, name: &str, ids: &[DocumentId]) -> Result<TaskHandle> {
        let outcome = self.remove_documents(name, ids);
        Ok(self.finish(outcome))
    }

    async fn stats(&self, name: &str) -> Result<CollectionStats> {
        let collections = self.collections.read().unwrap_or_else(|e| e.into_inner());
        let collection = collections
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("Collection not found: {}", name)))?;

        Ok(CollectionStats {
            document_count: collection.documents.len() as u64,
        })
    }

    async fn health(&self) -> Result<Health> {
        Ok(Health {
            status: "available".to_string(),
        })
    }

    async fn wait_for_task(&self, task: TaskHandle, _timeout: Option<Duration>) -> Result<TaskInfo> {
        let info = self
            .tasks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&task.uid)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Task not found: {}", task.uid)))?;

        match info.status {
            TaskStatus::Failed | TaskStatus::Canceled => Err(Error::Write(
                info.error
                    .unwrap_or_else(|| format!("task {} did not succeed", info.uid)),
            )),
            _ => Ok(info),
        }
    }
}
