//! Meilisearch REST API client.

use reqwest::{header, Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use indexsync_common::{Document, DocumentId, Error, Result};

use crate::store::{CollectionStats, Health, TaskHandle, TaskInfo, TaskStatus};

/// Default Meilisearch address.
pub const DEFAULT_HOST: &str = "http://localhost:7700";

/// Meilisearch connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeilisearchConfig {
    /// Base URL of the server.
    #[serde(default = "default_host")]
    pub host: String,
    /// API key sent as a bearer token.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Interval between task status polls, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_poll_interval_ms() -> u64 {
    50
}

impl MeilisearchConfig {
    /// Create a configuration for `host`.
    pub fn new(host: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            host: host.into(),
            api_key,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for MeilisearchConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, None)
    }
}

/// Summary returned when a task is enqueued.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnqueuedTask {
    task_uid: u64,
}

/// Task object returned by `GET /tasks/{uid}`.
#[derive(Debug, Deserialize)]
struct TaskResponse {
    uid: u64,
    status: TaskStatus,
    #[serde(default)]
    error: Option<ApiError>,
}

/// Error object embedded in failed tasks and error responses.
#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    number_of_documents: u64,
}

/// Meilisearch API client.
pub struct MeilisearchClient {
    http: Client,
    base: Url,
    api_key: Option<String>,
    poll_interval: Duration,
}

impl MeilisearchClient {
    /// Create a new client.
    ///
    /// # Errors
    /// - `InvalidInput` if the host is not a valid URL
    /// - `Store` if the HTTP client cannot be built
    pub fn new(config: &MeilisearchConfig) -> Result<Self> {
        let mut base = Url::parse(&config.host)
            .map_err(|e| Error::InvalidInput(format!("Invalid Meilisearch host '{}': {}", config.host, e)))?;

        // Url::join drops the last segment unless the path ends in '/'.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = Client::builder()
            .user_agent(concat!("indexsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Store(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base,
            api_key: config.api_key.clone(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        })
    }

    /// Interval used when polling task status.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Resolve an API path against the base URL.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| Error::InvalidInput(format!("Invalid endpoint '{}': {}", path, e)))
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self.endpoint(path)?;
        let mut request = self.http.request(method, url);
        if let Some(key) = &self.api_key {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", key));
        }
        Ok(request)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, context: &str) -> Result<T> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::Store(format!("{}: {}", context, e)))?;
        self.handle_response(response, context).await
    }

    /// Get index metadata; `None` if the index does not exist.
    pub async fn get_index(&self, uid: &str) -> Result<Option<serde_json::Value>> {
        let request = self.request(Method::GET, &format!("indexes/{}", uid))?;
        match self.send(request, "Failed to get index").await {
            Ok(index) => Ok(Some(index)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Create an index with the given primary key.
    pub async fn create_index(&self, uid: &str, primary_key: &str) -> Result<TaskHandle> {
        let body = serde_json::json!({ "uid": uid, "primaryKey": primary_key });
        let request = self.request(Method::POST, "indexes")?.json(&body);
        let task: EnqueuedTask = self.send(request, "Failed to create index").await?;
        Ok(TaskHandle { uid: task.task_uid })
    }

    /// Delete an index.
    pub async fn delete_index(&self, uid: &str) -> Result<TaskHandle> {
        let request = self.request(Method::DELETE, &format!("indexes/{}", uid))?;
        let task: EnqueuedTask = self.send(request, "Failed to delete index").await?;
        Ok(TaskHandle { uid: task.task_uid })
    }

    /// Add or replace documents.
    pub async fn add_documents(&self, uid: &str, documents: &[Document]) -> Result<TaskHandle> {
        let request = self
            .request(Method::POST, &format!("indexes/{}/documents", uid))?
            .json(documents);
        let task: EnqueuedTask = self.send(request, "Failed to add documents").await?;
        Ok(TaskHandle { uid: task.task_uid })
    }

    /// Add or update documents.
    pub async fn update_documents(&self, uid: &str, documents: &[Document]) -> Result<TaskHandle> {
        let request = self
            .request(Method::PUT, &format!("indexes/{}/documents", uid))?
            .json(documents);
        let task: EnqueuedTask = self.send(request, "Failed to update documents").await?;
        Ok(TaskHandle { uid: task.task_uid })
    }

    /// Delete a single document.
    pub async fn delete_document(&self, uid: &str, id: &DocumentId) -> Result<TaskHandle> {
        let request = self.request(Method::DELETE, &format!("indexes/{}/documents/{}", uid, id))?;
        let task: EnqueuedTask = self.send(request, "Failed to delete document").await?;
        Ok(TaskHandle { uid: task.task_uid })
    }

    /// Delete documents by id.
    pub async fn delete_documents(&self, uid: &str, ids: &[DocumentId]) -> Result<TaskHandle> {
        let request = self
            .request(Method::POST, &format!("indexes/{}/documents/delete-batch", uid))?
            .json(ids);
        let task: EnqueuedTask = self.send(request, "Failed to delete documents").await?;
        Ok(TaskHandle { uid: task.task_uid })
    }

    /// Get index statistics.
    pub async fn stats(&self, uid: &str) -> Result<CollectionStats> {
        let request = self.request(Method::GET, &format!("indexes/{}/stats", uid))?;
        let stats: StatsResponse = self.send(request, "Failed to get index stats").await?;
        Ok(CollectionStats {
            document_count: stats.number_of_documents,
        })
    }

    /// Get server health.
    pub async fn health(&self) -> Result<Health> {
        let request = self.request(Method::GET, "health")?;
        self.send(request, "Failed to check health").await
    }

    /// Get the current state of a task.
    pub async fn get_task(&self, uid: u64) -> Result<TaskInfo> {
        let request = self.request(Method::GET, &format!("tasks/{}", uid))?;
        let task: TaskResponse = self.send(request, "Failed to get task").await?;
        Ok(TaskInfo {
            uid: task.uid,
            status: task.status,
            error: task.error.map(|e| match e.code {
                Some(code) => format!("{} ({})", e.message, code),
                None => e.message,
            }),
        })
    }

    /// Handle API response.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
        context: &str,
    ) -> Result<T> {
        let status = response.status();

        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| Error::Serialization(format!("{}: invalid response: {}", context, e)))
        } else {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiError>(&body)
                .map(|e| e.message)
                .unwrap_or(body);

            if status == StatusCode::NOT_FOUND {
                Err(Error::NotFound(format!("{}: {}", context, message)))
            } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                Err(Error::Store(format!("{}: authentication failed: {}", context, message)))
            } else {
                Err(Error::Store(format!("{}: {} - {}", context, status, message)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_relative_paths() {
        let client = MeilisearchClient::new(&MeilisearchConfig::default()).unwrap();
        assert_eq!(
            client.endpoint("indexes/users/stats").unwrap().as_str(),
            "http://localhost:7700/indexes/users/stats"
        );

        let prefixed = MeilisearchClient::new(&MeilisearchConfig::new(
            "https://search.example.com/meili",
            None,
        ))
        .unwrap();
        assert_eq!(
            prefixed.endpoint("health").unwrap().as_str(),
            "https://search.example.com/meili/health"
        );
    }

    #[test]
    fn test_invalid_host() {
        assert!(MeilisearchClient::new(&MeilisearchConfig::new("not a url", None)).is_err());
    }

    #[test]
    fn test_parse_task_response() {
        let body = r#"{
            "uid": 12,
            "indexUid": "users",
            "status": "failed",
            "type": "documentAdditionOrUpdate",
            "error": {
                "message": "Document doesn't have a `ID` attribute",
                "code": "missing_document_id",
                "type": "invalid_request",
                "link": "https://docs.meilisearch.com/errors#missing_document_id"
            }
        }"#;
        let task: TaskResponse = serde_json::from_str(body).unwrap();
        assert_eq!(task.uid, 12);
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.unwrap().code.as_deref(), Some("missing_document_id"));
    }

    #[test]
    fn test_parse_enqueued_and_stats() {
        let task: EnqueuedTask = serde_json::from_str(
            r#"{"taskUid": 3, "indexUid": "users", "status": "enqueued", "type": "indexCreation", "enqueuedAt": "2024-01-15T10:30:00Z"}"#,
        )
        .unwrap();
        assert_eq!(task.task_uid, 3);

        let stats: StatsResponse = serde_json::from_str(
            r#"{"numberOfDocuments": 1000, "isIndexing": false, "fieldDistribution": {}}"#,
        )
        .unwrap();
        assert_eq!(stats.number_of_documents, 1000);
    }

    #[test]
    fn test_config_defaults_from_json() {
        let config: MeilisearchConfig = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.poll_interval_ms, 50);
        assert!(config.api_key.is_none());
    }
}
