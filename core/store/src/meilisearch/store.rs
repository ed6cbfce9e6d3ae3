//! Meilisearch document store implementation.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use indexsync_common::{Document, DocumentId, Error, Result};

use crate::store::{CollectionStats, DocumentStore, Health, TaskHandle, TaskInfo, TaskStatus};

use super::client::{MeilisearchClient, MeilisearchConfig};

/// Meilisearch-backed document store.
///
/// Collections map to Meilisearch indexes.
pub struct MeilisearchStore {
    client: MeilisearchClient,
}

impl MeilisearchStore {
    /// Create a new store from connection settings.
    ///
    /// # Errors
    /// - Invalid host URL
    pub fn new(config: MeilisearchConfig) -> Result<Self> {
        Ok(Self {
            client: MeilisearchClient::new(&config)?,
        })
    }

    /// Access the underlying API client.
    pub fn client(&self) -> &MeilisearchClient {
        &self.client
    }
}

/// Submission failures of write-family calls are write errors.
fn as_write_error(err: Error) -> Error {
    match err {
        Error::Store(message) | Error::NotFound(message) => Error::Write(message),
        other => other,
    }
}

#[async_trait]
impl DocumentStore for MeilisearchStore {
    fn name(&self) -> &str {
        "meilisearch"
    }

    async fn create_collection(&self, name: &str, primary_key: &str) -> Result<TaskHandle> {
        self.client.create_index(name, primary_key).await
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        Ok(self.client.get_index(name).await?.is_some())
    }

    async fn delete_collection(&self, name: &str) -> Result<TaskHandle> {
        self.client.delete_index(name).await
    }

    async fn write(&self, name: &str, documents: &[Document]) -> Result<TaskHandle> {
        self.client
            .add_documents(name, documents)
            .await
            .map_err(as_write_error)
    }

    async fn upsert(&self, name: &str, documents: &[Document]) -> Result<TaskHandle> {
        self.client
            .update_documents(name, documents)
            .await
            .map_err(as_write_error)
    }

    async fn delete_document(&self, name: &str, id: &DocumentId) -> Result<TaskHandle> {
        self.client
            .delete_document(name, id)
            .await
            .map_err(as_write_error)
    }

    async fn delete_documents(&self, name: &str, ids: &[DocumentId]) -> Result<TaskHandle> {
        self.client
            .delete_documents(name, ids)
            .await
            .map_err(as_write_error)
    }

    async fn stats(&self, name: &str) -> Result<CollectionStats> {
        self.client.stats(name).await
    }

    async fn health(&self) -> Result<Health> {
        self.client.health().await
    }

    async fn wait_for_task(&self, task: TaskHandle, timeout: Option<Duration>) -> Result<TaskInfo> {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            let info = self.client.get_task(task.uid).await?;

            match info.status {
                TaskStatus::Succeeded => return Ok(info),
                TaskStatus::Failed | TaskStatus::Canceled => {
                    return Err(Error::Write(info.error.unwrap_or_else(|| {
                        format!("task {} ended as {:?}", info.uid, info.status)
                    })));
                }
                TaskStatus::Enqueued | TaskStatus::Processing => {
                    debug!("Task {} still {:?}", task.uid, info.status);
                }
            }

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(Error::Timeout(format!(
                        "task {} did not finish within {:?}",
                        task.uid,
                        timeout.unwrap_or_default()
                    )));
                }
            }

            tokio::time::sleep(self.client.poll_interval()).await;
        }
    }
}

/// Factory function for creating a Meilisearch store from JSON config.
pub fn create_meilisearch_store(config: serde_json::Value) -> Result<Arc<dyn DocumentStore>> {
    let meili_config: MeilisearchConfig = serde_json::from_value(config)
        .map_err(|e| Error::InvalidInput(format!("Invalid Meilisearch config: {}", e)))?;

    Ok(Arc::new(MeilisearchStore::new(meili_config)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve canned HTTP responses, one per connection, in order.
    async fn serve(responses: Vec<(u16, &'static str)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                // Drain the whole request so closing the socket doesn't reset it.
                let mut buf = vec![0u8; 65536];
                let mut read = 0;
                loop {
                    let n = socket.read(&mut buf[read..]).await.unwrap();
                    read += n;
                    if n == 0 {
                        break;
                    }
                    let request = String::from_utf8_lossy(&buf[..read]);
                    if let Some(header_end) = request.find("\r\n\r\n") {
                        let content_length = request[..header_end]
                            .lines()
                            .filter_map(|l| l.split_once(':'))
                            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                            .unwrap_or(0);
                        if read >= header_end + 4 + content_length {
                            break;
                        }
                    }
                }
                let response = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });

        format!("http://{}", addr)
    }

    fn store_for(host: String) -> MeilisearchStore {
        let mut config = MeilisearchConfig::new(host, Some("masterKey".to_string()));
        config.poll_interval_ms = 1;
        MeilisearchStore::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let host = serve(vec![(200, r#"{"status":"available"}"#)]).await;
        let health = store_for(host).health().await.unwrap();
        assert!(health.is_available());
    }

    #[tokio::test]
    async fn test_collection_exists_maps_not_found() {
        let host = serve(vec![
            (200, r#"{"uid":"users","primaryKey":"ID"}"#),
            (404, r#"{"message":"Index `orders` not found.","code":"index_not_found","type":"invalid_request","link":""}"#),
        ])
        .await;
        let store = store_for(host);

        assert!(store.collection_exists("users").await.unwrap());
        assert!(!store.collection_exists("orders").await.unwrap());
    }

    #[tokio::test]
    async fn test_stats() {
        let host = serve(vec![(200, r#"{"numberOfDocuments":3,"isIndexing":false,"fieldDistribution":{}}"#)]).await;
        let stats = store_for(host).stats("users").await.unwrap();
        assert_eq!(stats.document_count, 3);
    }

    #[tokio::test]
    async fn test_wait_for_task_polls_until_terminal() {
        let host = serve(vec![
            (202, r#"{"taskUid":7,"indexUid":"users","status":"enqueued","type":"documentAdditionOrUpdate","enqueuedAt":"2024-01-15T10:30:00Z"}"#),
            (200, r#"{"uid":7,"status":"processing"}"#),
            (200, r#"{"uid":7,"status":"succeeded"}"#),
        ])
        .await;
        let store = store_for(host);

        let task = store.write("users", &[Document::new()]).await.unwrap();
        assert_eq!(task.uid, 7);

        let info = store.wait_for_task(task, None).await.unwrap();
        assert_eq!(info.status, TaskStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_failed_task_is_write_error() {
        let host = serve(vec![(
            200,
            r#"{"uid":9,"status":"failed","error":{"message":"Document doesn't have a `ID` attribute","code":"missing_document_id"}}"#,
        )])
        .await;

        let err = store_for(host)
            .wait_for_task(TaskHandle { uid: 9 }, None)
            .await
            .unwrap_err();
        match err {
            Error::Write(message) => assert!(message.contains("missing_document_id")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wait_for_task_times_out() {
        let host = serve(vec![(200, r#"{"uid":5,"status":"processing"}"#)]).await;

        let err = store_for(host)
            .wait_for_task(TaskHandle { uid: 5 }, Some(Duration::ZERO))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn test_rejected_write_is_write_error() {
        let host = serve(vec![(
            400,
            r#"{"message":"The provided payload is malformed.","code":"malformed_payload","type":"invalid_request","link":""}"#,
        )])
        .await;

        let err = store_for(host).write("users", &[]).await.unwrap_err();
        assert!(matches!(err, Error::Write(_)));
    }

    #[test]
    fn test_factory() {
        let store = create_meilisearch_store(serde_json::json!({
            "host": "http://localhost:7700",
            "api_key": "key"
        }))
        .unwrap();
        assert_eq!(store.name(), "meilisearch");

        assert!(create_meilisearch_store(serde_json::json!({"host": 5})).is_err());
    }
}
