//! Sync state tracking and persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::debug;

use indexsync_common::Result;

/// Outcome recorded for one sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Every record made it to the target.
    Success,
    /// The run aborted.
    Failed,
    /// Some batches failed.
    Partial,
}

/// One entry of a table's sync history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatusEntry {
    /// Source table name.
    pub table: String,
    /// When the run started.
    pub start_time: DateTime<Utc>,
    /// When the run finished.
    pub end_time: DateTime<Utc>,
    /// Records processed by the run.
    pub record_count: u64,
    /// Run outcome.
    pub status: SyncStatus,
}

/// Watermarks and run history, keyed by table name.
///
/// Only the watermark map is persisted; history lives for the lifetime of
/// the owning engine.
#[derive(Debug, Clone, Default)]
pub struct SyncStateStore {
    watermarks: BTreeMap<String, DateTime<Utc>>,
    history: HashMap<String, Vec<SyncStatusEntry>>,
}

impl SyncStateStore {
    /// Create an empty state store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the watermark of a table, if it was ever synced.
    pub fn watermark(&self, table: &str) -> Option<DateTime<Utc>> {
        self.watermarks.get(table).copied()
    }

    /// Overwrite a table's watermark.
    pub fn set_watermark(&mut self, table: impl Into<String>, ts: DateTime<Utc>) {
        self.watermarks.insert(table.into(), ts);
    }

    /// Move a table's watermark forward to `ts`, never backward.
    ///
    /// Returns the watermark now stored.
    pub fn advance_watermark(&mut self, table: &str, ts: DateTime<Utc>) -> DateTime<Utc> {
        let next = match self.watermarks.get(table) {
            Some(previous) if *previous > ts => *previous,
            _ => ts,
        };
        self.watermarks.insert(table.to_string(), next);
        next
    }

    /// All watermarks, ordered by table name.
    pub fn watermarks(&self) -> &BTreeMap<String, DateTime<Utc>> {
        &self.watermarks
    }

    /// Replace every watermark at once.
    pub fn replace_watermarks(&mut self, watermarks: BTreeMap<String, DateTime<Utc>>) {
        self.watermarks = watermarks;
    }

    /// Copy of the watermarks without the history.
    pub fn watermark_snapshot(&self) -> Self {
        Self {
            watermarks: self.watermarks.clone(),
            history: HashMap::new(),
        }
    }

    /// Append an entry to its table's history.
    pub fn record(&mut self, entry: SyncStatusEntry) {
        self.history
            .entry(entry.table.clone())
            .or_default()
            .push(entry);
    }

    /// Most recent entry for a table.
    pub fn latest(&self, table: &str) -> Option<&SyncStatusEntry> {
        self.history.get(table).and_then(|entries| entries.last())
    }

    /// Most recent successful entry for a table.
    pub fn last_success(&self, table: &str) -> Option<&SyncStatusEntry> {
        self.history.get(table).and_then(|entries| {
            entries
                .iter()
                .rev()
                .find(|e| e.status == SyncStatus::Success)
        })
    }

    /// Full history for a table, oldest first.
    pub fn history(&self, table: &str) -> &[SyncStatusEntry] {
        self.history.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Serialize the watermark map to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.watermarks)?)
    }

    /// Replace the watermark map with the one encoded in `json`.
    ///
    /// History is left untouched.
    pub fn load_json(&mut self, json: &str) -> Result<()> {
        self.watermarks = serde_json::from_str(json)?;
        Ok(())
    }

    /// Write the watermark map to `path`.
    ///
    /// The file is written next to its destination and renamed over it, so
    /// readers never see a half-written file.
    ///
    /// # Errors
    /// - `Io` if the directory or file cannot be written
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp = temp_path(path);
        tokio::fs::write(&temp, json).await?;
        tokio::fs::rename(&temp, path).await?;

        debug!(
            "Saved {} watermark(s) to {}",
            self.watermarks.len(),
            path.display()
        );
        Ok(())
    }

    /// Replace the watermark map with the contents of `path`.
    ///
    /// # Errors
    /// - `Io` if the file cannot be read
    /// - `Serialization` if it is not a JSON object of timestamps
    pub async fn load_from(&mut self, path: &Path) -> Result<()> {
        let json = tokio::fs::read_to_string(path).await?;
        self.load_json(&json)?;

        debug!(
            "Loaded {} watermark(s) from {}",
            self.watermarks.len(),
            path.display()
        );
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
