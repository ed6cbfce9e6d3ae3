//! In-memory source for testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use indexsync_common::{validate_identifier, Error, Result, Row};

use crate::extractor::{Predicate, SourceExtractor};
use crate::timestamp::SourceTimeZone;

/// In-memory source.
///
/// Useful for testing and development. Tables are plain row vectors; rows
/// are returned in insertion order. A failure message can be armed to make
/// every extraction fail until it is cleared.
pub struct MemorySource {
    tables: Arc<RwLock<HashMap<String, Vec<Row>>>>,
    failure: RwLock<Option<String>>,
    extractions: AtomicUsize,
    time_zone: SourceTimeZone,
}

impl MemorySource {
    /// Create a new empty memory source.
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(HashMap::new())),
            failure: RwLock::new(None),
            extractions: AtomicUsize::new(0),
            time_zone: SourceTimeZone::default(),
        }
    }

    /// Read zone-less timestamps as wall-clock time in `time_zone`.
    pub fn with_time_zone(mut self, time_zone: SourceTimeZone) -> Self {
        self.time_zone = time_zone;
        self
    }

    /// Append rows to a table, creating it if needed.
    pub fn insert_rows(&self, table: &str, rows: impl IntoIterator<Item = Row>) {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        tables.entry(table.to_string()).or_default().extend(rows);
    }

    /// Replace a table's contents.
    pub fn set_rows(&self, table: &str, rows: Vec<Row>) {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        tables.insert(table.to_string(), rows);
    }

    /// Update the row whose `key_column` equals `key`, merging `changes`.
    ///
    /// Returns false if no row matched.
    pub fn update_row(&self, table: &str, key_column: &str, key: &Value, changes: Row) -> bool {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        let Some(rows) = tables.get_mut(table) else {
            return false;
        };

        match rows.iter_mut().find(|r| r.get(key_column) == Some(key)) {
            Some(row) => {
                row.extend(changes);
                true
            }
            None => false,
        }
    }

    /// Make every extraction fail with `message` until cleared.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.write().unwrap_or_else(|e| e.into_inner()) = Some(message.into());
    }

    /// Clear an armed failure.
    pub fn clear_failure(&self) {
        *self.failure.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Number of `extract` calls made so far.
    pub fn extract_count(&self) -> usize {
        self.extractions.load(Ordering::SeqCst)
    }

    fn modified_after(&self, row: &Row, column: &str, since: &Option<DateTime<Utc>>) -> bool {
        let bound = self.time_zone.bound(since);

        row.get(column)
            .and_then(Value::as_str)
            .and_then(|text| self.time_zone.parse(text))
            .is_some_and(|modified| modified > bound)
    }

    fn is_flagged(row: &Row, flag_column: &str) -> bool {
        match row.get(flag_column) {
            Some(Value::Number(n)) => n.as_i64() == Some(1),
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s == "1",
            _ => false,
        }
    }

    fn matches(&self, row: &Row, predicate: &Predicate) -> bool {
        match predicate {
            Predicate::All => true,
            Predicate::ModifiedSince { column, since } => self.modified_after(row, column, since),
            Predicate::ModifiedSinceFlagged {
                column,
                since,
                flag_column,
            } => self.modified_after(row, column, since) && Self::is_flagged(row, flag_column),
        }
    }
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceExtractor for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    async fn extract(&self, table: &str, predicate: &Predicate) -> Result<Vec<Row>> {
        self.extractions.fetch_add(1, Ordering::SeqCst);
        validate_identifier(table)?;
        predicate.validate()?;

        if let Some(message) = self.failure.read().unwrap_or_else(|e| e.into_inner()).clone() {
            return Err(Error::Extraction(message));
        }

        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        let rows = tables
            .get(table)
            .ok_or_else(|| Error::Extraction(format!("Table not found: {}", table)))?;

        Ok(rows
            .iter()
            .filter(|row| self.matches(row, predicate))
            .cloned()
            .collect())
    }
}
