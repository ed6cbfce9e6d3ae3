//! SQLite-backed source extractor.
//!
//! Reads a table through rusqlite on the blocking thread pool. Columns
//! whose declared type mentions DATE or TIME are rendered as canonical
//! wall-clock text in the source's time zone, whether SQLite stored them
//! as text or unix seconds.

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

use indexsync_common::{validate_identifier, Error, Result, Row};

use crate::extractor::{Predicate, SourceExtractor};
use crate::timestamp::SourceTimeZone;

/// Source extractor over a SQLite database file.
pub struct SqliteSource {
    path: PathBuf,
    time_zone: SourceTimeZone,
}

impl SqliteSource {
    /// Create a source for the database at `path`.
    ///
    /// # Errors
    /// - `NotFound` if the file does not exist
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(Error::NotFound(format!(
                "Source database not found: {}",
                path.display()
            )));
        }
        Ok(Self {
            path,
            time_zone: SourceTimeZone::default(),
        })
    }

    /// Read zone-less timestamps as wall-clock time in `time_zone`.
    pub fn with_time_zone(mut self, time_zone: SourceTimeZone) -> Self {
        self.time_zone = time_zone;
        self
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn quote(ident: &str) -> String {
        ident
            .split('.')
            .map(|part| format!("\"{}\"", part))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Julian day of `column` as wall-clock time in the source zone.
    ///
    /// Numeric cells are unix seconds; `?2` shifts them out of UTC.
    fn modified_expr(column: &str) -> String {
        let column = Self::quote(column);
        format!(
            "julianday(CASE WHEN typeof({c}) IN ('integer', 'real') \
             THEN datetime({c}, 'unixepoch', ?2) ELSE {c} END)",
            c = column
        )
    }

    /// Build the SELECT statement and its parameters.
    fn build_query(
        table: &str,
        predicate: &Predicate,
        time_zone: SourceTimeZone,
    ) -> (String, Vec<String>) {
        let base = format!("SELECT * FROM {}", Self::quote(table));
        let params = |since: &Option<DateTime<Utc>>| {
            vec![
                time_zone
                    .bound(since)
                    .format("%Y-%m-%d %H:%M:%S%.f")
                    .to_string(),
                time_zone.sqlite_modifier(),
            ]
        };

        match predicate {
            Predicate::All => (base, Vec::new()),
            Predicate::ModifiedSince { column, since } => (
                format!(
                    "{} WHERE {} > julianday(?1)",
                    base,
                    Self::modified_expr(column)
                ),
                params(since),
            ),
            Predicate::ModifiedSinceFlagged {
                column,
                since,
                flag_column,
            } => (
                format!(
                    "{} WHERE {} > julianday(?1) AND {} = 1",
                    base,
                    Self::modified_expr(column),
                    Self::quote(flag_column)
                ),
                params(since),
            ),
        }
    }

    /// Names of columns declared with a temporal type.
    fn temporal_columns(conn: &Connection, table: &str) -> rusqlite::Result<HashSet<String>> {
        let pragma = match table.rsplit_once('.') {
            Some((schema, name)) => format!(
                "PRAGMA {}.table_info({})",
                Self::quote(schema),
                Self::quote(name)
            ),
            None => format!("PRAGMA table_info({})", Self::quote(table)),
        };

        let mut stmt = conn.prepare(&pragma)?;
        let columns = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?;

        let mut temporal = HashSet::new();
        for column in columns {
            let (name, decl_type) = column?;
            let decl_type = decl_type.to_ascii_uppercase();
            if decl_type.contains("DATE") || decl_type.contains("TIME") {
                temporal.insert(name);
            }
        }
        Ok(temporal)
    }

    fn to_json(value: ValueRef<'_>, temporal: Option<SourceTimeZone>) -> Value {
        match (value, temporal) {
            (ValueRef::Integer(i), Some(zone)) => zone
                .from_unix_seconds(i)
                .map(Value::String)
                .unwrap_or_else(|| Self::plain_json(value)),
            (ValueRef::Real(f), Some(zone)) => zone
                .from_unix_seconds(f as i64)
                .map(Value::String)
                .unwrap_or_else(|| Self::plain_json(value)),
            (ValueRef::Text(bytes), Some(zone)) => {
                Value::String(zone.normalize(&String::from_utf8_lossy(bytes)))
            }
            (value, _) => Self::plain_json(value),
        }
    }

    fn plain_json(value: ValueRef<'_>) -> Value {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::from(i),
            ValueRef::Real(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => {
                Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
            }
        }
    }

    fn read_rows(
        path: &Path,
        table: &str,
        predicate: &Predicate,
        time_zone: SourceTimeZone,
    ) -> rusqlite::Result<Vec<Row>> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let temporal = Self::temporal_columns(&conn, table)?;
        let (sql, params) = Self::build_query(table, predicate, time_zone);
        debug!("Executing extraction query: {}", sql);

        let mut stmt = conn.prepare(&sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;

        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Row::new();
            for (idx, name) in names.iter().enumerate() {
                let zone = temporal.contains(name).then_some(time_zone);
                let value = Self::to_json(row.get_ref(idx)?, zone);
                record.insert(name.clone(), value);
            }
            results.push(record);
        }
        Ok(results)
    }
}

#[async_trait]
impl SourceExtractor for SqliteSource {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn extract(&self, table: &str, predicate: &Predicate) -> Result<Vec<Row>> {
        validate_identifier(table)?;
        predicate.validate()?;

        let path = self.path.clone();
        let table_name = table.to_string();
        let predicate = predicate.clone();
        let time_zone = self.time_zone;

        let rows = tokio::task::spawn_blocking(move || {
            Self::read_rows(&path, &table_name, &predicate, time_zone)
        })
        .await
        .map_err(|e| Error::Extraction(format!("Extraction task failed: {}", e)))?
        .map_err(|e| Error::Extraction(format!("Failed to read table {}: {}", table, e)))?;

        debug!("Extracted {} rows from {}", rows.len(), table);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone, Utc};
    use serde_json::json;
    use tempfile::TempDir;

    fn create_db(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("source.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE users (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                avatar BLOB,
                score REAL,
                updated_at TIMESTAMP,
                created_on DATE,
                is_deleted INTEGER NOT NULL DEFAULT 0
            );
            INSERT INTO users VALUES (1, 'kim', NULL, 1.5, '2024-01-01 09:00:00', '2023-12-31', 0);
            INSERT INTO users VALUES (2, 'lee', x'0102', NULL, '2024-01-02T09:00:00', 1704067200, 1);
            INSERT INTO users VALUES (3, 'park', NULL, 3.0, '2024-01-03 09:00:00.500', NULL, 0);
            "#,
        )
        .unwrap();
        path
    }

    fn utc_source(dir: &TempDir) -> SqliteSource {
        SqliteSource::new(create_db(dir))
            .unwrap()
            .with_time_zone(SourceTimeZone::Utc)
    }

    /// `updated_at` holds unix seconds in one row and text in the other.
    fn create_epoch_db(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("epoch.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE events (id INTEGER PRIMARY KEY, updated_at TIMESTAMP);
            INSERT INTO events VALUES (1, 1704067200);
            INSERT INTO events VALUES (2, '2024-01-02 00:00:00');
            "#,
        )
        .unwrap();
        path
    }

    fn ids(rows: &[Row]) -> Vec<i64> {
        rows.iter().filter_map(|r| r["id"].as_i64()).collect()
    }

    #[tokio::test]
    async fn test_modified_since_reads_unix_seconds() {
        let dir = TempDir::new().unwrap();
        let source = SqliteSource::new(create_epoch_db(&dir))
            .unwrap()
            .with_time_zone(SourceTimeZone::Utc);

        let first = source
            .extract("events", &Predicate::modified_since("updated_at", None))
            .await
            .unwrap();
        assert_eq!(ids(&first), vec![1, 2]);
        assert_eq!(first[0]["updated_at"], json!("2024-01-01T00:00:00"));

        let before = Utc.with_ymd_and_hms(2023, 12, 31, 23, 0, 0).unwrap();
        let rows = source
            .extract("events", &Predicate::modified_since("updated_at", Some(before)))
            .await
            .unwrap();
        assert_eq!(ids(&rows), vec![1, 2]);

        let after = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        let rows = source
            .extract("events", &Predicate::modified_since("updated_at", Some(after)))
            .await
            .unwrap();
        assert_eq!(ids(&rows), vec![2]);
    }

    #[tokio::test]
    async fn test_modified_since_in_source_zone() {
        let dir = TempDir::new().unwrap();
        let seoul = SourceTimeZone::Fixed(FixedOffset::east_opt(9 * 3600).unwrap());
        let source = SqliteSource::new(create_epoch_db(&dir))
            .unwrap()
            .with_time_zone(seoul);

        let rows = source.extract("events", &Predicate::All).await.unwrap();
        assert_eq!(rows[0]["updated_at"], json!("2024-01-01T09:00:00"));

        // Row 1 is 09:00 Seoul time, row 2 is midnight the next day.
        let since = Utc.with_ymd_and_hms(2024, 1, 1, 0, 30, 0).unwrap();
        let rows = source
            .extract("events", &Predicate::modified_since("updated_at", Some(since)))
            .await
            .unwrap();
        assert_eq!(ids(&rows), vec![2]);

        // 14:30 UTC is 23:30 in Seoul, half an hour before row 2.
        let since = Utc.with_ymd_and_hms(2024, 1, 1, 14, 30, 0).unwrap();
        let rows = source
            .extract("events", &Predicate::modified_since("updated_at", Some(since)))
            .await
            .unwrap();
        assert_eq!(ids(&rows), vec![2]);

        let since = Utc.with_ymd_and_hms(2024, 1, 1, 15, 30, 0).unwrap();
        let rows = source
            .extract("events", &Predicate::modified_since("updated_at", Some(since)))
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_extract_all_normalizes_temporal_columns() {
        let dir = TempDir::new().unwrap();
        let source = utc_source(&dir);

        let rows = source.extract("users", &Predicate::All).await.unwrap();
        assert_eq!(rows.len(), 3);

        assert_eq!(rows[0]["id"], json!(1));
        assert_eq!(rows[0]["updated_at"], json!("2024-01-01T09:00:00"));
        assert_eq!(rows[0]["created_on"], json!("2023-12-31T00:00:00"));
        assert_eq!(rows[1]["created_on"], json!("2024-01-01T00:00:00"));
        assert_eq!(rows[1]["avatar"], json!("AQI="));
        assert_eq!(rows[2]["updated_at"], json!("2024-01-03T09:00:00.500"));
        assert_eq!(rows[0]["score"], json!(1.5));
    }

    #[tokio::test]
    async fn test_extract_column_order() {
        let dir = TempDir::new().unwrap();
        let source = utc_source(&dir);

        let rows = source.extract("users", &Predicate::All).await.unwrap();
        let columns: Vec<&String> = rows[0].keys().collect();
        assert_eq!(
            columns,
            vec!["id", "name", "avatar", "score", "updated_at", "created_on", "is_deleted"]
        );
    }

    #[tokio::test]
    async fn test_extract_modified_since_mixed_formats() {
        let dir = TempDir::new().unwrap();
        let source = utc_source(&dir);

        let since = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let rows = source
            .extract("users", &Predicate::modified_since("updated_at", Some(since)))
            .await
            .unwrap();

        let ids: Vec<&Value> = rows.iter().map(|r| &r["id"]).collect();
        assert_eq!(ids, vec![&json!(2), &json!(3)]);
    }

    #[tokio::test]
    async fn test_extract_soft_deleted() {
        let dir = TempDir::new().unwrap();
        let source = utc_source(&dir);

        let rows = source
            .extract(
                "users",
                &Predicate::soft_deleted_since("updated_at", None, "is_deleted"),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], json!("lee"));
    }

    #[tokio::test]
    async fn test_missing_table_is_extraction_error() {
        let dir = TempDir::new().unwrap();
        let source = utc_source(&dir);

        let err = source.extract("orders", &Predicate::All).await.unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }

    #[tokio::test]
    async fn test_rejects_injection() {
        let dir = TempDir::new().unwrap();
        let source = utc_source(&dir);

        let err = source
            .extract("users; DROP TABLE users", &Predicate::All)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_missing_database() {
        assert!(SqliteSource::new("/nonexistent/source.db").is_err());
    }
}
