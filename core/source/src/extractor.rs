//! Source extractor trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use indexsync_common::{validate_identifier, Result, Row};

/// Row filter applied during extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Every row of the table.
    All,
    /// Rows whose `column` is strictly later than `since`.
    ///
    /// `since == None` means the table was never synced: the bound becomes
    /// the earliest representable time, so every row with a non-null
    /// modification time matches.
    ModifiedSince {
        column: String,
        since: Option<DateTime<Utc>>,
    },
    /// `ModifiedSince` rows whose `flag_column` equals 1.
    ModifiedSinceFlagged {
        column: String,
        since: Option<DateTime<Utc>>,
        flag_column: String,
    },
}

impl Predicate {
    /// Build a modified-since predicate.
    pub fn modified_since(column: impl Into<String>, since: Option<DateTime<Utc>>) -> Self {
        Predicate::ModifiedSince {
            column: column.into(),
            since,
        }
    }

    /// Build a modified-since predicate restricted to soft-deleted rows.
    pub fn soft_deleted_since(
        column: impl Into<String>,
        since: Option<DateTime<Utc>>,
        flag_column: impl Into<String>,
    ) -> Self {
        Predicate::ModifiedSinceFlagged {
            column: column.into(),
            since,
            flag_column: flag_column.into(),
        }
    }

    /// Check that every column the predicate names is a safe identifier.
    ///
    /// # Errors
    /// - `InvalidInput` for malformed column names
    pub fn validate(&self) -> Result<()> {
        match self {
            Predicate::All => Ok(()),
            Predicate::ModifiedSince { column, .. } => validate_identifier(column),
            Predicate::ModifiedSinceFlagged {
                column,
                flag_column,
                ..
            } => {
                validate_identifier(column)?;
                validate_identifier(flag_column)
            }
        }
    }
}

/// Read-only access to a relational source.
///
/// Implementations must render all temporal columns as canonical
/// ISO-8601 text (see [`crate::timestamp`]) and report every failure
/// (connectivity, authentication, malformed query) as
/// `Error::Extraction`. Extractors never retry internally.
#[async_trait]
pub trait SourceExtractor: Send + Sync {
    /// Get the extractor name (e.g., "sqlite", "memory").
    fn name(&self) -> &str;

    /// Extract rows of `table` matching `predicate`, in source order.
    ///
    /// # Errors
    /// - `InvalidInput` if the table or a predicate column is malformed
    /// - `Extraction` for any source-side failure
    async fn extract(&self, table: &str, predicate: &Predicate) -> Result<Vec<Row>>;
}
