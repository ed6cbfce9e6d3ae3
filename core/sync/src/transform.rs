//! Row to document transformation.

use std::collections::{HashMap, HashSet};

use indexsync_common::{Document, Row};

/// Pure mapping from an extracted row to a target document.
///
/// Transforms are applied to every row of a pass, in extraction order,
/// before anything is written. They must not fail: rows that cannot be
/// mapped should still produce a document and let the store reject it.
pub trait Transform: Send + Sync {
    /// Map one row to one document.
    fn apply(&self, row: Row) -> Document;
}

/// Passes rows through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransform;

impl Transform for IdentityTransform {
    fn apply(&self, row: Row) -> Document {
        Document::from(row)
    }
}

impl<F> Transform for F
where
    F: Fn(Row) -> Document + Send + Sync,
{
    fn apply(&self, row: Row) -> Document {
        self(row)
    }
}

/// Column projection and renaming.
///
/// Names in `include` and `exclude` refer to source columns; renames are
/// applied after filtering. Column order is preserved.
#[derive(Debug, Clone, Default)]
pub struct FieldMapping {
    renames: HashMap<String, String>,
    include: Option<HashSet<String>>,
    exclude: HashSet<String>,
}

impl FieldMapping {
    /// Create a mapping that keeps every column as-is.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rename column `from` to field `to`.
    pub fn rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.renames.insert(from.into(), to.into());
        self
    }

    /// Keep only the listed columns.
    pub fn include<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include
            .get_or_insert_with(HashSet::new)
            .extend(columns.into_iter().map(Into::into));
        self
    }

    /// Drop a column.
    pub fn exclude(mut self, column: impl Into<String>) -> Self {
        self.exclude.insert(column.into());
        self
    }

    fn keeps(&self, column: &str) -> bool {
        if self.exclude.contains(column) {
            return false;
        }
        self.include
            .as_ref()
            .map_or(true, |include| include.contains(column))
    }
}

impl Transform for FieldMapping {
    fn apply(&self, row: Row) -> Document {
        let mut document = Document::new();
        for (column, value) in row {
            if !self.keeps(&column) {
                continue;
            }
            let field = self.renames.get(&column).cloned().unwrap_or(column);
            document.insert(field, value);
        }
        document
    }
}
