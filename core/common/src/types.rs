//! Row and document model shared by extractors, transforms and stores.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A single source row: column name to scalar value, in column order.
///
/// Temporal columns are already rendered as canonical ISO-8601 text by the
/// extractor that produced the row.
pub type Row = Map<String, Value>;

/// Identifier of a document in the target store.
///
/// Search engines accept integer or string primary keys; both forms are
/// kept so the value round-trips without changing its JSON type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DocumentId {
    Int(i64),
    Str(String),
}

impl DocumentId {
    /// Extract an identifier from a JSON value.
    ///
    /// Only integers and non-empty strings qualify as identifiers.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(DocumentId::Int),
            Value::String(s) if !s.is_empty() => Some(DocumentId::Str(s.clone())),
            _ => None,
        }
    }

    /// JSON form of the identifier.
    pub fn to_value(&self) -> Value {
        match self {
            DocumentId::Int(i) => Value::from(*i),
            DocumentId::Str(s) => Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentId::Int(i) => write!(f, "{}", i),
            DocumentId::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for DocumentId {
    fn from(id: i64) -> Self {
        DocumentId::Int(id)
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        DocumentId::Str(id.to_string())
    }
}

/// Target-side representation of a row.
///
/// Serializes as a plain JSON object so it can be sent to a store as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    /// Create an empty document.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Get a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Set a field value, returning the previous one.
    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    /// Remove a field.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    /// Primary key value of this document, if present and usable as an id.
    pub fn id(&self, primary_key: &str) -> Option<DocumentId> {
        self.0.get(primary_key).and_then(DocumentId::from_value)
    }

    /// Field names in order.
    pub fn fields(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the document has no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the underlying map.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consume into the underlying map.
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Row> for Document {
    fn from(row: Row) -> Self {
        Self(row)
    }
}

/// Validate a table, column or collection identifier.
///
/// Identifiers are interpolated into queries and URLs, so only a
/// conservative character set is accepted: a letter or underscore
/// followed by letters, digits, `_`, `$`, `#`, `.` or `-`.
///
/// # Errors
/// - Returns `InvalidInput` for empty or malformed identifiers
pub fn validate_identifier(ident: &str) -> crate::Result<()> {
    let mut chars = ident.chars();
    let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '#' | '.' | '-'));

    if valid_start && valid_rest {
        Ok(())
    } else {
        Err(crate::Error::InvalidInput(format!(
            "Invalid identifier: '{}'",
            ident
        )))
    }
}
