//! Common utilities and types shared across indexsync crates.
//!
//! This module provides the error taxonomy and the row/document model
//! that flows from the source extractor, through the transform, into the
//! document store.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{validate_identifier, Document, DocumentId, Row};
