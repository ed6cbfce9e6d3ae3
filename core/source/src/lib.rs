//! Source extraction for indexsync.
//!
//! This module provides a trait-based interface for reading rows out of a
//! relational source table, plus two implementations:
//! - `MemorySource`: in-memory tables for tests and development
//! - `SqliteSource`: a SQLite database read through rusqlite
//!
//! # Design Principles
//! - Read-only: extractors never modify the source
//! - Canonical temporal text: every temporal column is rendered as
//!   ISO-8601 wall-clock text in the source's time zone, so predicates
//!   and documents agree on one format
//! - One error category: every failure surfaces as `Error::Extraction`

pub mod extractor;
pub mod memory;
pub mod sqlite;
pub mod timestamp;

pub use extractor::{Predicate, SourceExtractor};
pub use memory::MemorySource;
pub use sqlite::SqliteSource;
pub use timestamp::SourceTimeZone;
