//! Meilisearch document store for indexsync.
//!
//! This module provides a search-index backend using Meilisearch with:
//! - Bearer API key authentication
//! - Index lifecycle (create/exists/delete) mapped to collections
//! - Asynchronous task polling with optional deadlines
//! - Full DocumentStore trait implementation

pub mod client;
pub mod store;

pub use client::{MeilisearchClient, MeilisearchConfig, DEFAULT_HOST};
pub use store::{create_meilisearch_store, MeilisearchStore};
