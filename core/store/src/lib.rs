//! Document store abstraction for indexsync.
//!
//! This module provides a trait-based interface for search-index backends
//! (Meilisearch, in-memory) and a store registry for dynamic backend
//! resolution.
//!
//! # Design Principles
//! - Backend isolation: no backend-specific logic in the sync engine
//! - Asynchronous tasks: write-family operations return a task handle,
//!   completion is observed through `wait_for_task`
//! - Unified error semantics: write failures are `Error::Write`, other
//!   backend failures are `Error::Store`

pub mod memory;
pub mod meilisearch;
pub mod registry;
pub mod store;

pub use memory::MemoryStore;
pub use meilisearch::{MeilisearchClient, MeilisearchConfig, MeilisearchStore};
pub use registry::{create_default_registry, StoreFactory, StoreRegistry};
pub use store::{CollectionStats, DocumentStore, Health, TaskHandle, TaskInfo, TaskStatus};
