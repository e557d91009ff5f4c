//! Taskline Core Library
//!
//! This crate provides the core functionality for Taskline, an offline-first
//! task list that keeps a local cache in step with a revision-guarded REST
//! service.
//!
//! # Architecture
//!
//! - **Local cache**: Source of truth while offline, persisted to a flat
//!   file, an Automerge document or SQLite
//! - **Remote service**: Optimistic concurrency via a monotonically
//!   increasing list revision
//! - **Dirty flag**: Persisted marker that the two may have diverged,
//!   cleared by the next successful load or patch
//!
//! # Quick Start
//!
//! ```text
//! let store = ReconciliationStore::open(&Config::load()?)?;
//! store.load().await?;
//!
//! store.add(Item::new("Buy milk")).await?;
//! let open = store.fetch(&ItemQuery::default().hide_completed()).await?;
//! ```
//!
//! # Modules
//!
//! - `store`: Reconciliation store (main entry point)
//! - `models`: Task items and list queries
//! - `gateway`: Retrying, revision-aware facade over the remote API
//! - `remote`: HTTP client, wire format and revision tracking
//! - `retry`: Backoff policy and cancellation
//! - `storage`: Local persistence backends
//! - `sync`: Persisted dirty flag
//! - `config`: Application configuration

pub mod config;
pub mod gateway;
pub mod models;
pub mod remote;
pub mod retry;
pub mod storage;
pub mod store;
pub mod sync;

pub use config::Config;
pub use gateway::{SyncGateway, WriteOutcome};
pub use models::{Importance, Item, ItemQuery, SortKey, SortOrder};
pub use remote::{HttpItemApi, ItemApi, RemoteError, RevisionTracker};
#[cfg(any(test, feature = "test-util"))]
pub use remote::InMemoryItemApi;
pub use retry::{CancelToken, RetryPolicy};
pub use storage::{LocalStore, StorageError, StorageKind};
pub use store::{PatchOutcome, ReconciliationStore};
pub use sync::{SyncState, SyncStatus};
