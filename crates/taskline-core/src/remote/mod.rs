//! Remote task list
//!
//! ## Protocol
//!
//! REST over HTTPS with a bearer token:
//! - `GET /todo/list`, `PATCH /todo/list` for the whole list
//! - `GET|PUT|DELETE /todo/list/{id}`, `POST /todo/list` for single items
//!
//! The server versions the whole list with one revision counter. Each call
//! presents the revision the client last saw; writes with a stale revision
//! are rejected (`RemoteError::BadRevision`).

mod client;
mod error;
#[cfg(any(test, feature = "test-util"))]
mod memory;
mod revision;
mod wire;

pub use client::{HttpItemApi, ItemApi, Revisioned, REVISION_HEADER};
pub use error::RemoteError;
#[cfg(any(test, feature = "test-util"))]
pub use memory::{InMemoryItemApi, RecordedCall};
pub use revision::{RevisionLease, RevisionTracker};
pub use wire::{ItemEnvelope, ListEnvelope};
