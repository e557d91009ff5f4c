//! Reconciliation state
//!
//! The dirty flag is the only sync state that outlives a process: it says
//! "the last remote write was not confirmed". `ReconciliationStore` sets it
//! on failure and clears it on a successful load or patch.

mod state;

pub use state::{SyncState, SyncStatus};
