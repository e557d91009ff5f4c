//! Last known list revision
//!
//! A write presented with a stale revision is rejected by the server, and a
//! write presented with a revision bumped by a *different* in-flight call
//! silently clobbers that call's change. Callers therefore hold a
//! `RevisionLease` for the whole request: read the revision, send, record the
//! response, then release.

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use super::client::ItemApi;
use super::error::RemoteError;

/// Owner of the tracked revision
#[derive(Debug, Default)]
pub struct RevisionTracker {
    current: Mutex<u32>,
}

impl RevisionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(revision: u32) -> Self {
        Self {
            current: Mutex::new(revision),
        }
    }

    /// Wait for exclusive use of the revision
    pub async fn lease(&self) -> RevisionLease<'_> {
        RevisionLease {
            guard: self.current.lock().await,
        }
    }

    /// Snapshot of the revision; waits for any request in flight
    pub async fn current(&self) -> u32 {
        *self.current.lock().await
    }
}

/// Exclusive access to the revision for the length of one request
pub struct RevisionLease<'a> {
    guard: MutexGuard<'a, u32>,
}

impl RevisionLease<'_> {
    pub fn current(&self) -> u32 {
        *self.guard
    }

    /// Record the revision returned by a successful call
    ///
    /// The server's counter never goes backwards, so a lower value is
    /// ignored; `refresh` is the only way to move it down.
    pub fn record(&mut self, revision: u32) {
        if revision < *self.guard {
            warn!(
                current = *self.guard,
                returned = revision,
                "Server returned an older revision, keeping current"
            );
            return;
        }
        *self.guard = revision;
    }

    /// Re-read the revision from the server, ignoring the list payload
    pub async fn refresh(&mut self, api: &dyn ItemApi) -> Result<u32, RemoteError> {
        let (_, revision) = api.fetch_list(0).await?;
        debug!(from = *self.guard, to = revision, "Refreshed revision");
        *self.guard = revision;
        Ok(revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryItemApi;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_record_is_monotonic() {
        let tracker = RevisionTracker::new();
        {
            let mut lease = tracker.lease().await;
            lease.record(5);
            lease.record(3);
            assert_eq!(lease.current(), 5);
            lease.record(8);
        }
        assert_eq!(tracker.current().await, 8);
    }

    #[tokio::test]
    async fn test_refresh_is_authoritative() {
        let api = InMemoryItemApi::new().at_revision(2);
        let tracker = RevisionTracker::starting_at(10);

        let revision = tracker.lease().await.refresh(&api).await.unwrap();
        assert_eq!(revision, 2);
        assert_eq!(tracker.current().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_is_exclusive() {
        let tracker = Arc::new(RevisionTracker::new());
        let lease = tracker.lease().await;

        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                let mut lease = tracker.lease().await;
                let seen = lease.current();
                lease.record(seen + 1);
                seen
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        let mut lease = lease;
        lease.record(7);
        drop(lease);

        assert_eq!(waiter.await.unwrap(), 7);
        assert_eq!(tracker.current().await, 8);
    }
}
