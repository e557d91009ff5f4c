//! Sync gateway
//!
//! The façade the reconciliation layer talks to. Each public call:
//!
//! 1. counts itself in flight (drives `is_syncing`)
//! 2. runs the remote request under the retry policy, where one attempt is
//!    "send with the tracked revision; on `BadRevision` refresh the
//!    revision and send once more"
//! 3. logs the outcome and hands back a plain result, so callers never
//!    match on `RemoteError`
//!
//! Every attempt holds the revision lease from the first send until the
//! response is recorded, so no two requests ever present the same revision.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::models::Item;
use crate::remote::{ItemApi, RemoteError, RevisionTracker};
use crate::retry::{CancelToken, RetryPolicy};

/// Result of a remote write as seen by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The server accepted the write
    Confirmed,
    /// The item does not exist remotely
    NotFound,
    /// Any other failure, including cancellation
    Failed,
}

impl WriteOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, WriteOutcome::Confirmed)
    }
}

#[derive(Debug, Clone, Copy)]
enum Request<'a> {
    FetchList,
    ReplaceList(&'a [Item]),
    FetchItem(&'a str),
    Create(&'a Item),
    Replace(&'a Item),
    Delete(&'a Item),
}

impl Request<'_> {
    fn name(&self) -> &'static str {
        match self {
            Request::FetchList => "load",
            Request::ReplaceList(_) => "patch",
            Request::FetchItem(_) => "fetch",
            Request::Create(_) => "add",
            Request::Replace(_) => "update",
            Request::Delete(_) => "delete",
        }
    }

    fn id(&self) -> &str {
        match self {
            Request::FetchList | Request::ReplaceList(_) => "",
            Request::FetchItem(id) => id,
            Request::Create(item) | Request::Replace(item) | Request::Delete(item) => &item.id,
        }
    }
}

enum Response {
    List(Vec<Item>),
    Item(Item),
}

impl Response {
    fn into_list(self) -> Result<Vec<Item>, RemoteError> {
        match self {
            Response::List(items) => Ok(items),
            Response::Item(_) => Err(RemoteError::TransportFailed("expected a list".to_string())),
        }
    }

    fn into_item(self) -> Result<Item, RemoteError> {
        match self {
            Response::Item(item) => Ok(item),
            Response::List(_) => Err(RemoteError::TransportFailed("expected an item".to_string())),
        }
    }
}

/// Retrying, revision-aware access to the remote list
pub struct SyncGateway {
    api: Arc<dyn ItemApi>,
    revision: RevisionTracker,
    policy: RetryPolicy,
    in_flight: AtomicUsize,
    syncing: watch::Sender<bool>,
    last_failure: Mutex<Option<RemoteError>>,
}

impl SyncGateway {
    pub fn new(api: Arc<dyn ItemApi>, policy: RetryPolicy) -> Self {
        let (syncing, _rx) = watch::channel(false);
        Self {
            api,
            revision: RevisionTracker::new(),
            policy,
            in_flight: AtomicUsize::new(0),
            syncing,
            last_failure: Mutex::new(None),
        }
    }

    /// Start from a known revision instead of zero
    pub fn with_revision(mut self, revision: u32) -> Self {
        self.revision = RevisionTracker::starting_at(revision);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Last revision confirmed by the server
    pub async fn revision(&self) -> u32 {
        self.revision.current().await
    }

    /// True while at least one public call is in flight
    pub fn is_syncing(&self) -> bool {
        *self.syncing.borrow()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Why the most recent call failed; cleared by the next success
    ///
    /// Cancellations are not recorded.
    pub fn last_failure(&self) -> Option<RemoteError> {
        self.failure_slot().clone()
    }

    /// Watch `is_syncing` transitions
    pub fn subscribe_syncing(&self) -> watch::Receiver<bool> {
        self.syncing.subscribe()
    }

    /// Fetch the whole remote list
    pub async fn load(&self, cancel: &CancelToken) -> Option<Vec<Item>> {
        let _guard = InFlight::enter(self);
        let request = Request::FetchList;
        match self.execute(request, cancel).await.and_then(Response::into_list) {
            Ok(items) => {
                self.clear_failure();
                info!(count = items.len(), "Loaded items from server");
                Some(items)
            }
            Err(e) => {
                self.log_failure(request, &e);
                None
            }
        }
    }

    /// Send the whole local list; returns the server's merged list
    pub async fn patch(&self, items: &[Item], cancel: &CancelToken) -> Option<Vec<Item>> {
        let _guard = InFlight::enter(self);
        let request = Request::ReplaceList(items);
        match self.execute(request, cancel).await.and_then(Response::into_list) {
            Ok(merged) => {
                self.clear_failure();
                info!(sent = items.len(), received = merged.len(), "Patched items on server");
                Some(merged)
            }
            Err(e) => {
                self.log_failure(request, &e);
                None
            }
        }
    }

    pub async fn fetch(&self, id: &str, cancel: &CancelToken) -> Option<Item> {
        let _guard = InFlight::enter(self);
        let request = Request::FetchItem(id);
        match self.execute(request, cancel).await.and_then(Response::into_item) {
            Ok(item) => {
                self.clear_failure();
                Some(item)
            }
            Err(e) => {
                self.log_failure(request, &e);
                None
            }
        }
    }

    pub async fn add(&self, item: &Item, cancel: &CancelToken) -> WriteOutcome {
        self.write(Request::Create(item), cancel).await
    }

    pub async fn update(&self, item: &Item, cancel: &CancelToken) -> WriteOutcome {
        self.write(Request::Replace(item), cancel).await
    }

    pub async fn delete(&self, item: &Item, cancel: &CancelToken) -> WriteOutcome {
        self.write(Request::Delete(item), cancel).await
    }

    async fn write(&self, request: Request<'_>, cancel: &CancelToken) -> WriteOutcome {
        let _guard = InFlight::enter(self);
        match self.execute(request, cancel).await {
            Ok(_) => {
                self.clear_failure();
                info!(op = request.name(), id = request.id(), "Remote write confirmed");
                WriteOutcome::Confirmed
            }
            Err(e) => {
                self.log_failure(request, &e);
                if e == RemoteError::NotFound {
                    WriteOutcome::NotFound
                } else {
                    WriteOutcome::Failed
                }
            }
        }
    }

    async fn execute(
        &self,
        request: Request<'_>,
        cancel: &CancelToken,
    ) -> Result<Response, RemoteError> {
        self.policy.run(cancel, move || self.attempt(request)).await
    }

    /// One attempt, including the refresh-and-resend on a stale revision
    async fn attempt(&self, request: Request<'_>) -> Result<Response, RemoteError> {
        let mut lease = self.revision.lease().await;

        let result = match self.dispatch(request, lease.current()).await {
            Err(RemoteError::BadRevision) => {
                debug!(
                    op = request.name(),
                    revision = lease.current(),
                    "Stale revision, refreshing"
                );
                lease.refresh(self.api.as_ref()).await?;
                self.dispatch(request, lease.current()).await
            }
            other => other,
        };

        let (response, revision) = result?;
        lease.record(revision);
        Ok(response)
    }

    async fn dispatch(
        &self,
        request: Request<'_>,
        revision: u32,
    ) -> Result<(Response, u32), RemoteError> {
        let api = self.api.as_ref();
        match request {
            Request::FetchList => api
                .fetch_list(revision)
                .await
                .map(|(items, rev)| (Response::List(items), rev)),
            Request::ReplaceList(items) => api
                .replace_list(items, revision)
                .await
                .map(|(items, rev)| (Response::List(items), rev)),
            Request::FetchItem(id) => api
                .fetch_item(id, revision)
                .await
                .map(|(item, rev)| (Response::Item(item), rev)),
            Request::Create(item) => api
                .create_item(item, revision)
                .await
                .map(|(item, rev)| (Response::Item(item), rev)),
            Request::Replace(item) => api
                .replace_item(item, revision)
                .await
                .map(|(item, rev)| (Response::Item(item), rev)),
            Request::Delete(item) => api
                .delete_item(item, revision)
                .await
                .map(|(item, rev)| (Response::Item(item), rev)),
        }
    }

    fn failure_slot(&self) -> std::sync::MutexGuard<'_, Option<RemoteError>> {
        self.last_failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn clear_failure(&self) {
        *self.failure_slot() = None;
    }

    fn log_failure(&self, request: Request<'_>, error: &RemoteError) {
        if *error != RemoteError::Cancelled {
            *self.failure_slot() = Some(error.clone());
        }

        let op = request.name();
        let id = request.id();
        match error {
            RemoteError::Cancelled => info!(op, id, "Remote call cancelled"),
            RemoteError::BadRevision => {
                warn!(op, id, kind = error.kind(), "Revision still stale after refresh")
            }
            RemoteError::AuthFailed => {
                warn!(op, id, kind = error.kind(), "Server rejected the token")
            }
            RemoteError::NotFound => warn!(op, id, kind = error.kind(), "Item not found on server"),
            RemoteError::ServerError(status) => {
                warn!(op, id, kind = error.kind(), status, "Server error")
            }
            RemoteError::TransportFailed(reason) => {
                warn!(op, id, kind = error.kind(), %reason, "Server unreachable")
            }
        }
    }

    fn set_in_flight(&self, entering: bool) {
        // Counting inside the channel's lock keeps the count and the flag in step
        self.syncing.send_if_modified(|syncing| {
            let count = if entering {
                self.in_flight.fetch_add(1, Ordering::SeqCst) + 1
            } else {
                self.in_flight.fetch_sub(1, Ordering::SeqCst) - 1
            };
            let now = count > 0;
            let changed = *syncing != now;
            *syncing = now;
            changed
        });
    }
}

/// Keeps a call counted until it returns or is dropped
struct InFlight<'a> {
    gateway: &'a SyncGateway,
}

impl<'a> InFlight<'a> {
    fn enter(gateway: &'a SyncGateway) -> Self {
        gateway.set_in_flight(true);
        Self { gateway }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.gateway.set_in_flight(false);
    }
}
