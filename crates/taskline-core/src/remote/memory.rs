//! In-process task-list server
//!
//! Implements `ItemApi` against a list held in memory, with the same
//! revision rule as the real service: every write must present the current
//! revision and bumps it by one on success. Failures and latency can be
//! injected, and every call is recorded, which makes it the remote end for
//! tests.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::client::{ItemApi, Revisioned};
use super::error::RemoteError;
use crate::models::Item;

/// One call as the server saw it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub op: &'static str,
    pub id: Option<String>,
    pub revision: u32,
}

#[derive(Debug, Default)]
struct ServerState {
    items: Vec<Item>,
    revision: u32,
    failures: VecDeque<RemoteError>,
    offline: bool,
    latency: Duration,
    calls: Vec<RecordedCall>,
}

/// `ItemApi` backed by an in-memory list
#[derive(Debug, Default)]
pub struct InMemoryItemApi {
    state: Mutex<ServerState>,
}

impl InMemoryItemApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(self, items: Vec<Item>) -> Self {
        self.lock().items = items;
        self
    }

    pub fn at_revision(self, revision: u32) -> Self {
        self.lock().revision = revision;
        self
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        self.lock().latency = latency;
        self
    }

    pub fn revision(&self) -> u32 {
        self.lock().revision
    }

    pub fn items(&self) -> Vec<Item> {
        self.lock().items.clone()
    }

    /// Simulate a write by another client
    pub fn bump_revision(&self, by: u32) {
        self.lock().revision += by;
    }

    /// Fail the next call with `error`; queued failures are consumed in order
    pub fn fail_next(&self, error: RemoteError) {
        self.lock().failures.push_back(error);
    }

    /// While offline every call fails with `TransportFailed`
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        // A test that panicked mid-call leaves the state usable
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record the call, wait out the latency, then apply any injected failure
    async fn enter(&self, op: &'static str, id: Option<&str>, revision: u32) -> Result<(), RemoteError> {
        let latency = {
            let mut state = self.lock();
            state.calls.push(RecordedCall {
                op,
                id: id.map(str::to_string),
                revision,
            });
            state.latency
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }
        if state.offline {
            return Err(RemoteError::TransportFailed("server unreachable".to_string()));
        }
        Ok(())
    }
}

impl ServerState {
    fn check_revision(&self, presented: u32) -> Result<(), RemoteError> {
        if presented != self.revision {
            return Err(RemoteError::BadRevision);
        }
        Ok(())
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.id == id)
    }

    fn commit(&mut self) -> u32 {
        self.revision += 1;
        self.revision
    }
}

#[async_trait]
impl ItemApi for InMemoryItemApi {
    async fn fetch_list(&self, revision: u32) -> Result<Revisioned<Vec<Item>>, RemoteError> {
        self.enter("fetch_list", None, revision).await?;
        let state = self.lock();
        Ok((state.items.clone(), state.revision))
    }

    async fn replace_list(
        &self,
        items: &[Item],
        revision: u32,
    ) -> Result<Revisioned<Vec<Item>>, RemoteError> {
        self.enter("replace_list", None, revision).await?;
        let mut state = self.lock();
        state.check_revision(revision)?;

        for item in items {
            match state.position(&item.id) {
                Some(index) => state.items[index] = item.clone(),
                None => state.items.push(item.clone()),
            }
        }
        let revision = state.commit();
        Ok((state.items.clone(), revision))
    }

    async fn fetch_item(&self, id: &str, revision: u32) -> Result<Revisioned<Item>, RemoteError> {
        self.enter("fetch_item", Some(id), revision).await?;
        let state = self.lock();
        let index = state.position(id).ok_or(RemoteError::NotFound)?;
        Ok((state.items[index].clone(), state.revision))
    }

    async fn create_item(
        &self,
        item: &Item,
        revision: u32,
    ) -> Result<Revisioned<Item>, RemoteError> {
        self.enter("create_item", Some(&item.id), revision).await?;
        let mut state = self.lock();
        state.check_revision(revision)?;

        match state.position(&item.id) {
            Some(index) => state.items[index] = item.clone(),
            None => state.items.push(item.clone()),
        }
        let revision = state.commit();
        Ok((item.clone(), revision))
    }

    async fn replace_item(
        &self,
        item: &Item,
        revision: u32,
    ) -> Result<Revisioned<Item>, RemoteError> {
        self.enter("replace_item", Some(&item.id), revision).await?;
        let mut state = self.lock();
        state.check_revision(revision)?;

        let index = state.position(&item.id).ok_or(RemoteError::NotFound)?;
        state.items[index] = item.clone();
        let revision = state.commit();
        Ok((item.clone(), revision))
    }

    async fn delete_item(
        &self,
        item: &Item,
        revision: u32,
    ) -> Result<Revisioned<Item>, RemoteError> {
        self.enter("delete_item", Some(&item.id), revision).await?;
        let mut state = self.lock();
        state.check_revision(revision)?;

        let index = state.position(&item.id).ok_or(RemoteError::NotFound)?;
        let removed = state.items.remove(index);
        let revision = state.commit();
        Ok((removed, revision))
    }
}
