//! Reconciliation store
//!
//! Owns the local cache, the persisted dirty flag and the sync gateway, and
//! decides how local and remote state converge.
//!
//! ## State machine
//!
//! - `Clean --(remote op fails)--> Dirty`
//! - `Dirty --(successful patch)--> Clean`
//! - `any --(successful load)--> Clean` (local replaced by the server list)
//!
//! Local writes always land first and are never rolled back because the
//! server was unreachable; the local cache is the source of truth until the
//! next successful load or patch.
//!
//! ## Usage
//!
//! ```ignore
//! let store = ReconciliationStore::open(&Config::load()?)?;
//! store.load().await?;
//! store.add(Item::new("Buy milk")).await?;
//! ```
//!
//! Sync operations and writes queue on one FIFO lock, so they complete in
//! submission order. The cache and the dirty flag sit behind a second lock
//! that is never held across a remote call, so reads stay prompt while a
//! write is still retrying against the server.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::config::Config;
use crate::gateway::{SyncGateway, WriteOutcome};
use crate::models::{Item, ItemQuery};
use crate::remote::{HttpItemApi, RemoteError};
use crate::retry::CancelToken;
use crate::storage::LocalStore;
use crate::sync::{SyncState, SyncStatus};

/// What a patch request ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// The store was clean; nothing was sent
    NotNeeded,
    /// The server merged the local list and the store is clean
    Patched,
    /// The patch failed; the store stays dirty
    Failed,
    /// The caller cancelled; nothing changed
    Cancelled,
}

struct Inner {
    local: LocalStore,
    state: SyncState,
}

/// Local cache kept in step with the remote list
pub struct ReconciliationStore {
    /// Held for the whole of every write and sync
    order: Mutex<()>,
    inner: Mutex<Inner>,
    gateway: Arc<SyncGateway>,
    repair_on_load: bool,
}

impl ReconciliationStore {
    pub fn new(local: LocalStore, state: SyncState, gateway: Arc<SyncGateway>) -> Self {
        Self {
            order: Mutex::new(()),
            inner: Mutex::new(Inner { local, state }),
            gateway,
            repair_on_load: true,
        }
    }

    /// Open the configured backend, sync state and HTTP client
    pub fn open(config: &Config) -> Result<Self> {
        let local = LocalStore::open_with_config(config)
            .with_context(|| format!("Failed to open {} storage", config.storage))?;
        let state = SyncState::with_path(config.sync_state_path())?;
        let api = HttpItemApi::from_config(config).context("Failed to build HTTP client")?;
        let gateway = SyncGateway::new(Arc::new(api), config.retry_policy());

        Ok(Self::new(local, state, Arc::new(gateway)).with_repair_on_load(config.repair_on_load))
    }

    /// Whether a failed load is followed by an immediate patch
    pub fn with_repair_on_load(mut self, repair: bool) -> Self {
        self.repair_on_load = repair;
        self
    }

    pub fn gateway(&self) -> &Arc<SyncGateway> {
        &self.gateway
    }

    pub fn is_syncing(&self) -> bool {
        self.gateway.is_syncing()
    }

    /// Why the last remote call failed, if it did
    pub fn last_failure(&self) -> Option<RemoteError> {
        self.gateway.last_failure()
    }

    pub async fn status(&self) -> SyncStatus {
        self.lock().await.state.status()
    }

    pub async fn is_dirty(&self) -> bool {
        self.lock().await.state.is_dirty()
    }

    pub async fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        self.lock().await.state.last_synced_at()
    }

    // ==================== Reads ====================

    pub async fn fetch(&self, query: &ItemQuery) -> Result<Vec<Item>> {
        let inner = self.lock().await;
        inner.local.fetch(query).context("Failed to query local items")
    }

    /// The whole collection in stored order
    pub async fn items(&self) -> Vec<Item> {
        self.lock().await.local.fetch_all().to_vec()
    }

    pub async fn get(&self, id: &str) -> Option<Item> {
        self.lock().await.local.get(id).cloned()
    }

    pub async fn completed_count(&self) -> usize {
        self.lock().await.local.completed_count()
    }

    // ==================== Sync ====================

    /// Replace the local collection with the server's list
    pub async fn load(&self) -> Result<SyncStatus> {
        self.load_cancellable(&CancelToken::new()).await
    }

    /// `load` that stops early, changing nothing, when `cancel` fires
    pub async fn load_cancellable(&self, cancel: &CancelToken) -> Result<SyncStatus> {
        let _order = self.order.lock().await;

        match self.gateway.load(cancel).await {
            Some(items) => {
                let mut inner = self.lock().await;
                inner
                    .local
                    .replace_all(items)
                    .context("Failed to store items from server")?;
                inner.state.mark_clean()?;
                info!(count = inner.local.len(), "Local cache replaced from server");
            }
            None if cancel.is_cancelled() => {
                debug!("Load cancelled");
            }
            None => {
                self.lock().await.state.mark_dirty()?;
                if self.repair_on_load {
                    self.patch_ordered(cancel, false).await?;
                }
            }
        }

        Ok(self.status().await)
    }

    /// Push the local collection to the server if the store is dirty
    pub async fn patch(&self) -> Result<PatchOutcome> {
        self.patch_cancellable(&CancelToken::new()).await
    }

    pub async fn patch_cancellable(&self, cancel: &CancelToken) -> Result<PatchOutcome> {
        let _order = self.order.lock().await;
        self.patch_ordered(cancel, false).await
    }

    /// Patch even when the store believes it is clean
    pub async fn force_patch(&self) -> Result<PatchOutcome> {
        let _order = self.order.lock().await;
        self.patch_ordered(&CancelToken::new(), true).await
    }

    // ==================== Mutations ====================

    /// Add an item unless its id is already present
    ///
    /// Returns `false` for a duplicate id; nothing is sent in that case.
    pub async fn add(&self, item: Item) -> Result<bool> {
        let _order = self.order.lock().await;
        let cancel = CancelToken::new();
        let repaired = self.repair_if_dirty(&cancel).await?;

        let added = self
            .lock()
            .await
            .local
            .add(item.clone())
            .context("Failed to add item locally")?;
        if !added {
            debug!(id = %item.id, "Duplicate add ignored");
            return Ok(false);
        }

        let outcome = self.gateway.add(&item, &cancel).await;
        self.settle(repaired && outcome.is_confirmed()).await?;
        Ok(true)
    }

    /// Insert or replace by id; returns whether the id existed locally
    pub async fn add_or_update(&self, item: Item) -> Result<bool> {
        let _order = self.order.lock().await;
        let cancel = CancelToken::new();
        let repaired = self.repair_if_dirty(&cancel).await?;

        let existed = self
            .lock()
            .await
            .local
            .add_or_update(item.clone())
            .context("Failed to save item locally")?;

        let outcome = if existed {
            match self.gateway.update(&item, &cancel).await {
                // Never reached the server; create it there instead
                WriteOutcome::NotFound => self.gateway.add(&item, &cancel).await,
                other => other,
            }
        } else {
            self.gateway.add(&item, &cancel).await
        };

        self.settle(repaired && outcome.is_confirmed()).await?;
        Ok(existed)
    }

    /// Remove an item locally, then remotely
    ///
    /// Returns the removed item, or `None` (and contacts nobody) if the id
    /// is not in the local collection.
    pub async fn delete(&self, id: &str) -> Result<Option<Item>> {
        let _order = self.order.lock().await;
        if !self.lock().await.local.contains(id) {
            return Ok(None);
        }

        let cancel = CancelToken::new();
        let repaired = self.repair_if_dirty(&cancel).await?;

        let removed = self
            .lock()
            .await
            .local
            .delete(id)
            .context("Failed to delete item locally")?;
        let Some(removed) = removed else {
            return Ok(None);
        };

        // Already gone remotely is as good as deleted
        let confirmed = match self.gateway.delete(&removed, &cancel).await {
            WriteOutcome::Confirmed | WriteOutcome::NotFound => true,
            WriteOutcome::Failed => false,
        };
        self.settle(repaired && confirmed).await?;
        Ok(Some(removed))
    }

    /// Flush the local cache once queued writes have finished
    pub async fn flush(&self) -> Result<()> {
        let _order = self.order.lock().await;
        self.lock()
            .await
            .local
            .save()
            .context("Failed to flush local cache")
    }

    async fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().await
    }

    /// Patch a dirty store; true when the store is clean afterwards
    async fn repair_if_dirty(&self, cancel: &CancelToken) -> Result<bool> {
        if !self.is_dirty().await {
            return Ok(true);
        }
        debug!("Store is dirty, patching before write");
        let outcome = self.patch_ordered(cancel, false).await?;
        Ok(matches!(outcome, PatchOutcome::Patched | PatchOutcome::NotNeeded))
    }

    /// Patch while the caller holds the order lock
    async fn patch_ordered(&self, cancel: &CancelToken, force: bool) -> Result<PatchOutcome> {
        let items = {
            let inner = self.lock().await;
            if !force && !inner.state.is_dirty() {
                return Ok(PatchOutcome::NotNeeded);
            }
            inner.local.fetch_all().to_vec()
        };

        match self.gateway.patch(&items, cancel).await {
            Some(merged) => {
                let mut inner = self.lock().await;
                inner
                    .local
                    .replace_all(merged)
                    .context("Failed to store merged items")?;
                inner.state.mark_clean()?;
                info!(count = inner.local.len(), "Local cache reconciled with server");
                Ok(PatchOutcome::Patched)
            }
            None if cancel.is_cancelled() => Ok(PatchOutcome::Cancelled),
            None => {
                self.lock().await.state.mark_dirty()?;
                Ok(PatchOutcome::Failed)
            }
        }
    }

    /// Record a write's outcome; only a confirmed write on a repaired
    /// store may clear the dirty flag
    async fn settle(&self, clean: bool) -> Result<()> {
        let mut inner = self.lock().await;
        if clean {
            inner.state.mark_clean()
        } else {
            inner.state.mark_dirty()
        }
    }
}
