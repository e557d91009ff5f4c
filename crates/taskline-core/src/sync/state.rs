//! Sync state persistence
//!
//! Stores the dirty flag between sessions so a divergence detected before a
//! restart is still repaired after it.

use std::fmt;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::whole_seconds;
use crate::storage::file::atomic_write;

/// Whether local state is known to mirror the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Local mirrors remote as of the last successful sync
    Clean,
    /// A remote operation failed or its outcome is unknown
    Dirty,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncStatus::Clean => "clean",
            SyncStatus::Dirty => "dirty",
        })
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Persisted {
    dirty: bool,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    last_synced_at: Option<DateTime<Utc>>,
}

/// Persistent dirty flag
#[derive(Debug, Default)]
pub struct SyncState {
    dirty: bool,
    last_synced_at: Option<DateTime<Utc>>,
    /// Path to persist state
    path: Option<PathBuf>,
}

impl SyncState {
    /// Create a sync state (in-memory only)
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sync state that persists to disk
    ///
    /// A missing file means clean. An unreadable one is treated as dirty,
    /// since nothing proves the last write was confirmed.
    pub fn with_path(path: PathBuf) -> Result<Self> {
        let mut state = Self {
            path: Some(path.clone()),
            ..Self::default()
        };

        if path.exists() {
            let json = fs::read_to_string(&path).context("Failed to read sync state")?;
            match serde_json::from_str::<Persisted>(&json) {
                Ok(persisted) => {
                    state.dirty = persisted.dirty;
                    state.last_synced_at = persisted.last_synced_at;
                }
                Err(e) => {
                    warn!(path = ?path, error = %e, "Corrupt sync state, assuming dirty");
                    state.dirty = true;
                }
            }
        }

        Ok(state)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn status(&self) -> SyncStatus {
        if self.dirty {
            SyncStatus::Dirty
        } else {
            SyncStatus::Clean
        }
    }

    /// When the server last confirmed the local state
    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        self.last_synced_at
    }

    /// Flag a divergence; memory only changes once the flag is on disk
    pub fn mark_dirty(&mut self) -> Result<()> {
        if self.dirty {
            return Ok(());
        }
        self.persist(true, self.last_synced_at)?;
        self.dirty = true;
        debug!("Sync state is now dirty");
        Ok(())
    }

    /// Record a confirmed sync
    pub fn mark_clean(&mut self) -> Result<()> {
        let synced_at = Some(whole_seconds(Utc::now()));
        self.persist(false, synced_at)?;
        if self.dirty {
            debug!("Sync state is now clean");
        }
        self.dirty = false;
        self.last_synced_at = synced_at;
        Ok(())
    }

    /// Save state to disk
    pub fn save(&self) -> Result<()> {
        self.persist(self.dirty, self.last_synced_at)
    }

    fn persist(&self, dirty: bool, last_synced_at: Option<DateTime<Utc>>) -> Result<()> {
        let Some(ref path) = self.path else {
            return Ok(());
        };

        let persisted = Persisted {
            dirty,
            last_synced_at,
        };
        let json = serde_json::to_string_pretty(&persisted)?;
        atomic_write(path, json.as_bytes()).context("Failed to save sync state")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_new_state_is_clean() {
        let state = SyncState::new();
        assert!(!state.is_dirty());
        assert_eq!(state.status(), SyncStatus::Clean);
        assert!(state.last_synced_at().is_none());
    }

    #[test]
    fn test_missing_file_is_clean() {
        let temp_dir = TempDir::new().unwrap();
        let state = SyncState::with_path(temp_dir.path().join("sync_state.json")).unwrap();
        assert!(!state.is_dirty());
    }

    #[test]
    fn test_sync_state_persistence() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sync_state.json");

        {
            let mut state = SyncState::with_path(path.clone()).unwrap();
            state.mark_dirty().unwrap();
        }
        {
            let mut state = SyncState::with_path(path.clone()).unwrap();
            assert!(state.is_dirty());
            state.mark_clean().unwrap();
        }

        let state = SyncState::with_path(path).unwrap();
        assert_eq!(state.status(), SyncStatus::Clean);
        assert!(state.last_synced_at().is_some());
    }

    #[test]
    fn test_corrupt_file_is_dirty() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sync_state.json");
        fs::write(&path, "{ not json").unwrap();

        let state = SyncState::with_path(path).unwrap();
        assert!(state.is_dirty());
    }

    #[test]
    fn test_failed_save_leaves_state_unchanged() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sync_state.json");
        let mut state = SyncState::with_path(path.clone()).unwrap();

        // A directory in the way makes every save fail
        fs::create_dir(&path).unwrap();
        assert!(state.mark_dirty().is_err());
        assert!(!state.is_dirty());

        fs::remove_dir(&path).unwrap();
        state.mark_dirty().unwrap();
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();
        assert!(state.mark_clean().is_err());
        assert!(state.is_dirty());
        assert!(state.last_synced_at().is_none());
    }
}
