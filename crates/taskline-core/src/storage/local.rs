//! Backend-agnostic local cache
//!
//! `LocalStore` keeps the collection in memory and forwards every mutation
//! to its backend. A write the backend rejects is rolled back in memory, so
//! both sides always agree.

use std::collections::HashSet;

use tracing::{debug, warn};

use super::error::StorageResult;
use super::{open_backend, LocalBackend, StorageKind};
use crate::config::Config;
use crate::models::{Item, ItemQuery};

/// Offline collection of items over one pluggable backend
pub struct LocalStore {
    backend: Box<dyn LocalBackend>,
    items: Vec<Item>,
}

impl LocalStore {
    /// Open a store over `backend`, loading whatever it already holds
    pub fn open(mut backend: Box<dyn LocalBackend>) -> StorageResult<Self> {
        let loaded = backend.load()?;
        let items = dedupe(loaded);
        debug!(backend = %backend.kind(), count = items.len(), "Opened local store");
        Ok(Self { backend, items })
    }

    /// Open the backend selected by configuration
    pub fn open_with_config(config: &Config) -> StorageResult<Self> {
        Self::open(open_backend(config)?)
    }

    pub fn kind(&self) -> StorageKind {
        self.backend.kind()
    }

    /// Insert `item` unless its id is already present
    ///
    /// Returns `false` for a duplicate id, in which case nothing changes.
    pub fn add(&mut self, item: Item) -> StorageResult<bool> {
        if self.contains(&item.id) {
            debug!(id = %item.id, "Item already present, skipping add");
            return Ok(false);
        }

        self.items.push(item);
        let index = self.items.len() - 1;
        if let Err(e) = self.backend.insert(&self.items[index], &self.items) {
            self.items.pop();
            return Err(e);
        }
        Ok(true)
    }

    /// Insert or replace by id
    ///
    /// Returns whether an item with this id existed before the call.
    pub fn add_or_update(&mut self, item: Item) -> StorageResult<bool> {
        match self.position(&item.id) {
            Some(index) => {
                let previous = std::mem::replace(&mut self.items[index], item);
                if let Err(e) = self.backend.update(&self.items[index], &self.items) {
                    self.items[index] = previous;
                    return Err(e);
                }
                Ok(true)
            }
            None => {
                self.add(item)?;
                Ok(false)
            }
        }
    }

    /// Remove an item, returning it if it was present
    pub fn delete(&mut self, id: &str) -> StorageResult<Option<Item>> {
        let Some(index) = self.position(id) else {
            return Ok(None);
        };

        let removed = self.items.remove(index);
        if let Err(e) = self.backend.remove(id, &self.items) {
            self.items.insert(index, removed);
            return Err(e);
        }
        Ok(Some(removed))
    }

    /// Filtered and sorted view of the collection
    pub fn fetch(&self, query: &ItemQuery) -> StorageResult<Vec<Item>> {
        self.backend.query(query, &self.items)
    }

    /// The whole collection in stored order
    pub fn fetch_all(&self) -> &[Item] {
        &self.items
    }

    pub fn get(&self, id: &str) -> Option<&Item> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn completed_count(&self) -> usize {
        self.items.iter().filter(|item| item.done).count()
    }

    /// Empty the collection and its backing store
    pub fn clear(&mut self) -> StorageResult<()> {
        self.backend.clear()?;
        self.items.clear();
        Ok(())
    }

    /// Swap in a new collection, e.g. the server's authoritative list
    pub fn replace_all(&mut self, items: Vec<Item>) -> StorageResult<()> {
        let items = dedupe(items);
        self.backend.replace_all(&items)?;
        self.items = items;
        debug!(count = self.items.len(), "Replaced local collection");
        Ok(())
    }

    /// Flush to durable storage
    pub fn save(&mut self) -> StorageResult<()> {
        self.backend.save(&self.items)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.id == id)
    }
}

/// Keep the first item for each id
fn dedupe(items: Vec<Item>) -> Vec<Item> {
    let mut seen = HashSet::new();
    let before = items.len();
    let unique: Vec<Item> = items
        .into_iter()
        .filter(|item| seen.insert(item.id.clone()))
        .collect();
    if unique.len() != before {
        warn!(dropped = before - unique.len(), "Dropped items with duplicate ids");
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Importance, SortKey, SortOrder};
    use crate::storage::{
        DocumentBackend, FileBackend, FileFormat, SqliteBackend, StorageError,
    };
    use std::io;
    use std::path::PathBuf;
    use tempfile::TempDir;

    /// Backend whose writes can be made to fail
    struct FlakyBackend {
        fail_writes: bool,
    }

    impl FlakyBackend {
        fn check(&mut self) -> StorageResult<()> {
            if self.fail_writes {
                return Err(StorageError::from_io(
                    io::Error::new(io::ErrorKind::PermissionDenied, "read-only"),
                    PathBuf::from("/flaky"),
                ));
            }
            Ok(())
        }
    }

    impl LocalBackend for FlakyBackend {
        fn kind(&self) -> StorageKind {
            StorageKind::File
        }
        fn load(&mut self) -> StorageResult<Vec<Item>> {
            Ok(Vec::new())
        }
        fn insert(&mut self, _item: &Item, _snapshot: &[Item]) -> StorageResult<()> {
            self.check()
        }
        fn update(&mut self, _item: &Item, _snapshot: &[Item]) -> StorageResult<()> {
            self.check()
        }
        fn remove(&mut self, _id: &str, _snapshot: &[Item]) -> StorageResult<()> {
            self.check()
        }
        fn clear(&mut self) -> StorageResult<()> {
            self.check()
        }
        fn save(&mut self, _snapshot: &[Item]) -> StorageResult<()> {
            self.check()
        }
    }

    type MakeBackend = Box<dyn Fn() -> Box<dyn LocalBackend>>;

    fn backends(dir: &TempDir) -> Vec<(&'static str, MakeBackend)> {
        let json = dir.path().join("items.json");
        let csv = dir.path().join("items.csv");
        let doc = dir.path().join("items.automerge");
        let db = dir.path().join("items.sqlite3");
        vec![
            (
                "json",
                Box::new(move || -> Box<dyn LocalBackend> {
                    Box::new(FileBackend::new(json.clone(), FileFormat::Json))
                }) as MakeBackend,
            ),
            (
                "csv",
                Box::new(move || -> Box<dyn LocalBackend> {
                    Box::new(FileBackend::new(csv.clone(), FileFormat::Csv))
                }) as MakeBackend,
            ),
            (
                "object",
                Box::new(move || -> Box<dyn LocalBackend> {
                    Box::new(DocumentBackend::open(doc.clone()).unwrap())
                }) as MakeBackend,
            ),
            (
                "sqlite",
                Box::new(move || -> Box<dyn LocalBackend> {
                    Box::new(SqliteBackend::open(&db).unwrap())
                }) as MakeBackend,
            ),
        ]
    }

    #[test]
    fn test_add_then_fetch() {
        let mut store = LocalStore::open(Box::new(SqliteBackend::open_in_memory().unwrap())).unwrap();
        assert!(store.add(Item::with_id("1", "Buy milk")).unwrap());

        let fetched = store.fetch(&ItemQuery::default()).unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].id, "1");
        assert_eq!(fetched[0].text, "Buy milk");
        assert_eq!(fetched[0].importance, Importance::Basic);
        assert!(!fetched[0].done);
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut store = LocalStore::open(Box::new(SqliteBackend::open_in_memory().unwrap())).unwrap();
        let item = Item::with_id("1", "Buy milk");
        assert!(store.add(item.clone()).unwrap());
        assert!(!store.add(item.clone().with_importance(Importance::Low)).unwrap());
        assert_eq!(store.fetch_all(), &[item]);
    }

    #[test]
    fn test_add_or_update_reports_prior_existence() {
        let mut store = LocalStore::open(Box::new(SqliteBackend::open_in_memory().unwrap())).unwrap();
        assert!(!store.add_or_update(Item::with_id("1", "draft")).unwrap());
        assert!(store.add_or_update(Item::with_id("1", "final")).unwrap());
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("1").unwrap().text, "final");
    }

    #[test]
    fn test_delete_missing_returns_none() {
        let mut store = LocalStore::open(Box::new(SqliteBackend::open_in_memory().unwrap())).unwrap();
        assert!(store.delete("missing-id").unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_every_backend_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let full = Item::with_id("1", "Buy \"oat\" milk,\nsemi-skimmed")
            .with_importance(Importance::Important)
            .with_due(chrono::Utc::now())
            .with_color("#FF0000")
            .completed(true)
            .edited(Some("phone"));
        let bare = Item::with_id("2", "Call mom");

        for (name, make) in backends(&dir) {
            {
                let mut store = LocalStore::open(make()).unwrap();
                store.add(full.clone()).unwrap();
                store.add(bare.clone()).unwrap();
                store.add_or_update(bare.clone().with_importance(Importance::Low)).unwrap();
                store.save().unwrap();
            }

            let reopened = LocalStore::open(make()).unwrap();
            assert_eq!(
                reopened.fetch_all(),
                &[full.clone(), bare.clone().with_importance(Importance::Low)],
                "backend {}",
                name
            );
        }
    }

    #[test]
    fn test_every_backend_clears_and_replaces() {
        let dir = TempDir::new().unwrap();
        let server = vec![Item::with_id("s1", "from server"), Item::with_id("s2", "also")];

        for (name, make) in backends(&dir) {
            {
                let mut store = LocalStore::open(make()).unwrap();
                store.add(Item::with_id("local", "local only")).unwrap();
                store.clear().unwrap();
                assert!(store.is_empty());
                store.replace_all(server.clone()).unwrap();
            }

            let reopened = LocalStore::open(make()).unwrap();
            assert_eq!(reopened.fetch_all(), server.as_slice(), "backend {}", name);
        }
    }

    #[test]
    fn test_replace_all_drops_duplicate_ids() {
        let mut store = LocalStore::open(Box::new(SqliteBackend::open_in_memory().unwrap())).unwrap();
        store
            .replace_all(vec![Item::with_id("1", "first"), Item::with_id("1", "second")])
            .unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("1").unwrap().text, "first");
    }

    #[test]
    fn test_fetch_applies_query() {
        let mut store = LocalStore::open(Box::new(FlakyBackend { fail_writes: false })).unwrap();
        store.add(Item::with_id("1", "low").with_importance(Importance::Low)).unwrap();
        store.add(Item::with_id("2", "done").completed(true)).unwrap();
        store
            .add(Item::with_id("3", "high").with_importance(Importance::Important))
            .unwrap();

        let query = ItemQuery::default()
            .hide_completed()
            .sorted_by(SortKey::Importance, SortOrder::Descending);
        let ids: Vec<_> = store.fetch(&query).unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["3", "1"]);
        assert_eq!(store.completed_count(), 1);
    }

    #[test]
    fn test_failed_writes_leave_memory_unchanged() {
        let kept = vec![Item::with_id("1", "kept")];
        let mut store = LocalStore {
            backend: Box::new(FlakyBackend { fail_writes: true }),
            items: kept.clone(),
        };

        assert!(store.add(Item::with_id("2", "new")).is_err());
        assert!(store.add_or_update(Item::with_id("1", "changed")).is_err());
        assert!(store.delete("1").is_err());
        assert!(store.clear().is_err());
        assert!(store.replace_all(Vec::new()).is_err());
        assert_eq!(store.fetch_all(), kept.as_slice());
    }
}
