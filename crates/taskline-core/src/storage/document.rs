//! Object-store backend
//!
//! Keeps the collection in an Automerge document: a root `items` map with
//! one nested map per item and one key per field. Every mutation appends
//! the document's incremental changes to the backing file, so the file is
//! the store's own transaction log; `save` and `clear` compact it into a
//! single snapshot. A change that cannot be written is undone in memory,
//! and the next write compacts instead of appending.
//!
//! Automerge map keys iterate in lexical order, so each item also carries
//! a `position` used to restore insertion order on load.

use std::borrow::Cow;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use automerge::{transaction::Transactable, AutoCommit, ObjId, ObjType, ReadDoc, ScalarValue, Value, ROOT};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::error::{StorageError, StorageResult};
use super::file::atomic_write;
use super::{LocalBackend, StorageKind};
use crate::models::{Importance, Item};

/// Keys used in the Automerge document structure
mod keys {
    pub const ITEMS: &str = "items";
    pub const SCHEMA_VERSION: &str = "schema_version";

    pub const ID: &str = "id";
    pub const TEXT: &str = "text";
    pub const IMPORTANCE: &str = "importance";
    pub const DUE_DATE: &str = "due_date";
    pub const IS_COMPLETED: &str = "is_completed";
    pub const COLOR: &str = "color";
    pub const DATE_CREATED: &str = "date_created";
    pub const DATE_EDITED: &str = "date_edited";
    pub const LAST_UPDATED_BY: &str = "last_updated_by";
    pub const POSITION: &str = "position";
}

/// Current schema version
pub const CURRENT_SCHEMA_VERSION: u64 = 1;

/// Automerge-backed item storage
pub struct DocumentBackend {
    path: PathBuf,
    doc: AutoCommit,
    /// Set after a failed write; the log tail may be torn
    needs_compaction: bool,
}

impl DocumentBackend {
    /// Open the document at `path`, creating an empty one if none exists
    pub fn open(path: PathBuf) -> StorageResult<Self> {
        if path.exists() {
            let bytes = fs::read(&path).map_err(|e| StorageError::from_read(e, path.clone()))?;
            let doc = AutoCommit::load(&bytes).map_err(|e| StorageError::InvalidFormat {
                path: path.clone(),
                format: "Automerge",
                details: e.to_string(),
            })?;
            let backend = Self {
                path,
                doc,
                needs_compaction: false,
            };
            backend.items_obj()?;
            return Ok(backend);
        }

        let mut doc = AutoCommit::new();
        doc.put(ROOT, keys::SCHEMA_VERSION, CURRENT_SCHEMA_VERSION)?;
        doc.put_object(ROOT, keys::ITEMS, ObjType::Map)?;

        let mut backend = Self {
            path,
            doc,
            needs_compaction: false,
        };
        backend.compact()?;
        Ok(backend)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the file as a single snapshot of the document
    pub fn compact(&mut self) -> StorageResult<()> {
        let bytes = self.doc.save();
        atomic_write(&self.path, &bytes)?;
        self.needs_compaction = false;
        Ok(())
    }

    /// Apply `change` and write it out, restoring the document if either
    /// step fails
    fn commit<F>(&mut self, compact: bool, change: F) -> StorageResult<()>
    where
        F: FnOnce(&mut Self) -> StorageResult<()>,
    {
        let checkpoint = self.doc.clone();
        let result = change(self).and_then(|()| {
            if compact || self.needs_compaction {
                self.compact()
            } else {
                self.append_changes()
            }
        });

        if let Err(ref e) = result {
            warn!(path = ?self.path, error = %e, "Document write failed, change undone");
            self.doc = checkpoint;
            self.needs_compaction = true;
        }
        result
    }

    /// Append changes made since the last write to the log
    fn append_changes(&mut self) -> StorageResult<()> {
        let bytes = self.doc.save_incremental();
        if bytes.is_empty() {
            return Ok(());
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StorageError::from_io(e, self.path.clone()))?;
        file.write_all(&bytes)
            .map_err(|e| StorageError::from_io(e, self.path.clone()))?;
        file.sync_data()
            .map_err(|e| StorageError::from_io(e, self.path.clone()))?;
        Ok(())
    }

    fn items_obj(&self) -> StorageResult<ObjId> {
        match self.doc.get(ROOT, keys::ITEMS)? {
            Some((_, id)) => Ok(id),
            None => Err(self.invalid("missing items map")),
        }
    }

    fn next_position(&self, items: &ObjId) -> StorageResult<i64> {
        let mut max = -1;
        for key in self.doc.keys(items) {
            if let Some((_, obj)) = self.doc.get(items, &key)? {
                max = max.max(self.get_i64(&obj, keys::POSITION)?.unwrap_or(-1));
            }
        }
        Ok(max + 1)
    }

    fn write_item(&mut self, item: &Item, position: i64) -> StorageResult<()> {
        let items = self.items_obj()?;
        // A fresh map per write drops fields that became absent
        let obj = self.doc.put_object(&items, item.id.as_str(), ObjType::Map)?;

        self.doc.put(&obj, keys::ID, item.id.clone())?;
        self.doc.put(&obj, keys::TEXT, item.text.clone())?;
        self.doc.put(&obj, keys::IMPORTANCE, item.importance.as_str())?;
        if let Some(due) = item.due {
            self.doc.put(&obj, keys::DUE_DATE, due.timestamp())?;
        }
        self.doc.put(&obj, keys::IS_COMPLETED, item.done)?;
        if let Some(ref color) = item.color {
            self.doc.put(&obj, keys::COLOR, color.clone())?;
        }
        self.doc
            .put(&obj, keys::DATE_CREATED, item.created_at.timestamp())?;
        if let Some(edited) = item.changed_at {
            self.doc.put(&obj, keys::DATE_EDITED, edited.timestamp())?;
        }
        if let Some(ref by) = item.last_updated_by {
            self.doc.put(&obj, keys::LAST_UPDATED_BY, by.clone())?;
        }
        self.doc.put(&obj, keys::POSITION, position)?;
        Ok(())
    }

    fn read_item(&self, obj: &ObjId, id: String) -> StorageResult<Item> {
        let importance = self.get_optional_string(obj, keys::IMPORTANCE)?;
        let created = self
            .get_i64(obj, keys::DATE_CREATED)?
            .ok_or_else(|| self.invalid(&format!("item {} has no {}", id, keys::DATE_CREATED)))?;

        Ok(Item {
            text: self.get_optional_string(obj, keys::TEXT)?.unwrap_or_default(),
            importance: importance
                .as_deref()
                .map(Importance::parse_lenient)
                .unwrap_or_default(),
            due: self.get_instant(obj, keys::DUE_DATE)?,
            done: self.get_bool(obj, keys::IS_COMPLETED)?,
            color: self.get_optional_string(obj, keys::COLOR)?,
            created_at: DateTime::from_timestamp(created, 0)
                .ok_or_else(|| self.invalid(&format!("invalid timestamp {}", created)))?,
            changed_at: self.get_instant(obj, keys::DATE_EDITED)?,
            last_updated_by: self.get_optional_string(obj, keys::LAST_UPDATED_BY)?,
            id,
        })
    }

    fn get_optional_string(&self, obj: &ObjId, key: &str) -> StorageResult<Option<String>> {
        match self.doc.get(obj, key)? {
            Some((value, _)) => Ok(value.to_str().map(|s| s.to_string())),
            None => Ok(None),
        }
    }

    fn get_i64(&self, obj: &ObjId, key: &str) -> StorageResult<Option<i64>> {
        match self.doc.get(obj, key)? {
            Some((value, _)) => value
                .to_i64()
                .map(Some)
                .ok_or_else(|| self.invalid(&format!("{} is not an integer", key))),
            None => Ok(None),
        }
    }

    fn get_bool(&self, obj: &ObjId, key: &str) -> StorageResult<bool> {
        match self.doc.get(obj, key)? {
            Some((Value::Scalar(scalar), _)) => match scalar {
                Cow::Borrowed(ScalarValue::Boolean(b)) => Ok(*b),
                Cow::Owned(ScalarValue::Boolean(b)) => Ok(b),
                _ => Err(self.invalid(&format!("{} is not a boolean", key))),
            },
            Some(_) => Err(self.invalid(&format!("{} is not a boolean", key))),
            None => Ok(false),
        }
    }

    fn get_instant(&self, obj: &ObjId, key: &str) -> StorageResult<Option<DateTime<Utc>>> {
        Ok(self
            .get_i64(obj, key)?
            .and_then(|secs| DateTime::from_timestamp(secs, 0)))
    }

    fn invalid(&self, details: &str) -> StorageError {
        StorageError::InvalidFormat {
            path: self.path.clone(),
            format: "Automerge",
            details: details.to_string(),
        }
    }
}

impl LocalBackend for DocumentBackend {
    fn kind(&self) -> StorageKind {
        StorageKind::Object
    }

    fn load(&mut self) -> StorageResult<Vec<Item>> {
        let items = self.items_obj()?;

        let mut positioned = Vec::new();
        for key in self.doc.keys(&items) {
            if let Some((_, obj)) = self.doc.get(&items, &key)? {
                let position = self.get_i64(&obj, keys::POSITION)?.unwrap_or(i64::MAX);
                positioned.push((position, self.read_item(&obj, key)?));
            }
        }

        positioned.sort_by_key(|(position, _)| *position);
        Ok(positioned.into_iter().map(|(_, item)| item).collect())
    }

    fn insert(&mut self, item: &Item, _snapshot: &[Item]) -> StorageResult<()> {
        let items = self.items_obj()?;
        let position = self.next_position(&items)?;
        self.commit(false, |backend| backend.write_item(item, position))?;
        debug!(id = %item.id, position, "Inserted item into document");
        Ok(())
    }

    fn update(&mut self, item: &Item, _snapshot: &[Item]) -> StorageResult<()> {
        let items = self.items_obj()?;
        let existing = match self.doc.get(&items, item.id.as_str())? {
            Some((_, obj)) => self.get_i64(&obj, keys::POSITION)?,
            None => None,
        };
        let position = match existing {
            Some(position) => position,
            None => self.next_position(&items)?,
        };
        self.commit(false, |backend| backend.write_item(item, position))?;
        debug!(id = %item.id, "Updated item in document");
        Ok(())
    }

    fn remove(&mut self, id: &str, _snapshot: &[Item]) -> StorageResult<()> {
        let items = self.items_obj()?;
        if self.doc.get(&items, id)?.is_some() {
            self.commit(false, |backend| Ok(backend.doc.delete(&items, id)?))?;
            debug!(id, "Deleted item from document");
        }
        Ok(())
    }

    fn clear(&mut self) -> StorageResult<()> {
        self.commit(true, |backend| {
            backend.doc.put_object(ROOT, keys::ITEMS, ObjType::Map)?;
            Ok(())
        })
    }

    fn replace_all(&mut self, items: &[Item]) -> StorageResult<()> {
        self.commit(true, |backend| {
            backend.doc.put_object(ROOT, keys::ITEMS, ObjType::Map)?;
            for (position, item) in items.iter().enumerate() {
                backend.write_item(item, position as i64)?;
            }
            Ok(())
        })
    }

    fn save(&mut self, _snapshot: &[Item]) -> StorageResult<()> {
        self.compact()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn sample() -> Item {
        let mut item = Item::with_id("doc-1", "Plan vacation")
            .with_importance(Importance::Low)
            .with_due(Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap())
            .with_color("#ABCDEF")
            .completed(true);
        item.changed_at = Some(Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap());
        item.last_updated_by = Some("tablet".to_string());
        item
    }

    #[test]
    fn test_open_creates_document_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("items.automerge");
        let mut backend = DocumentBackend::open(path.clone()).unwrap();
        assert!(path.exists());
        assert!(backend.load().unwrap().is_empty());
    }

    #[test]
    fn test_changes_survive_reopen_without_compaction() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("items.automerge");
        let full = sample();
        let bare = Item::with_id("doc-2", "Read a book");

        {
            let mut backend = DocumentBackend::open(path.clone()).unwrap();
            backend.insert(&full, &[]).unwrap();
            backend.insert(&bare, &[]).unwrap();
        }

        let mut reopened = DocumentBackend::open(path).unwrap();
        assert_eq!(reopened.load().unwrap(), vec![full, bare]);
    }

    #[test]
    fn test_update_drops_absent_fields_and_keeps_position() {
        let temp_dir = TempDir::new().unwrap();
        let mut backend = DocumentBackend::open(temp_dir.path().join("d.automerge")).unwrap();
        let first = sample();
        let second = Item::with_id("doc-0", "second");
        backend.insert(&first, &[]).unwrap();
        backend.insert(&second, &[]).unwrap();

        let mut cleared = first.clone();
        cleared.color = None;
        cleared.due = None;
        backend.update(&cleared, &[]).unwrap();

        let loaded = backend.load().unwrap();
        assert_eq!(loaded, vec![cleared, second]);
    }

    #[test]
    fn test_remove_and_clear() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("d.automerge");
        let mut backend = DocumentBackend::open(path.clone()).unwrap();
        backend.insert(&sample(), &[]).unwrap();
        backend.insert(&Item::with_id("x", "x"), &[]).unwrap();

        backend.remove("doc-1", &[]).unwrap();
        backend.remove("missing", &[]).unwrap();
        assert_eq!(backend.load().unwrap().len(), 1);

        backend.clear().unwrap();
        let mut reopened = DocumentBackend::open(path).unwrap();
        assert!(reopened.load().unwrap().is_empty());
    }

    #[test]
    fn test_garbage_file_is_invalid_format() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("d.automerge");
        fs::write(&path, b"definitely not automerge").unwrap();

        let err = DocumentBackend::open(path).err().unwrap();
        assert!(matches!(err, StorageError::InvalidFormat { .. }));
    }

    #[test]
    fn test_failed_write_is_undone_and_next_write_compacts() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("d.automerge");
        let mut backend = DocumentBackend::open(path.clone()).unwrap();
        let kept = Item::with_id("a", "kept");
        backend.insert(&kept, &[]).unwrap();

        // A directory in place of the log makes the append fail
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();
        assert!(backend.insert(&Item::with_id("b", "lost"), &[]).is_err());
        assert_eq!(backend.load().unwrap(), vec![kept.clone()]);

        fs::remove_dir(&path).unwrap();
        let later = Item::with_id("c", "later");
        backend.insert(&later, &[]).unwrap();

        let mut reopened = DocumentBackend::open(path).unwrap();
        assert_eq!(reopened.load().unwrap(), vec![kept, later]);
    }
}
