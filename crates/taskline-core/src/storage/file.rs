//! Flat-file backend
//!
//! Serializes the whole collection on every mutation using atomic writes
//! (write to temp file, then rename) so the cache file is never left
//! partially written.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::codec;
use super::error::{StorageError, StorageResult};
use super::{FileFormat, LocalBackend, StorageKind};
use crate::models::Item;

/// Backend that rewrites one JSON or CSV file
pub struct FileBackend {
    path: PathBuf,
    format: FileFormat,
}

impl FileBackend {
    pub fn new(path: PathBuf, format: FileFormat) -> Self {
        Self { path, format }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    fn write(&self, items: &[Item]) -> StorageResult<()> {
        let data = match self.format {
            FileFormat::Json => codec::encode_json(items).map_err(|e| StorageError::InvalidFormat {
                path: self.path.clone(),
                format: "JSON",
                details: e.to_string(),
            })?,
            FileFormat::Csv => codec::encode_csv(items),
        };

        atomic_write(&self.path, data.as_bytes())?;
        debug!(path = ?self.path, count = items.len(), "Saved items to file");
        Ok(())
    }
}

impl LocalBackend for FileBackend {
    fn kind(&self) -> StorageKind {
        StorageKind::File
    }

    fn load(&mut self) -> StorageResult<Vec<Item>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let data = fs::read_to_string(&self.path)
            .map_err(|e| StorageError::from_read(e, self.path.clone()))?;

        let (decoded, format) = match self.format {
            FileFormat::Json => (codec::decode_json(&data), "JSON"),
            FileFormat::Csv => (codec::decode_csv(&data), "CSV"),
        };

        let items = decoded.map_err(|details| StorageError::InvalidFormat {
            path: self.path.clone(),
            format,
            details,
        })?;
        debug!(path = ?self.path, count = items.len(), "Loaded items from file");
        Ok(items)
    }

    fn insert(&mut self, _item: &Item, snapshot: &[Item]) -> StorageResult<()> {
        self.write(snapshot)
    }

    fn update(&mut self, _item: &Item, snapshot: &[Item]) -> StorageResult<()> {
        self.write(snapshot)
    }

    fn remove(&mut self, _id: &str, snapshot: &[Item]) -> StorageResult<()> {
        self.write(snapshot)
    }

    fn clear(&mut self) -> StorageResult<()> {
        self.write(&[])
    }

    fn replace_all(&mut self, items: &[Item]) -> StorageResult<()> {
        self.write(items)
    }

    fn save(&mut self, snapshot: &[Item]) -> StorageResult<()> {
        self.write(snapshot)
    }
}

/// Write data to a file atomically
///
/// 1. Write to a temporary file in the same directory
/// 2. Sync the file to disk
/// 3. Rename the temp file to the target path
pub(crate) fn atomic_write(path: &Path, data: &[u8]) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| StorageError::CreateDirectory {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let temp_path = temp_path_for(path);

    let mut file =
        File::create(&temp_path).map_err(|e| StorageError::from_io(e, temp_path.clone()))?;
    file.write_all(data)
        .map_err(|e| StorageError::from_io(e, temp_path.clone()))?;
    file.sync_all()
        .map_err(|e| StorageError::from_io(e, temp_path.clone()))?;

    fs::rename(&temp_path, path).map_err(|source| StorageError::AtomicWriteFailed {
        from: temp_path.clone(),
        to: path.to_path_buf(),
        source,
    })?;

    Ok(())
}

/// `items.json` -> `items.json.tmp`, in the same directory so the rename
/// stays on one filesystem
fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_loads_empty() {
        let temp_dir = TempDir::new().unwrap();
        let mut backend = FileBackend::new(temp_dir.path().join("items.json"), FileFormat::Json);
        assert!(backend.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_and_reload_both_formats() {
        let temp_dir = TempDir::new().unwrap();
        let items = vec![
            Item::with_id("1", "Buy milk"),
            Item::with_id("2", "Call mom").with_color("#00FF00"),
        ];

        for format in [FileFormat::Json, FileFormat::Csv] {
            let path = temp_dir.path().join(format!("items.{}", format.extension()));
            let mut backend = FileBackend::new(path.clone(), format);
            backend.save(&items).unwrap();

            let mut reopened = FileBackend::new(path, format);
            assert_eq!(reopened.load().unwrap(), items);
        }
    }

    #[test]
    fn test_clear_leaves_empty_collection() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("items.csv");
        let mut backend = FileBackend::new(path.clone(), FileFormat::Csv);
        backend.save(&[Item::with_id("1", "x")]).unwrap();

        backend.clear().unwrap();
        assert!(path.exists());
        assert!(backend.load().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_file_is_invalid_format() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("items.json");
        fs::write(&path, "not json").unwrap();

        let mut backend = FileBackend::new(path, FileFormat::Json);
        let err = backend.load().unwrap_err();
        assert!(matches!(err, StorageError::InvalidFormat { format: "JSON", .. }));
    }

    #[test]
    fn test_atomic_write_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let nested_path = temp_dir.path().join("a").join("b").join("items.json");

        atomic_write(&nested_path, b"[]").unwrap();

        assert!(nested_path.exists());
        assert_eq!(fs::read_to_string(&nested_path).unwrap(), "[]");
        assert!(!temp_path_for(&nested_path).exists());
    }

    #[test]
    fn test_temp_names_differ_per_file() {
        let dir = Path::new("/data");
        let json = temp_path_for(&dir.join("items.json"));
        let csv = temp_path_for(&dir.join("items.csv"));

        assert_eq!(json, dir.join("items.json.tmp"));
        assert_eq!(csv, dir.join("items.csv.tmp"));
        assert_ne!(json, temp_path_for(&dir.join("items")));
    }
}
