//! Storage layer
//!
//! Keeps the local collection of items available offline.
//!
//! ## Architecture
//!
//! - **LocalStore**: in-memory collection plus one backend; the only owner
//!   of the backing file or database handle
//! - **LocalBackend**: persistence capability implemented by
//!   - `FileBackend`: whole collection rewritten on every mutation (JSON or CSV)
//!   - `DocumentBackend`: Automerge document, one map per item, changes
//!     appended to a log file
//!   - `SqliteBackend`: one row per item, statements keyed by id
//!
//! All three satisfy the same contract: after a mutation returns, a new
//! `LocalStore` opened on the same path sees an equivalent collection.

pub mod codec;
pub mod document;
pub mod error;
pub mod file;
pub mod local;
pub mod schema;
pub mod sqlite;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::models::{Item, ItemQuery};

pub use document::DocumentBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use local::LocalStore;
pub use sqlite::SqliteBackend;

/// Which backend a `LocalStore` persists through
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Flat file (JSON or CSV)
    File,
    /// Automerge object store
    #[default]
    Object,
    /// SQLite database
    Sqlite,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StorageKind::File => "file",
            StorageKind::Object => "object",
            StorageKind::Sqlite => "sqlite",
        })
    }
}

impl FromStr for StorageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Ok(StorageKind::File),
            "object" | "automerge" => Ok(StorageKind::Object),
            "sqlite" | "relational" => Ok(StorageKind::Sqlite),
            other => Err(format!("unknown storage backend: {}", other)),
        }
    }
}

/// Encoding used by the file backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    #[default]
    Json,
    Csv,
}

impl FileFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Json => "json",
            FileFormat::Csv => "csv",
        }
    }
}

impl FromStr for FileFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(FileFormat::Json),
            "csv" => Ok(FileFormat::Csv),
            other => Err(format!("unknown file format: {}", other)),
        }
    }
}

/// Persistence capability behind `LocalStore`
///
/// `snapshot` is the collection as it stands after the mutation; backends
/// that rewrite everything use it, row-oriented backends ignore it.
pub trait LocalBackend: Send {
    fn kind(&self) -> StorageKind;

    /// Read the persisted collection
    fn load(&mut self) -> StorageResult<Vec<Item>>;

    fn insert(&mut self, item: &Item, snapshot: &[Item]) -> StorageResult<()>;

    fn update(&mut self, item: &Item, snapshot: &[Item]) -> StorageResult<()>;

    fn remove(&mut self, id: &str, snapshot: &[Item]) -> StorageResult<()>;

    /// Empty the backing store
    fn clear(&mut self) -> StorageResult<()>;

    /// Replace the persisted collection wholesale
    fn replace_all(&mut self, items: &[Item]) -> StorageResult<()> {
        self.clear()?;
        for (i, item) in items.iter().enumerate() {
            self.insert(item, &items[..=i])?;
        }
        Ok(())
    }

    /// Flush pending state; a no-op where every mutation already committed
    fn save(&mut self, snapshot: &[Item]) -> StorageResult<()>;

    /// Filter and sort, natively where the backend can
    fn query(&self, query: &ItemQuery, snapshot: &[Item]) -> StorageResult<Vec<Item>> {
        Ok(query.apply(snapshot))
    }
}

/// Open the backend selected by configuration
pub fn open_backend(config: &Config) -> StorageResult<Box<dyn LocalBackend>> {
    let backend: Box<dyn LocalBackend> = match config.storage {
        StorageKind::File => Box::new(FileBackend::new(
            config.items_file_path(),
            config.file_format,
        )),
        StorageKind::Object => Box::new(DocumentBackend::open(config.document_path())?),
        StorageKind::Sqlite => Box::new(SqliteBackend::open(&config.sqlite_path())?),
    };
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_kind_parsing() {
        assert_eq!("file".parse::<StorageKind>().unwrap(), StorageKind::File);
        assert_eq!("SQLite".parse::<StorageKind>().unwrap(), StorageKind::Sqlite);
        assert_eq!("automerge".parse::<StorageKind>().unwrap(), StorageKind::Object);
        assert!("swiftdata".parse::<StorageKind>().is_err());
        assert_eq!(StorageKind::default(), StorageKind::Object);
    }

    #[test]
    fn test_file_format_extension() {
        assert_eq!(FileFormat::Json.extension(), "json");
        assert_eq!("CSV".parse::<FileFormat>().unwrap().extension(), "csv");
    }
}
