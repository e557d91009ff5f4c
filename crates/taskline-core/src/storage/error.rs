//! Local cache errors
//!
//! One error type for every backend. I/O failures are classified when they
//! are created, so callers can tell a full disk from a corrupt file without
//! inspecting `io::ErrorKind` themselves.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create data directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Permission denied for '{path}'")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("No space left while writing '{path}'")]
    DiskFull {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read '{path}': {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write '{path}': {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The cache exists but could not be decoded
    #[error("Invalid {format} data in '{path}': {details}")]
    InvalidFormat {
        path: PathBuf,
        format: &'static str,
        details: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Automerge error: {0}")]
    Automerge(String),

    /// The temp file was written but could not replace the cache
    #[error("Could not move '{from}' into place at '{to}': {source}")]
    AtomicWriteFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<automerge::AutomergeError> for StorageError {
    fn from(error: automerge::AutomergeError) -> Self {
        StorageError::Automerge(error.to_string())
    }
}

impl StorageError {
    /// Classify a failed write
    pub fn from_io(error: io::Error, path: PathBuf) -> Self {
        if error.kind() == io::ErrorKind::PermissionDenied {
            return StorageError::PermissionDenied {
                path,
                source: error,
            };
        }
        if is_out_of_space(&error) {
            return StorageError::DiskFull {
                path,
                source: error,
            };
        }
        StorageError::WriteError {
            path,
            source: error,
        }
    }

    /// Classify a failed read
    pub fn from_read(error: io::Error, path: PathBuf) -> Self {
        if error.kind() == io::ErrorKind::PermissionDenied {
            return StorageError::PermissionDenied {
                path,
                source: error,
            };
        }
        StorageError::ReadError {
            path,
            source: error,
        }
    }

    /// The file the error is about, if there is one
    pub fn path(&self) -> Option<&Path> {
        match self {
            StorageError::CreateDirectory { path, .. }
            | StorageError::PermissionDenied { path, .. }
            | StorageError::DiskFull { path, .. }
            | StorageError::ReadError { path, .. }
            | StorageError::WriteError { path, .. }
            | StorageError::InvalidFormat { path, .. } => Some(path),
            StorageError::AtomicWriteFailed { to, .. } => Some(to),
            StorageError::Database(_) | StorageError::Automerge(_) | StorageError::Io(_) => None,
        }
    }

    /// What the user can do about it, for errors they can fix themselves
    pub fn recovery_hint(&self) -> Option<&'static str> {
        match self {
            StorageError::DiskFull { .. } => Some("Free up disk space and run the command again."),
            StorageError::PermissionDenied { .. } | StorageError::CreateDirectory { .. } => {
                Some("Make sure the data directory is writable, or point TASKLINE_DATA_DIR elsewhere.")
            }
            StorageError::InvalidFormat { .. } => {
                Some("Move the damaged file aside and run `taskline sync` to refetch the list.")
            }
            _ => None,
        }
    }
}

fn is_out_of_space(error: &io::Error) -> bool {
    // ENOSPC (28) and EDQUOT (122) on Linux; the message covers other platforms
    if matches!(error.raw_os_error(), Some(28) | Some(122)) {
        return true;
    }
    let msg = error.to_string().to_lowercase();
    msg.contains("no space left") || msg.contains("quota exceeded") || msg.contains("not enough space")
}

pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_denied_has_hint() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err = StorageError::from_io(io_err, PathBuf::from("/data/items.json"));

        assert!(matches!(err, StorageError::PermissionDenied { .. }));
        assert_eq!(err.path(), Some(Path::new("/data/items.json")));
        assert!(err.recovery_hint().is_some());
    }

    #[test]
    fn test_plain_read_failure_has_no_hint() {
        let io_err = io::Error::new(io::ErrorKind::UnexpectedEof, "truncated");
        let err = StorageError::from_read(io_err, PathBuf::from("/data/items.json"));

        assert!(matches!(err, StorageError::ReadError { .. }));
        assert!(err.recovery_hint().is_none());
    }

    #[test]
    fn test_out_of_space_by_errno_and_message() {
        let by_errno = StorageError::from_io(io::Error::from_raw_os_error(28), PathBuf::from("/a"));
        assert!(matches!(by_errno, StorageError::DiskFull { .. }));

        let by_message = StorageError::from_io(
            io::Error::new(io::ErrorKind::Other, "No space left on device"),
            PathBuf::from("/b"),
        );
        assert!(matches!(by_message, StorageError::DiskFull { .. }));
    }

    #[test]
    fn test_invalid_format_message_names_file() {
        let err = StorageError::InvalidFormat {
            path: PathBuf::from("/data/items.csv"),
            format: "CSV",
            details: "unterminated quote".to_string(),
        };

        let msg = err.to_string();
        assert!(msg.contains("CSV"));
        assert!(msg.contains("/data/items.csv"));
        assert!(err.recovery_hint().unwrap().contains("taskline sync"));
    }

    #[test]
    fn test_atomic_write_failure_points_at_target() {
        let err = StorageError::AtomicWriteFailed {
            from: PathBuf::from("/d/items.json.tmp"),
            to: PathBuf::from("/d/items.json"),
            source: io::Error::new(io::ErrorKind::Other, "busy"),
        };
        assert_eq!(err.path(), Some(Path::new("/d/items.json")));
    }
}
