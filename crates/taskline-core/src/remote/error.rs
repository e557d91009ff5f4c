//! Remote error taxonomy
//!
//! Every remote call resolves to either a value or one of these kinds.
//! `BadRevision` is the only one with a dedicated recovery path
//! (refresh the revision, then retry); everything else is reported to the
//! caller as a plain failure.

use thiserror::Error;

use crate::retry::Retryable;

/// Errors returned by the task-list REST service
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// No usable response: connectivity, timeout, or an unreadable body
    #[error("Transport failed: {0}")]
    TransportFailed(String),

    /// 401, the bearer token was rejected
    #[error("Authorization failed; check the configured token")]
    AuthFailed,

    /// 409 or 400, the presented revision is stale
    #[error("Revision is out of date")]
    BadRevision,

    /// 404, the item does not exist remotely
    #[error("Item not found on server")]
    NotFound,

    /// 5xx
    #[error("Server error (HTTP {0})")]
    ServerError(u16),

    /// The caller abandoned the operation
    #[error("Operation cancelled")]
    Cancelled,
}

impl RemoteError {
    /// Classify a non-success HTTP status
    pub fn from_status(status: u16) -> Self {
        match status {
            400 | 409 => RemoteError::BadRevision,
            401 => RemoteError::AuthFailed,
            404 => RemoteError::NotFound,
            500..=599 => RemoteError::ServerError(status),
            other => RemoteError::TransportFailed(format!("unexpected HTTP status {}", other)),
        }
    }

    /// Short stable label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            RemoteError::TransportFailed(_) => "transport_failed",
            RemoteError::AuthFailed => "auth_failed",
            RemoteError::BadRevision => "bad_revision",
            RemoteError::NotFound => "not_found",
            RemoteError::ServerError(_) => "server_error",
            RemoteError::Cancelled => "cancelled",
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(error: reqwest::Error) -> Self {
        if let Some(status) = error.status() {
            return RemoteError::from_status(status.as_u16());
        }
        if error.is_decode() {
            return RemoteError::TransportFailed(format!("undecodable response: {}", error));
        }
        RemoteError::TransportFailed(error.to_string())
    }
}

impl Retryable for RemoteError {
    fn cancelled() -> Self {
        RemoteError::Cancelled
    }

    fn is_cancellation(&self) -> bool {
        matches!(self, RemoteError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(RemoteError::from_status(400), RemoteError::BadRevision);
        assert_eq!(RemoteError::from_status(409), RemoteError::BadRevision);
        assert_eq!(RemoteError::from_status(401), RemoteError::AuthFailed);
        assert_eq!(RemoteError::from_status(404), RemoteError::NotFound);
        assert_eq!(RemoteError::from_status(503), RemoteError::ServerError(503));
        assert!(matches!(
            RemoteError::from_status(418),
            RemoteError::TransportFailed(_)
        ));
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(RemoteError::BadRevision.kind(), "bad_revision");
        assert_eq!(RemoteError::ServerError(500).kind(), "server_error");
        assert!(RemoteError::Cancelled.is_cancellation());
        assert!(!RemoteError::NotFound.is_cancellation());
    }
}
