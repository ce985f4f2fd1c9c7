//! Error types shared across the crate.
//!
//! Each concern gets its own enum: fetching bytes from a source, touching the
//! tiered blob store, and the terminal outcome of a download task. Workers
//! never hand these to callers directly; a failed download is reported as a
//! [`DownloadError`] inside a [`crate::listener::DownloadEvent::Failed`].

use std::io;
use thiserror::Error;

use crate::storage::StorageTier;

/// Errors raised by a [`crate::fetch::Fetcher`].
#[derive(Debug, Error)]
pub enum FetchError {
    /// The URL could not be parsed or uses an unsupported scheme
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Connection, TLS or protocol failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Server answered with a non-success status
    #[error("HTTP status {0}")]
    Status(u16),

    /// Local read failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FetchError {
    /// Whether retrying the same request can ever succeed.
    pub fn is_malformed(&self) -> bool {
        matches!(self, FetchError::InvalidUrl { .. })
    }
}

/// Errors raised by the tiered blob store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No index entry for the requested resource
    #[error("Resource '{0}' is not stored")]
    NotFound(String),

    /// The content id cannot name a file inside a tier
    #[error("Invalid content id '{content_id}': {reason}")]
    InvalidId {
        content_id: String,
        reason: &'static str,
    },

    /// Attempted to write or delete in the read-only tier
    #[error("Tier {0} is read-only")]
    ReadOnlyTier(StorageTier),

    /// The tier is not currently usable (removable store unmounted)
    #[error("Tier {0} is not available")]
    Unavailable(StorageTier),

    /// No tier has room for the data
    #[error("No storage tier has enough free space")]
    OutOfSpace,

    /// Underlying filesystem failure
    #[error("Storage I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised while starting a coordinator.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Preparing or scanning the storage tiers failed
    #[error("Storage initialization failed: {0}")]
    Storage(#[from] StorageError),

    /// A worker thread could not be started
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(io::Error),

    /// The HTTP client could not be built
    #[error("Failed to create fetcher: {0}")]
    Fetcher(#[from] FetchError),
}

/// Terminal reason a download task did not succeed.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Bad URL, never retried
    #[error("Malformed source: {0}")]
    MalformedSource(String),

    /// Stream or connection error that outlived the retry budget
    #[error("Transient I/O failure: {0}")]
    TransientIo(String),

    /// The checker rejected the payload on every attempt
    #[error("Payload rejected by checker")]
    ValidationFailed,

    /// Writing to the chosen tier failed
    #[error("Persistence failed: {reason}")]
    PersistenceFailed { reason: String, out_of_space: bool },

    /// A small-file task grew past the chunk threshold
    #[error("Payload of {size} bytes exceeds the small-file limit of {limit} bytes")]
    TooLarge { size: usize, limit: usize },

    /// Listener asked for the task to stop
    #[error("Cancelled")]
    Cancelled,
}

impl DownloadError {
    /// Whether another attempt is allowed to follow this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::TransientIo(_) | DownloadError::ValidationFailed => true,
            DownloadError::PersistenceFailed { out_of_space, .. } => !out_of_space,
            DownloadError::MalformedSource(_)
            | DownloadError::TooLarge { .. }
            | DownloadError::Cancelled => false,
        }
    }
}

impl From<FetchError> for DownloadError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::InvalidUrl { .. } => DownloadError::MalformedSource(e.to_string()),
            other => DownloadError::TransientIo(other.to_string()),
        }
    }
}

impl From<StorageError> for DownloadError {
    fn from(e: StorageError) -> Self {
        let out_of_space = match &e {
            StorageError::OutOfSpace => true,
            StorageError::Io(io) => is_out_of_space(io),
            _ => false,
        };
        DownloadError::PersistenceFailed {
            reason: e.to_string(),
            out_of_space,
        }
    }
}

/// Whether an I/O error was caused by a full device.
pub(crate) fn is_out_of_space(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::StorageFull
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_maps_to_malformed_source() {
        let err: DownloadError = FetchError::InvalidUrl {
            url: "nope".to_string(),
            reason: "relative URL without a base".to_string(),
        }
        .into();
        assert!(matches!(err, DownloadError::MalformedSource(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_transport_errors_are_retryable() {
        let err: DownloadError = FetchError::Status(503).into();
        assert!(matches!(err, DownloadError::TransientIo(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_out_of_space_is_terminal() {
        let err: DownloadError = StorageError::OutOfSpace.into();
        assert!(matches!(
            err,
            DownloadError::PersistenceFailed {
                out_of_space: true,
                ..
            }
        ));
        assert!(!err.is_retryable());

        let err: DownloadError = StorageError::Io(io::Error::other("disk on fire")).into();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = DownloadError::TooLarge {
            size: 600_000,
            limit: 500_000,
        };
        assert_eq!(
            err.to_string(),
            "Payload of 600000 bytes exceeds the small-file limit of 500000 bytes"
        );
    }
}
