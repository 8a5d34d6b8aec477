//! Error types for Watchlater core operations.
//!
//! Run-level failures (configuration, tracker persistence, API access, the
//! playlist cache) are [`Error`] values. Per-video download failures are not:
//! they travel as [`crate::outcome::DownloadFailure`] inside an outcome so a
//! single bad video never aborts a batch.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Watchlater core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// File system operation failed.
    #[error(transparent)]
    FileSystem(#[from] FileSystemError),

    /// Download tracker could not be persisted.
    #[error(transparent)]
    Tracker(#[from] TrackerError),

    /// YouTube Data API access failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Cached playlist listing is unusable.
    #[error(transparent)]
    Playlist(#[from] PlaylistError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A background task could not be joined.
    #[error("Task failed: {0}")]
    Task(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// File system errors, always carrying the offending path.
#[derive(Debug, Error)]
pub enum FileSystemError {
    /// Reading a file failed.
    #[error("Failed to read {path}: {reason}")]
    ReadFailed {
        /// Path that could not be read.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// Writing a file failed.
    #[error("Failed to write {path}: {reason}")]
    WriteFailed {
        /// Path that could not be written.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// Creating a directory failed.
    #[error("Failed to create directory {path}: {reason}")]
    CreateDirFailed {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// Renaming a file failed.
    #[error("Failed to rename {from} to {to}: {reason}")]
    RenameFailed {
        /// Source path.
        from: PathBuf,
        /// Destination path.
        to: PathBuf,
        /// Underlying reason.
        reason: String,
    },
}

/// Download tracker persistence errors.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// The tracker document could not be atomically replaced.
    #[error("Failed to persist download tracker {path}: {reason}")]
    PersistFailed {
        /// Tracker document path.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },
}

/// YouTube Data API errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No usable access token.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The API rejected the token or its scopes.
    #[error("Access denied (HTTP {status}): {message}. Check that the token carries the youtube scope")]
    Unauthorized {
        /// HTTP status code.
        status: u16,
        /// Response body or summary.
        message: String,
    },

    /// Any other non-success HTTP status.
    #[error("YouTube API request failed (HTTP {status}): {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body or summary.
        message: String,
    },

    /// The request could not be sent or the response could not be read.
    #[error("YouTube API transport error: {0}")]
    Transport(String),

    /// The response body did not have the expected shape.
    #[error("Unexpected YouTube API response: {0}")]
    Decode(String),

    /// The Watch Later playlist could not be located.
    #[error("Watch Later playlist not found")]
    PlaylistNotFound,
}

/// Playlist cache errors.
#[derive(Debug, Error)]
pub enum PlaylistError {
    /// No cached listing is available.
    #[error("No cached playlist data in {0}")]
    CacheEmpty(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_display() {
        let err = Error::Configuration("bad resolution".to_string());
        assert_eq!(err.to_string(), "Configuration error: bad resolution");
    }

    #[test]
    fn test_file_system_error_display() {
        let err: Error = FileSystemError::WriteFailed {
            path: PathBuf::from("/test/path"),
            reason: "permission denied".to_string(),
        }
        .into();
        assert!(err.to_string().contains("/test/path"));
        assert!(err.to_string().contains("permission denied"));
    }

    #[test]
    fn test_unauthorized_mentions_scope() {
        let err = ApiError::Unauthorized {
            status: 403,
            message: "forbidden".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("403"));
        assert!(text.contains("scope"));
    }
}
