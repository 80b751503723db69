//! Error taxonomy for session operations.

use std::error::Error;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for session and streaming operations.
#[derive(Debug, Error)]
pub enum TorrentError {
    /// Descriptor could not be parsed into a content hash.
    #[error("invalid content descriptor")]
    InvalidDescriptor {
        /// Short machine-readable reason.
        reason: &'static str,
    },
    /// Swarm enumerated no file with a known video container extension.
    #[error("no playable file in swarm")]
    NoPlayableFile {
        /// Content hash of the session.
        hash: String,
    },
    /// Swarm did not produce a file list within the bounded wait.
    #[error("swarm adapter timed out")]
    AdapterTimeout {
        /// Content hash of the session.
        hash: String,
        /// Adapter operation that timed out.
        operation: &'static str,
    },
    /// Free space on the download volume is below the configured floor.
    #[error("insufficient disk space")]
    InsufficientDiskSpace {
        /// Bytes currently free.
        available_bytes: u64,
        /// Configured floor.
        required_bytes: u64,
    },
    /// Operation targeted an unknown hash.
    #[error("session not found")]
    SessionNotFound {
        /// Requested content hash.
        hash: String,
    },
    /// Session exists but its state does not permit the operation.
    #[error("session state does not permit operation")]
    InvalidState {
        /// Content hash of the session.
        hash: String,
        /// Rejected operation.
        operation: &'static str,
        /// Label of the current state.
        state: &'static str,
    },
    /// Requested byte range lies outside the file.
    #[error("requested range not satisfiable")]
    RangeNotSatisfiable {
        /// Declared length of the file.
        total_bytes: u64,
    },
    /// Readers were released because the session was paused or deleted.
    #[error("session stream closed")]
    StreamClosed {
        /// Content hash of the session.
        hash: String,
        /// Why the stream closed.
        reason: &'static str,
    },
    /// Filesystem failure while serving or deleting session data.
    #[error("filesystem operation failed")]
    InternalIo {
        /// Operation identifier.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// Failure inside a collaborator (store, adapter worker).
    #[error("session operation failed")]
    OperationFailed {
        /// Operation identifier.
        operation: &'static str,
        /// Content hash when available.
        hash: Option<String>,
        /// Underlying failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl TorrentError {
    /// Wrap an I/O error with its operation and path.
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::InternalIo {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Wrap a collaborator failure.
    pub fn operation(
        operation: &'static str,
        hash: Option<&str>,
        source: impl Into<Box<dyn Error + Send + Sync>>,
    ) -> Self {
        Self::OperationFailed {
            operation,
            hash: hash.map(str::to_string),
            source: source.into(),
        }
    }
}

/// Convenience alias for session operation results.
pub type TorrentResult<T> = Result<T, TorrentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_constant_and_context_stays_in_fields() {
        let err = TorrentError::SessionNotFound {
            hash: "abc".into(),
        };
        assert_eq!(err.to_string(), "session not found");

        let err = TorrentError::io(
            "remove_storage",
            "/tmp/x",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.to_string(), "filesystem operation failed");
        assert!(err.source().is_some());
    }
}
