//! # Design
//!
//! - Keep swarm error messages constant; store operational context in fields.
//! - Convert into `TorrentError` at the adapter boundary so callers only see
//!   the engine-agnostic taxonomy.

use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;

use reel_torrent_core::TorrentError;

#[derive(Debug)]
/// Internal error details used by the swarm worker and its sessions.
pub enum SwarmError {
    /// A command arrived before any content was added to the session.
    NotAdded {
        /// Operation that required an added torrent.
        operation: &'static str,
    },
    /// File selection was attempted before the file list was known.
    MetadataPending {
        /// Content hash of the torrent.
        hash: String,
    },
    /// The requested file index is not part of the swarm's file list.
    UnknownFile {
        /// Content hash of the torrent.
        hash: String,
        /// Index that was requested.
        index: usize,
    },
    /// A different file was already selected for this transfer.
    SelectionLocked {
        /// Content hash of the torrent.
        hash: String,
        /// Index that is already selected.
        current: usize,
        /// Index that was requested.
        requested: usize,
    },
    /// A disk operation against the seed or the download target failed.
    Io {
        /// Operation that triggered the IO failure.
        operation: &'static str,
        /// Path involved in the IO failure.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
    /// The background worker is gone and cannot service the command.
    WorkerUnavailable {
        /// Operation that could not be serviced.
        operation: &'static str,
    },
}

impl Display for SwarmError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAdded { operation } => {
                let _ = operation;
                formatter.write_str("no content added to swarm session")
            }
            Self::MetadataPending { hash } => {
                let _ = hash;
                formatter.write_str("swarm metadata not yet available")
            }
            Self::UnknownFile { hash, index } => {
                let _ = (hash, index);
                formatter.write_str("file index not present in swarm")
            }
            Self::SelectionLocked {
                hash,
                current,
                requested,
            } => {
                let _ = (hash, current, requested);
                formatter.write_str("swarm file selection already fixed")
            }
            Self::Io {
                operation, path, ..
            } => {
                let _ = (operation, path);
                formatter.write_str("swarm storage IO failure")
            }
            Self::WorkerUnavailable { operation } => {
                let _ = operation;
                formatter.write_str("swarm worker unavailable")
            }
        }
    }
}

impl Error for SwarmError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl SwarmError {
    pub(crate) fn io(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}

/// Build a torrent error with structured operation context.
pub(crate) fn op_failed(operation: &'static str, hash: &str, source: SwarmError) -> TorrentError {
    match source {
        SwarmError::Io {
            operation, path, source,
        } => TorrentError::io(operation, path, source),
        other => TorrentError::operation(operation, Some(hash), other),
    }
}

/// Convenience alias for swarm results.
pub type SwarmResult<T> = Result<T, SwarmError>;
