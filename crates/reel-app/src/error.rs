//! # Design
//!
//! - Centralize application-level errors for bootstrap and shutdown.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration could not be loaded.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: reel_config::ConfigError,
    },
    /// API server operations failed.
    #[error("api server operation failed")]
    ApiServer {
        /// Operation identifier.
        operation: &'static str,
        /// Source API server error.
        source: reel_api::ApiServerError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: reel_telemetry::TelemetryError,
    },
    /// Session store operations failed.
    #[error("session store operation failed")]
    Store {
        /// Operation identifier.
        operation: &'static str,
        /// Source store error.
        source: reel_store::StoreError,
    },
    /// Session registry operations failed.
    #[error("session operation failed")]
    Torrent {
        /// Operation identifier.
        operation: &'static str,
        /// Source session error.
        source: reel_torrent_core::TorrentError,
    },
    /// Catalog file could not be decoded.
    #[error("catalog file is invalid")]
    Catalog {
        /// Catalog location.
        path: PathBuf,
        /// Source decode error.
        source: serde_json::Error,
    },
    /// IO operations failed.
    #[error("io operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Optional path involved in the failure.
        path: Option<PathBuf>,
        /// Source IO error.
        source: io::Error,
    },
}

impl AppError {
    pub(crate) const fn config(operation: &'static str, source: reel_config::ConfigError) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn api_server(
        operation: &'static str,
        source: reel_api::ApiServerError,
    ) -> Self {
        Self::ApiServer { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: reel_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn store(operation: &'static str, source: reel_store::StoreError) -> Self {
        Self::Store { operation, source }
    }

    pub(crate) const fn torrent(
        operation: &'static str,
        source: reel_torrent_core::TorrentError,
    ) -> Self {
        Self::Torrent { operation, source }
    }

    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: Some(path.into()),
            source,
        }
    }
}
