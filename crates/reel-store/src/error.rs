//! Error types for the session store.

use std::path::PathBuf;

use thiserror::Error;

/// Failures raised by the session store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database file could not be opened.
    #[error("failed to open session store")]
    Connect {
        /// Database location.
        path: PathBuf,
        #[source]
        source: sqlx::Error,
    },
    /// Schema migrations failed.
    #[error("failed to migrate session store")]
    Migrate {
        #[source]
        source: sqlx::migrate::MigrateError,
    },
    /// Statement failed.
    #[error("session store query failed")]
    Query {
        /// Operation identifier.
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },
    /// Row field could not be serialised.
    #[error("failed to encode session row")]
    Encode {
        /// Field that failed.
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
    /// Storage path is not valid UTF-8.
    #[error("storage path is not valid UTF-8")]
    NonUtf8Path {
        /// Offending path.
        path: PathBuf,
    },
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
