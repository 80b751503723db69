//! Error types for configuration loading.

use thiserror::Error;

/// Primary error type for configuration operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Variable contained a value that failed parsing or validation.
    #[error("invalid configuration value")]
    InvalidValue {
        /// Environment variable name.
        key: &'static str,
        /// Offending value.
        value: String,
        /// Machine-readable reason for the failure.
        reason: &'static str,
    },
}

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;
