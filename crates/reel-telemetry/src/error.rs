//! Failures raised while installing logging or exporting engine metrics.

use std::string::FromUtf8Error;

use prometheus::Error as PrometheusError;
use thiserror::Error;
use tracing_subscriber::util::TryInitError;

/// Result alias for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Step at which an engine metric failed to come into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricStage {
    /// Constructing the collector (bad name or label set).
    Build,
    /// Adding it to the engine's registry (usually a duplicate name).
    Register,
}

/// Errors raised by the logging and metrics helpers.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A global subscriber is already installed in this process.
    #[error("tracing subscriber already installed")]
    SubscriberInstall {
        #[source]
        source: TryInitError,
    },
    /// A session, range, or HTTP metric could not be set up.
    #[error("failed to set up engine metric")]
    Metric {
        /// Metric name, e.g. `reel_active_sessions`.
        name: &'static str,
        stage: MetricStage,
        #[source]
        source: PrometheusError,
    },
    /// The `/metrics` exposition could not be encoded.
    #[error("failed to encode metrics exposition")]
    ExpositionEncode {
        #[source]
        source: PrometheusError,
    },
    /// The encoded exposition was not UTF-8.
    #[error("metrics exposition is not utf-8")]
    ExpositionUtf8 {
        #[source]
        source: FromUtf8Error,
    },
}
