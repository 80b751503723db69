//! Telemetry primitives shared across the reel workspace.
//!
//! Logging bootstrap, request-id propagation, and the Prometheus registry
//! live here so the engine and the HTTP surface report consistently.

pub mod error;
pub mod init;
pub mod layers;
pub mod metrics;

pub use error::{MetricStage, Result, TelemetryError};
pub use init::{DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig, build_sha, init_logging};
pub use layers::{REQUEST_ID_HEADER, propagate_request_id_layer, set_request_id_layer};
pub use metrics::{Metrics, MetricsSnapshot, RangeOutcome};
