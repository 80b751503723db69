//! HTTP surface modules (router, handlers, middleware).

/// Shared constants and header names for HTTP surfaces.
pub(crate) mod constants;
/// Problem response helpers and error types.
pub(crate) mod errors;
/// Health and diagnostics endpoints.
pub(crate) mod health;
/// `Range` header parsing.
pub(crate) mod range;
/// Router construction and server host.
pub mod router;
/// Session lifecycle routes.
pub(crate) mod sessions;
/// Server-sent events push channel.
pub(crate) mod sse;
/// Range streaming for session and static files.
pub(crate) mod stream;
/// Metrics middleware for HTTP requests.
pub(crate) mod telemetry;
