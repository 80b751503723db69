//! HTTP surface of the reel streaming engine.
//!
//! Range-served session files that stream while they download, a static
//! range server for completed files, session lifecycle routes, an SSE push
//! channel, and health/metrics. All failures render as RFC9457 problems.

pub mod error;
pub mod http;
pub mod models;
mod state;

pub use error::{ApiServerError, ApiServerResult};
pub use http::router::ApiServer;
pub use state::{SessionHandles, StreamOptions};
