//! Failures of the listener that carries stream and session routes.
//!
//! Request-level failures are rendered as problem documents by the handlers;
//! this type only covers the socket itself.

use std::net::SocketAddr;

use thiserror::Error;

/// Result alias for [`ApiServerError`].
pub type ApiServerResult<T> = std::result::Result<T, ApiServerError>;

/// Socket-level failures of the HTTP surface.
#[derive(Debug, Error)]
pub enum ApiServerError {
    /// The configured port is taken or not permitted.
    #[error("failed to bind stream listener")]
    Bind {
        /// Address from `REEL_BIND_ADDR`/`REEL_HTTP_PORT`.
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    /// The accept loop stopped before shutdown was requested.
    #[error("stream server stopped unexpectedly")]
    Serve {
        #[source]
        source: std::io::Error,
    },
}

impl ApiServerError {
    /// Operation label used when the error is wrapped by the engine.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::Bind { .. } => "api_server.bind",
            Self::Serve { .. } => "api_server.serve",
        }
    }
}
