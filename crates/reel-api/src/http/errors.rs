//! RFC9457-style API error wrapper.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use reel_torrent_core::TorrentError;
use tracing::error;

use crate::http::constants::{
    CONTENT_TYPE_PROBLEM, PROBLEM_BAD_REQUEST, PROBLEM_CONFLICT, PROBLEM_FORBIDDEN,
    PROBLEM_INSUFFICIENT_STORAGE, PROBLEM_INTERNAL, PROBLEM_NO_PLAYABLE_FILE, PROBLEM_NOT_FOUND,
    PROBLEM_RANGE, PROBLEM_TIMEOUT,
};
use crate::models::ProblemDetails;

/// Structured API error with optional RFC9457 fields.
#[derive(Debug)]
pub(crate) struct ApiError {
    pub(crate) status: StatusCode,
    pub(crate) kind: &'static str,
    title: &'static str,
    detail: Option<String>,
    /// Set for 416 responses, which carry `Content-Range: bytes */total` and no body.
    unsatisfiable_total: Option<u64>,
}

impl ApiError {
    const fn new(status: StatusCode, kind: &'static str, title: &'static str) -> Self {
        Self {
            status,
            kind,
            title,
            detail: None,
            unsatisfiable_total: None,
        }
    }

    pub(crate) fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            PROBLEM_INTERNAL,
            "internal server error",
        )
        .with_detail(message)
    }

    pub(crate) fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, PROBLEM_BAD_REQUEST, "bad request").with_detail(detail)
    }

    pub(crate) fn forbidden(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, PROBLEM_FORBIDDEN, "forbidden").with_detail(detail)
    }

    pub(crate) fn not_found(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            PROBLEM_NOT_FOUND,
            "resource not found",
        )
        .with_detail(detail)
    }

    pub(crate) fn conflict(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, PROBLEM_CONFLICT, "conflict").with_detail(detail)
    }

    pub(crate) const fn range_not_satisfiable(total_bytes: u64) -> Self {
        let mut error = Self::new(
            StatusCode::RANGE_NOT_SATISFIABLE,
            PROBLEM_RANGE,
            "range not satisfiable",
        );
        error.unsatisfiable_total = Some(total_bytes);
        error
    }
}

impl From<TorrentError> for ApiError {
    fn from(err: TorrentError) -> Self {
        match &err {
            TorrentError::InvalidDescriptor { reason } => Self::bad_request(*reason),
            TorrentError::SessionNotFound { hash } => {
                Self::not_found(format!("no session for {hash}"))
            }
            TorrentError::InvalidState {
                operation, state, ..
            } => Self::conflict(format!("cannot {operation} a {state} session")),
            TorrentError::StreamClosed { reason, .. } => {
                Self::conflict(format!("stream closed: {reason}"))
            }
            TorrentError::NoPlayableFile { .. } => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                PROBLEM_NO_PLAYABLE_FILE,
                "no playable file",
            )
            .with_detail("the swarm has no recognised video file"),
            TorrentError::InsufficientDiskSpace {
                available_bytes,
                required_bytes,
            } => Self::new(
                StatusCode::INSUFFICIENT_STORAGE,
                PROBLEM_INSUFFICIENT_STORAGE,
                "insufficient disk space",
            )
            .with_detail(format!(
                "{available_bytes} bytes free, {required_bytes} required"
            )),
            TorrentError::AdapterTimeout { operation, .. } => Self::new(
                StatusCode::GATEWAY_TIMEOUT,
                PROBLEM_TIMEOUT,
                "swarm did not respond in time",
            )
            .with_detail(format!("timed out waiting for {operation}")),
            TorrentError::RangeNotSatisfiable { total_bytes } => {
                Self::range_not_satisfiable(*total_bytes)
            }
            TorrentError::InternalIo { .. } | TorrentError::OperationFailed { .. } => {
                error!(
                    error = %err,
                    source = ?std::error::Error::source(&err),
                    "session operation failed"
                );
                Self::internal(err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Some(total) = self.unsatisfiable_total {
            return (
                self.status,
                [(header::CONTENT_RANGE, format!("bytes */{total}"))],
            )
                .into_response();
        }
        let body = ProblemDetails {
            kind: self.kind.to_string(),
            title: self.title.to_string(),
            status: self.status.as_u16(),
            detail: self.detail,
        };
        let mut response = (self.status, Json(body)).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(CONTENT_TYPE_PROBLEM),
        );
        response
    }
}
