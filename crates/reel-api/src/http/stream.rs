//! Range streaming: session files that may still be downloading, and static
//! files that are already complete on disk.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use axum::{
    body::Body,
    extract::{Path as AxumPath, Query, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::Response,
};
use reel_telemetry::{Metrics, RangeOutcome};
use reel_torrent_core::{CoverageReader, InfoHash, video_mime};
use serde::Deserialize;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info, warn};

use crate::http::constants::{CONTENT_TYPE_FALLBACK, STREAM_CHUNK_BYTES};
use crate::http::errors::ApiError;
use crate::http::range::{ByteRange, resolve_request};
use crate::state::ApiState;

#[derive(Debug, Deserialize)]
pub(crate) struct StaticFileQuery {
    pub(crate) path: String,
    #[serde(default)]
    pub(crate) range: Option<String>,
}

/// `GET /stream/{slug}`: resolve, start, then serve the selected file.
pub(crate) async fn stream_slug(
    State(state): State<Arc<ApiState>>,
    AxumPath(slug): AxumPath<String>,
    method: Method,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let catalog = state
        .catalog
        .as_ref()
        .ok_or_else(|| ApiError::not_found("no catalog is configured"))?;
    let descriptor = catalog
        .resolve(&slug)
        .await
        .map_err(|err| {
            warn!(slug = %slug, error = %err, "catalog lookup failed");
            ApiError::internal("catalog lookup failed")
        })?
        .ok_or_else(|| ApiError::not_found(format!("unknown slug '{slug}'")))?;

    let snapshot = state.sessions.control().start(descriptor).await?;
    info!(slug = %slug, hash = %snapshot.hash, state = snapshot.state.label(), "stream requested");
    serve_session(&state, &snapshot.hash, &method, &headers).await
}

pub(crate) async fn serve_session(
    state: &ApiState,
    hash: &InfoHash,
    method: &Method,
    headers: &HeaderMap,
) -> Result<Response, ApiError> {
    let source = state.sessions.inspector().open_stream(hash).await?;
    let Some(range) = resolve_request(range_header(headers), source.total_bytes) else {
        state.telemetry.inc_range_request(RangeOutcome::NotSatisfiable);
        return Err(ApiError::range_not_satisfiable(source.total_bytes));
    };
    debug!(
        hash = %hash,
        start = range.start,
        end = range.end,
        total = source.total_bytes,
        "serving session range"
    );

    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        coverage_body(
            source.path,
            Some(source.reader),
            range,
            state.options.read_recheck,
            state.telemetry.clone(),
        )
    };
    partial_response(range, source.total_bytes, source.content_type, body)
}

/// `GET /stream/file/stream?path=&range=`: plain range serving off disk.
pub(crate) async fn stream_static_file(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<StaticFileQuery>,
    method: Method,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let path = authorize_static_path(&query.path, &state.options.static_roots).await?;
    let total = tokio::fs::metadata(&path)
        .await
        .map_err(|err| {
            warn!(path = %path.display(), error = %err, "static file stat failed");
            ApiError::internal("failed to read file metadata")
        })?
        .len();

    let requested = query
        .range
        .as_deref()
        .map(normalize_range_param)
        .or_else(|| range_header(&headers).map(str::to_string));
    let Some(range) = resolve_request(requested.as_deref(), total) else {
        state.telemetry.inc_range_request(RangeOutcome::NotSatisfiable);
        return Err(ApiError::range_not_satisfiable(total));
    };

    let content_type = path
        .to_str()
        .and_then(video_mime)
        .unwrap_or(CONTENT_TYPE_FALLBACK);
    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        coverage_body(
            path,
            None,
            range,
            state.options.read_recheck,
            state.telemetry.clone(),
        )
    };
    partial_response(range, total, content_type, body)
}

fn range_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
}

fn normalize_range_param(raw: &str) -> String {
    let raw = raw.trim();
    if raw.starts_with("bytes=") {
        raw.to_string()
    } else {
        format!("bytes={raw}")
    }
}

async fn authorize_static_path(raw: &str, roots: &[PathBuf]) -> Result<PathBuf, ApiError> {
    let requested = Path::new(raw);
    if !requested.is_absolute() {
        return Err(ApiError::bad_request("path must be absolute"));
    }
    let canonical = tokio::fs::canonicalize(requested)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;
    for root in roots {
        if let Ok(root) = tokio::fs::canonicalize(root).await
            && canonical.starts_with(&root)
        {
            if !canonical.is_file() {
                return Err(ApiError::not_found("file not found"));
            }
            return Ok(canonical);
        }
    }
    Err(ApiError::forbidden("path is outside the static roots"))
}

fn partial_response(
    range: ByteRange,
    total: u64,
    content_type: &str,
    body: Body,
) -> Result<Response, ApiError> {
    Response::builder()
        .status(StatusCode::PARTIAL_CONTENT)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, range.len())
        .header(header::CONTENT_RANGE, range.content_range(total))
        .header(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"))
        .body(body)
        .map_err(|err| ApiError::internal(format!("failed to build range response: {err}")))
}

/// Records the range outcome once the body is finished or dropped.
struct ReadGuard {
    telemetry: Metrics,
    outcome: RangeOutcome,
}

impl ReadGuard {
    fn new(telemetry: Metrics) -> Self {
        telemetry.reader_started();
        Self {
            telemetry,
            outcome: RangeOutcome::Aborted,
        }
    }
}

impl Drop for ReadGuard {
    fn drop(&mut self) {
        self.telemetry.reader_finished();
        self.telemetry.inc_range_request(self.outcome);
    }
}

/// Stream `range` of the file at `path`. With a coverage reader each chunk is
/// released only once the bytes are on disk; without one the file is assumed
/// complete.
fn coverage_body(
    path: PathBuf,
    reader: Option<CoverageReader>,
    range: ByteRange,
    recheck: Duration,
    telemetry: Metrics,
) -> Body {
    let body = stream! {
        let mut guard = ReadGuard::new(telemetry.clone());
        let mut reader = reader;
        let mut file = match File::open(&path).await {
            Ok(file) => file,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "range source unavailable");
                yield Err(err);
                return;
            }
        };

        let end = range.end + 1;
        let mut offset = range.start;
        while offset < end {
            let available = match reader.as_mut() {
                Some(reader) => match reader.wait_available(offset, recheck).await {
                    Ok(available) => available.min(end),
                    Err(err) => {
                        debug!(path = %path.display(), offset, error = %err, "range stream closed");
                        yield Err(io::Error::other(err));
                        return;
                    }
                },
                None => end,
            };

            while offset < available {
                if reader.as_ref().is_some_and(CoverageReader::is_closed) {
                    yield Err(io::Error::other("session deleted while streaming"));
                    return;
                }
                let len = (available - offset).min(STREAM_CHUNK_BYTES);
                match read_chunk(&mut file, offset, len).await {
                    Ok(chunk) => {
                        offset += len;
                        telemetry.add_bytes_served(len);
                        yield Ok(chunk);
                    }
                    Err(err) => {
                        warn!(path = %path.display(), offset, error = %err, "range read failed");
                        yield Err(err);
                        return;
                    }
                }
            }
        }
        guard.outcome = RangeOutcome::Served;
    };
    Body::from_stream(body)
}

async fn read_chunk(file: &mut File, offset: u64, len: u64) -> io::Result<Vec<u8>> {
    let len = usize::try_from(len).map_err(io::Error::other)?;
    let mut buffer = vec![0; len];
    file.seek(SeekFrom::Start(offset)).await?;
    file.read_exact(&mut buffer).await?;
    Ok(buffer)
}
