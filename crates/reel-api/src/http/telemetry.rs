//! Per-route counter behind `reel_http_requests_total`.

use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use reel_telemetry::Metrics;

const UNMATCHED_ROUTE: &str = "unmatched";

/// Count one request under its route template and final status code.
///
/// The template (`/stream/{slug}`, `/stream/pause/{hash}`) is recorded rather
/// than the concrete path, so hashes and slugs never become label values.
pub(crate) async fn record_http_request(
    State(telemetry): State<Metrics>,
    request: Request,
    next: Next,
) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or(UNMATCHED_ROUTE, MatchedPath::as_str)
        .to_string();
    let response = next.run(request).await;
    telemetry.inc_http_request(&route, response.status().as_u16());
    response
}
