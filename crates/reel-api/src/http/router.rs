//! Router construction and server host for the API.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    http::{Method, Request, header::CONTENT_TYPE, header::RANGE},
    routing::{delete, get, post},
};
use reel_events::EventBus;
use reel_telemetry::{Metrics, build_sha};
use reel_torrent_core::CatalogResolver;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{Span, info};

use crate::error::{ApiServerError, ApiServerResult};
use crate::http::constants::HEADER_REQUEST_ID;
use crate::http::health::{health, metrics};
use crate::http::sessions::{
    delete_session, list_sessions, pause_session, restore_sessions, resume_session, start_session,
    torrent_data,
};
use crate::http::sse::stream_events;
use crate::http::stream::{stream_slug, stream_static_file};
use crate::http::telemetry::record_http_request;
use crate::state::{ApiState, SessionHandles, StreamOptions};

/// Axum router wrapper that hosts the streaming API.
pub struct ApiServer {
    router: Router,
}

impl ApiServer {
    /// Construct the API with its registry handles and serving options.
    ///
    /// Must be called inside a Tokio runtime: a background task mirrors
    /// health flags from the event bus.
    #[must_use]
    pub fn new(
        sessions: SessionHandles,
        catalog: Option<Arc<dyn CatalogResolver>>,
        events: EventBus,
        telemetry: Metrics,
        options: StreamOptions,
    ) -> Self {
        let state = Arc::new(ApiState::new(
            sessions,
            catalog,
            events,
            telemetry.clone(),
            options,
        ));
        let _health = state.track_health();

        let cors_layer = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([
                Method::GET,
                Method::HEAD,
                Method::POST,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([CONTENT_TYPE, RANGE]);
        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(|request: &Request<_>| {
                let method = request.method().clone();
                let uri_path = request.uri().path();
                let request_id = request
                    .headers()
                    .get(HEADER_REQUEST_ID)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("")
                    .to_string();

                tracing::info_span!(
                    "http.request",
                    method = %method,
                    route = %uri_path,
                    request_id = %request_id,
                    build_sha = %build_sha(),
                    status_code = tracing::field::Empty,
                    latency_ms = tracing::field::Empty
                )
            })
            .on_request(|_request: &Request<_>, _span: &Span| {})
            .on_response(
                |response: &axum::response::Response, latency: Duration, span: &Span| {
                    let status = response.status().as_u16();
                    span.record("status_code", status);
                    let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
                    span.record("latency_ms", latency_ms);
                },
            );
        let layered = ServiceBuilder::new()
            .layer(reel_telemetry::set_request_id_layer())
            .layer(reel_telemetry::propagate_request_id_layer())
            .layer(trace_layer)
            .layer(axum::middleware::from_fn_with_state(
                telemetry,
                record_http_request,
            ));

        let router = Self::build_router()
            .layer(cors_layer)
            .route_layer(layered)
            .with_state(state);

        Self { router }
    }

    fn build_router() -> Router<Arc<ApiState>> {
        Self::public_routes().merge(Self::stream_routes())
    }

    fn public_routes() -> Router<Arc<ApiState>> {
        Router::new()
            .route("/health", get(health))
            .route("/metrics", get(metrics))
    }

    fn stream_routes() -> Router<Arc<ApiState>> {
        Router::new()
            .route("/stream/start", post(start_session))
            .route("/stream/get-torrent-data", post(torrent_data))
            .route("/stream/pause/{hash}", post(pause_session))
            .route("/stream/play/{hash}", post(resume_session))
            .route("/stream/delete/{hash}", delete(delete_session))
            .route("/stream/restore", post(restore_sessions))
            .route("/stream/sessions", get(list_sessions))
            .route("/stream/events", get(stream_events))
            .route("/stream/file/stream", get(stream_static_file))
            .route("/stream/{slug}", get(stream_slug))
    }

    /// The fully layered router, for in-process use.
    #[must_use]
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Bind `addr` and serve until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener fails to bind or the server terminates unexpectedly.
    pub async fn serve<F>(self, addr: SocketAddr, shutdown: F) -> ApiServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ApiServerError::Bind { addr, source })?;
        self.serve_on(listener, shutdown).await
    }

    /// Serve on an already-bound listener until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if the server terminates unexpectedly.
    pub async fn serve_on<F>(self, listener: TcpListener, shutdown: F) -> ApiServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "starting API");
        }
        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|source| ApiServerError::Serve { source })
    }
}
