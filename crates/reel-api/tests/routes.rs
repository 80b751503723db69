use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use chrono::Utc;
use futures_util::StreamExt;
use reel_api::{ApiServer, ApiServerError, SessionHandles, StreamOptions};
use reel_events::{Event, EventBus, SessionState};
use reel_telemetry::Metrics;
use reel_test_support::fixtures::{expected_slice, sample_bytes};
use reel_torrent_core::{
    CatalogResolver, ContentDescriptor, CoverageHandle, CoverageStatus, InfoHash, SelectedFile,
    SessionControl, SessionInspector, SessionProgress, SessionSnapshot, StreamSource, TorrentError,
    TorrentResult,
};
use tempfile::TempDir;
use tokio::time::timeout;
use tower::ServiceExt;

const HASH: &str = "c9e15763f722f23e98a29decdfae341b98d53056";
const FILE_LEN: usize = 1_000_000;

struct FakeSession {
    snapshot: SessionSnapshot,
    coverage: CoverageHandle,
}

#[derive(Default)]
struct FakeRegistry {
    sessions: Mutex<HashMap<InfoHash, FakeSession>>,
}

impl FakeRegistry {
    fn insert(&self, storage: &Path, state: SessionState) -> Result<CoverageHandle> {
        let hash = InfoHash::parse(HASH)?;
        let coverage = CoverageHandle::new(hash.clone());
        coverage.set_total(FILE_LEN as u64);
        let now = Utc::now();
        let snapshot = SessionSnapshot {
            hash: hash.clone(),
            title: "Sample".into(),
            descriptor: ContentDescriptor::new(HASH, "Sample"),
            state,
            selected_file: Some(SelectedFile {
                index: 0,
                path: "movie.mp4".into(),
                size_bytes: FILE_LEN as u64,
            }),
            storage_path: storage.to_path_buf(),
            progress: SessionProgress::default(),
            created_at: now,
            updated_at: now,
        };
        self.sessions
            .lock()
            .map_err(|_| anyhow::anyhow!("registry poisoned"))?
            .insert(
                hash,
                FakeSession {
                    snapshot,
                    coverage: coverage.clone(),
                },
            );
        Ok(coverage)
    }

    fn snapshot(&self, hash: &InfoHash) -> TorrentResult<SessionSnapshot> {
        let sessions = self.sessions.lock().map_err(|_| TorrentError::SessionNotFound {
            hash: hash.to_string(),
        })?;
        sessions
            .get(hash)
            .map(|session| session.snapshot.clone())
            .ok_or_else(|| TorrentError::SessionNotFound {
                hash: hash.to_string(),
            })
    }
}

#[async_trait]
impl SessionControl for FakeRegistry {
    async fn start(&self, descriptor: ContentDescriptor) -> TorrentResult<SessionSnapshot> {
        let parsed = descriptor.parse()?;
        self.snapshot(&parsed.hash)
    }

    async fn pause(&self, hash: &InfoHash) -> TorrentResult<SessionSnapshot> {
        self.snapshot(hash)
    }

    async fn resume(&self, hash: &InfoHash) -> TorrentResult<SessionSnapshot> {
        let snapshot = self.snapshot(hash)?;
        if matches!(snapshot.state, SessionState::Failed { .. }) {
            return Err(TorrentError::InvalidState {
                hash: hash.to_string(),
                operation: "resume",
                state: snapshot.state.label(),
            });
        }
        Ok(snapshot)
    }

    async fn delete(&self, _hash: &InfoHash) -> TorrentResult<()> {
        Ok(())
    }

    async fn restore(&self) -> TorrentResult<Vec<SessionSnapshot>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl SessionInspector for FakeRegistry {
    async fn get(&self, hash: &InfoHash) -> TorrentResult<SessionSnapshot> {
        self.snapshot(hash)
    }

    async fn list(&self) -> TorrentResult<Vec<SessionSnapshot>> {
        let snapshot = InfoHash::parse(HASH).and_then(|hash| self.snapshot(&hash));
        Ok(snapshot.into_iter().collect())
    }

    async fn open_stream(&self, hash: &InfoHash) -> TorrentResult<StreamSource> {
        let sessions = self.sessions.lock().map_err(|_| TorrentError::SessionNotFound {
            hash: hash.to_string(),
        })?;
        let session = sessions.get(hash).ok_or_else(|| TorrentError::SessionNotFound {
            hash: hash.to_string(),
        })?;
        let file = session
            .snapshot
            .selected_file
            .clone()
            .ok_or(TorrentError::InvalidState {
                hash: hash.to_string(),
                operation: "stream",
                state: "pending",
            })?;
        Ok(StreamSource {
            path: file.absolute_path(&session.snapshot.storage_path),
            total_bytes: file.size_bytes,
            content_type: file.content_type(),
            reader: session.coverage.reader(),
        })
    }
}

struct MapCatalog;

#[async_trait]
impl CatalogResolver for MapCatalog {
    async fn resolve(&self, slug: &str) -> anyhow::Result<Option<ContentDescriptor>> {
        Ok((slug == "sample").then(|| ContentDescriptor::new(HASH, "Sample")))
    }
}

fn server_for(
    registry: &Arc<FakeRegistry>,
    events: &EventBus,
    static_roots: Vec<PathBuf>,
) -> Result<ApiServer> {
    let catalog: Arc<dyn CatalogResolver> = Arc::new(MapCatalog);
    Ok(ApiServer::new(
        SessionHandles::new(registry.clone(), registry.clone()),
        Some(catalog),
        events.clone(),
        Metrics::new()?,
        StreamOptions {
            static_roots,
            read_recheck: Duration::from_millis(50),
        },
    ))
}

struct Harness {
    router: Router,
    registry: Arc<FakeRegistry>,
    events: EventBus,
    storage: TempDir,
}

impl Harness {
    fn new() -> Result<Self> {
        Self::with_roots(Vec::new())
    }

    fn with_roots(static_roots: Vec<PathBuf>) -> Result<Self> {
        let storage = TempDir::new()?;
        std::fs::write(storage.path().join("movie.mp4"), sample_bytes(FILE_LEN))?;
        let registry = Arc::new(FakeRegistry::default());
        let events = EventBus::new();
        let server = server_for(&registry, &events, static_roots)?;
        Ok(Self {
            router: server.router(),
            registry,
            events,
            storage,
        })
    }

    fn complete_session(&self) -> Result<CoverageHandle> {
        let coverage = self
            .registry
            .insert(self.storage.path(), SessionState::Completed)?;
        coverage.insert(0..FILE_LEN as u64);
        Ok(coverage)
    }

    async fn send(&self, request: Request<Body>) -> Result<Response> {
        Ok(self.router.clone().oneshot(request).await?)
    }

    async fn get(&self, uri: &str, range: Option<&str>) -> Result<Response> {
        let mut builder = Request::builder().uri(uri);
        if let Some(range) = range {
            builder = builder.header(header::RANGE, range);
        }
        self.send(builder.body(Body::empty())?).await
    }
}

fn header_str<'a>(response: &'a Response, name: header::HeaderName) -> Option<&'a str> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
}

async fn body_bytes(response: Response) -> Result<Vec<u8>> {
    Ok(to_bytes(response.into_body(), usize::MAX).await?.to_vec())
}

#[tokio::test]
async fn first_byte_range_returns_one_byte() -> Result<()> {
    let harness = Harness::new()?;
    harness.complete_session()?;

    let response = harness.get("/stream/sample", Some("bytes=0-0")).await?;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header_str(&response, header::CONTENT_LENGTH), Some("1"));
    assert_eq!(
        header_str(&response, header::CONTENT_RANGE),
        Some("bytes 0-0/1000000")
    );
    assert_eq!(header_str(&response, header::ACCEPT_RANGES), Some("bytes"));
    assert_eq!(header_str(&response, header::CONTENT_TYPE), Some("video/mp4"));
    assert_eq!(body_bytes(response).await?, expected_slice(0, 1));
    Ok(())
}

#[tokio::test]
async fn missing_range_header_serves_whole_file_as_partial() -> Result<()> {
    let harness = Harness::new()?;
    harness.complete_session()?;

    let response = harness.get("/stream/sample", None).await?;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        header_str(&response, header::CONTENT_RANGE),
        Some("bytes 0-999999/1000000")
    );
    assert_eq!(body_bytes(response).await?.len(), FILE_LEN);
    Ok(())
}

#[tokio::test]
async fn suffix_and_open_ranges_resolve_against_length() -> Result<()> {
    let harness = Harness::new()?;
    harness.complete_session()?;

    let response = harness.get("/stream/sample", Some("bytes=-500")).await?;
    assert_eq!(
        header_str(&response, header::CONTENT_RANGE),
        Some("bytes 999500-999999/1000000")
    );
    assert_eq!(body_bytes(response).await?, expected_slice(999_500, FILE_LEN));

    let response = harness
        .get("/stream/sample", Some("bytes=999990-"))
        .await?;
    assert_eq!(header_str(&response, header::CONTENT_LENGTH), Some("10"));
    assert_eq!(body_bytes(response).await?, expected_slice(999_990, FILE_LEN));

    let response = harness
        .get("/stream/sample", Some("bytes=10-5000000"))
        .await?;
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    Ok(())
}

#[tokio::test]
async fn range_past_end_is_not_satisfiable_with_empty_body() -> Result<()> {
    let harness = Harness::new()?;
    harness.complete_session()?;

    let response = harness
        .get("/stream/sample", Some("bytes=1000000-"))
        .await?;
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(
        header_str(&response, header::CONTENT_RANGE),
        Some("bytes */1000000")
    );
    assert!(body_bytes(response).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn multi_range_requests_are_rejected() -> Result<()> {
    let harness = Harness::new()?;
    harness.complete_session()?;

    let response = harness
        .get("/stream/sample", Some("bytes=0-10,20-30"))
        .await?;
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    Ok(())
}

#[tokio::test]
async fn malformed_range_header_is_ignored() -> Result<()> {
    let harness = Harness::new()?;
    harness.complete_session()?;

    for value in ["bytes=5-1", "items=0-1"] {
        let response = harness.get("/stream/sample", Some(value)).await?;
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT, "{value}");
        assert_eq!(
            header_str(&response, header::CONTENT_RANGE),
            Some("bytes 0-999999/1000000")
        );
    }
    Ok(())
}

#[tokio::test]
async fn head_returns_headers_without_body() -> Result<()> {
    let harness = Harness::new()?;
    harness.complete_session()?;

    let request = Request::builder()
        .method(Method::HEAD)
        .uri("/stream/sample")
        .header(header::RANGE, "bytes=100-199")
        .body(Body::empty())?;
    let response = harness.send(request).await?;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header_str(&response, header::CONTENT_LENGTH), Some("100"));
    assert!(body_bytes(response).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn read_waits_for_coverage_then_completes() -> Result<()> {
    let harness = Harness::new()?;
    let coverage = harness
        .registry
        .insert(harness.storage.path(), SessionState::Downloading)?;
    coverage.set_status(CoverageStatus::Live);

    let response = harness
        .get("/stream/sample", Some("bytes=1000-1999"))
        .await?;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);

    let writer = coverage.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        writer.insert(0..4096);
    });

    let body = timeout(Duration::from_secs(5), body_bytes(response))
        .await
        .context("body never completed")??;
    assert_eq!(body, expected_slice(1000, 2000));
    Ok(())
}

#[tokio::test]
async fn dropping_a_response_leaves_the_session_alone() -> Result<()> {
    let harness = Harness::new()?;
    let coverage = harness
        .registry
        .insert(harness.storage.path(), SessionState::Downloading)?;
    coverage.set_status(CoverageStatus::Live);
    coverage.insert(0..65_536);

    let response = harness.get("/stream/sample", None).await?;
    let mut stream = response.into_body().into_data_stream();
    let first = stream.next().await.context("no first chunk")??;
    assert_eq!(first.len(), 65_536);
    drop(stream);

    assert!(coverage.drain_readers(Duration::from_secs(2)).await);
    let hash = InfoHash::parse(HASH)?;
    assert_eq!(
        harness.registry.snapshot(&hash)?.state,
        SessionState::Downloading
    );
    Ok(())
}

#[tokio::test]
async fn unknown_hash_and_slug_return_not_found() -> Result<()> {
    let harness = Harness::new()?;

    let response = harness.get("/stream/nothing-here", None).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        header_str(&response, header::CONTENT_TYPE),
        Some("application/problem+json")
    );

    let request = Request::builder()
        .method(Method::POST)
        .uri(format!("/stream/pause/{HASH}"))
        .body(Body::empty())?;
    let response = harness.send(request).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let problem: serde_json::Value = serde_json::from_slice(&body_bytes(response).await?)?;
    assert_eq!(problem["status"], 404);
    Ok(())
}

#[tokio::test]
async fn invalid_descriptor_is_a_bad_request() -> Result<()> {
    let harness = Harness::new()?;
    let request = Request::builder()
        .method(Method::POST)
        .uri("/stream/start")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"descriptor":"not a magnet"}"#))?;
    let response = harness.send(request).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn start_returns_the_session_view() -> Result<()> {
    let harness = Harness::new()?;
    harness.complete_session()?;
    let request = Request::builder()
        .method(Method::POST)
        .uri("/stream/start")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(format!(r#"{{"descriptor":"{HASH}"}}"#)))?;
    let response = harness.send(request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let view: serde_json::Value = serde_json::from_slice(&body_bytes(response).await?)?;
    assert_eq!(view["hash"], HASH);
    assert_eq!(view["selected_file"]["content_type"], "video/mp4");

    let response = harness.get("/stream/sessions", None).await?;
    let list: serde_json::Value = serde_json::from_slice(&body_bytes(response).await?)?;
    assert_eq!(list.as_array().map(Vec::len), Some(1));
    Ok(())
}

#[tokio::test]
async fn resume_of_failed_session_conflicts() -> Result<()> {
    let harness = Harness::new()?;
    harness.registry.insert(
        harness.storage.path(),
        SessionState::Failed {
            message: "adapter".into(),
        },
    )?;
    let request = Request::builder()
        .method(Method::POST)
        .uri(format!("/stream/play/{HASH}"))
        .body(Body::empty())?;
    let response = harness.send(request).await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    Ok(())
}

#[tokio::test]
async fn static_route_is_confined_to_roots() -> Result<()> {
    let root = TempDir::new()?;
    let outside = TempDir::new()?;
    std::fs::write(root.path().join("clip.webm"), sample_bytes(4096))?;
    std::fs::write(outside.path().join("secret.mp4"), sample_bytes(64))?;
    let harness = Harness::with_roots(vec![root.path().to_path_buf()])?;

    let inside = root.path().join("clip.webm");
    let response = harness
        .get(
            &format!("/stream/file/stream?path={}&range=0-9", inside.display()),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header_str(&response, header::CONTENT_TYPE), Some("video/webm"));
    assert_eq!(body_bytes(response).await?, expected_slice(0, 10));

    let secret = outside.path().join("secret.mp4");
    let response = harness
        .get(&format!("/stream/file/stream?path={}", secret.display()), None)
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let missing = root.path().join("missing.mp4");
    let response = harness
        .get(&format!("/stream/file/stream?path={}", missing.display()), None)
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn health_reports_degraded_flags() -> Result<()> {
    let harness = Harness::new()?;
    let response = harness.get("/health", None).await?;
    let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await?)?;
    assert_eq!(body["status"], "ok");

    harness.events.publish(Event::HealthChanged {
        degraded: vec!["disk_space".into()],
    });
    let mut status = String::new();
    for _ in 0..50 {
        let response = harness.get("/health", None).await?;
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await?)?;
        status = body["status"].as_str().unwrap_or_default().to_string();
        if status == "degraded" {
            assert_eq!(body["degraded"][0], "disk_space");
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(status, "degraded");

    let response = harness.get("/metrics", None).await?;
    let text = String::from_utf8(body_bytes(response).await?)?;
    assert!(text.contains("reel_http_requests_total"));
    Ok(())
}

#[tokio::test]
async fn sse_emits_filtered_event_frames() -> Result<()> {
    let harness = Harness::new()?;
    let response = harness
        .get(&format!("/stream/events?hash={HASH}"), None)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let events = harness.events.clone();
    let publisher = tokio::spawn(async move {
        for _ in 0..100 {
            events.publish(Event::StateChanged {
                hash: "0000000000000000000000000000000000000000".into(),
                state: SessionState::Paused,
            });
            events.publish(Event::StateChanged {
                hash: HASH.into(),
                state: SessionState::Downloading,
            });
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    });

    let mut stream = response.into_body().into_data_stream();
    let frame = timeout(Duration::from_secs(5), stream.next())
        .await
        .context("no sse frame")?
        .context("sse stream ended")??;
    publisher.abort();

    let text = String::from_utf8(frame.to_vec())?;
    assert!(text.contains("event: state_changed"));
    assert!(text.contains(HASH));
    assert!(!text.contains("0000000000000000000000000000000000000000"));
    Ok(())
}

#[tokio::test]
async fn occupied_port_reports_the_address_it_tried() -> Result<()> {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = occupied.local_addr()?;
    let server = server_for(&Arc::new(FakeRegistry::default()), &EventBus::new(), Vec::new())?;

    let err = server
        .serve(addr, std::future::pending())
        .await
        .expect_err("port is already taken");
    assert_eq!(err.operation(), "api_server.bind");
    assert!(matches!(err, ApiServerError::Bind { addr: tried, .. } if tried == addr));
    drop(occupied);
    Ok(())
}

#[tokio::test]
async fn request_counter_uses_route_templates() -> Result<()> {
    let harness = Harness::new()?;
    harness.complete_session()?;
    harness.get("/stream/sample", Some("bytes=0-0")).await?;

    let response = harness.get("/metrics", None).await?;
    let exposition = String::from_utf8(body_bytes(response).await?)?;
    assert!(exposition.contains(r#"route="/stream/{slug}""#), "{exposition}");
    assert!(!exposition.contains(r#"route="/stream/sample""#));
    Ok(())
}
