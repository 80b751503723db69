use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use reel_api::{ApiServer, ApiServerResult, SessionHandles, StreamOptions};
use reel_config::EngineConfig;
use reel_events::EventBus;
use reel_store::SqliteSessionStore;
use reel_swarm::{SwarmClientFactory, SwarmSettings};
use reel_telemetry::{LogFormat, LoggingConfig, Metrics};
use reel_torrent_core::{CatalogResolver, SessionControl};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::catalog::StaticCatalog;
use crate::disk::{FsDiskProbe, spawn_disk_guard};
use crate::error::{AppError, AppResult};
use crate::registry::{RegistryDeps, RegistrySettings, SessionRegistry};

/// How long `delete` waits for open range responses to finish.
const READER_DRAIN: Duration = Duration::from_secs(2);
/// Upper bound on one wait for bytes the swarm has not delivered yet.
const READ_RECHECK: Duration = Duration::from_millis(500);

/// A fully wired engine: registry, background guards, and HTTP surface.
pub struct Engine {
    registry: Arc<SessionRegistry>,
    api: ApiServer,
    addr: SocketAddr,
    disk_guard: JoinHandle<()>,
}

impl Engine {
    /// The session registry backing the HTTP surface.
    #[must_use]
    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// The layered router, for in-process requests.
    #[must_use]
    pub fn router(&self) -> Router {
        self.api.router()
    }

    /// Bind the configured address and serve until `shutdown` resolves, then
    /// release every adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot bind or the server fails.
    pub async fn serve<F>(self, shutdown: F) -> AppResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Self {
            registry,
            api,
            addr,
            disk_guard,
        } = self;
        let served = api.serve(addr, shutdown).await;
        stop(registry, disk_guard, served).await
    }

    /// Serve on an already-bound listener until `shutdown` resolves, then
    /// release every adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails.
    pub async fn serve_on<F>(self, listener: TcpListener, shutdown: F) -> AppResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Self {
            registry,
            api,
            addr: _,
            disk_guard,
        } = self;
        let served = api.serve_on(listener, shutdown).await;
        stop(registry, disk_guard, served).await
    }
}

async fn stop(
    registry: Arc<SessionRegistry>,
    disk_guard: JoinHandle<()>,
    served: ApiServerResult<()>,
) -> AppResult<()> {
    disk_guard.abort();
    registry.shutdown().await;
    info!("reel engine stopped");
    served.map_err(|err| AppError::api_server(err.operation(), err))
}

/// Entry point for the binary: load configuration, install logging, and serve
/// until Ctrl-C.
///
/// # Errors
///
/// Returns an error if configuration, logging, startup, or serving fails.
pub async fn run_app() -> AppResult<()> {
    let config = EngineConfig::from_env().map_err(|err| AppError::config("config.from_env", err))?;
    let format = config
        .logging
        .format
        .parse::<LogFormat>()
        .unwrap_or_else(|()| LogFormat::infer());
    reel_telemetry::init_logging(&LoggingConfig {
        level: &config.logging.level,
        format,
        build_sha: reel_telemetry::build_sha(),
    })
    .map_err(|err| AppError::telemetry("telemetry.init", err))?;

    info!(
        addr = %config.http.socket_addr(),
        data_dir = %config.storage.data_dir.display(),
        "reel engine bootstrap starting"
    );
    let engine = build_engine(&config).await?;
    engine.serve(shutdown_signal()).await
}

/// Wire every component from `config` and restore persisted sessions.
///
/// Must be called inside a Tokio runtime.
///
/// # Errors
///
/// Returns an error if the data directory, store, catalog, or restore fails.
pub async fn build_engine(config: &EngineConfig) -> AppResult<Engine> {
    let data_dir = &config.storage.data_dir;
    tokio::fs::create_dir_all(data_dir)
        .await
        .map_err(|err| AppError::io("data_dir.create", data_dir, err))?;
    if let Some(parent) = config.storage.store_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| AppError::io("store_dir.create", parent, err))?;
    }

    let telemetry = Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;
    let events = EventBus::new();
    let store = SqliteSessionStore::open(&config.storage.store_path)
        .await
        .map_err(|err| AppError::store("store.open", err))?;
    let factory = SwarmClientFactory::new(SwarmSettings {
        seed_dir: config.swarm.seed_dir.clone(),
        rate_bps: config.swarm.rate_bps,
        piece_bytes: config.swarm.piece_bytes,
        poll_interval: config.swarm.poll_interval,
        peers: config.swarm.peers,
    });

    let registry = Arc::new(SessionRegistry::new(
        RegistryDeps {
            store: Arc::new(store),
            factory: Arc::new(factory),
            disk: Arc::new(FsDiskProbe),
            events: events.clone(),
            telemetry: telemetry.clone(),
        },
        RegistrySettings {
            data_dir: data_dir.clone(),
            min_free_bytes: config.storage.min_free_bytes,
            metadata_timeout: config.swarm.metadata_timeout,
            progress_interval: config.progress_interval,
            reader_drain: READER_DRAIN,
        },
    ));

    let restored = registry
        .restore()
        .await
        .map_err(|err| AppError::torrent("registry.restore", err))?;
    info!(count = restored.len(), "persisted sessions restored as paused");
    if config.auto_resume && !restored.is_empty() {
        let resumed = registry.resume_paused().await;
        info!(resumed, "auto-resume finished");
    }

    let disk_guard = spawn_disk_guard(
        Arc::clone(&registry),
        events.clone(),
        config.storage.disk_check_interval,
    );

    let catalog = match &config.catalog_path {
        Some(path) => {
            let catalog = StaticCatalog::load(path)?;
            info!(path = %path.display(), slugs = catalog.len(), "catalog loaded");
            catalog
        }
        None => StaticCatalog::default(),
    };
    let catalog: Arc<dyn CatalogResolver> = Arc::new(catalog);

    let api = ApiServer::new(
        SessionHandles::new(registry.clone(), registry.clone()),
        Some(catalog),
        events,
        telemetry,
        StreamOptions {
            static_roots: config.storage.static_roots.clone(),
            read_recheck: READ_RECHECK,
        },
    );

    Ok(Engine {
        registry,
        api,
        addr: config.http.socket_addr(),
        disk_guard,
    })
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::Path;

    fn config_for(root: &Path) -> anyhow::Result<EngineConfig> {
        let vars: HashMap<&str, String> = HashMap::from([
            ("REEL_DATA_DIR", root.join("data").display().to_string()),
            (
                "REEL_STORE_PATH",
                root.join("state").join("sessions.db").display().to_string(),
            ),
            ("REEL_SEED_DIR", root.join("seed").display().to_string()),
            ("REEL_MIN_FREE_BYTES", "0".to_string()),
        ]);
        Ok(EngineConfig::from_lookup(|key| vars.get(key).cloned())?)
    }

    #[tokio::test]
    async fn build_engine_creates_directories_and_starts_empty() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let config = config_for(temp.path())?;

        let engine = build_engine(&config).await?;
        assert!(temp.path().join("data").is_dir());
        assert!(temp.path().join("state").join("sessions.db").exists());

        let sessions = reel_torrent_core::SessionInspector::list(engine.registry().as_ref()).await?;
        assert!(sessions.is_empty());
        engine.registry().shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn engine_router_serves_health_in_process() -> anyhow::Result<()> {
        use axum::body::Body;
        use axum::http::{Request, StatusCode};
        use tower::ServiceExt;

        let temp = tempfile::TempDir::new()?;
        let engine = build_engine(&config_for(temp.path())?).await?;

        let response = engine
            .router()
            .oneshot(Request::builder().uri("/health").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        engine.registry().shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn missing_catalog_file_fails_startup() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let mut config = config_for(temp.path())?;
        config.catalog_path = Some(temp.path().join("absent.json"));

        assert!(matches!(
            build_engine(&config).await,
            Err(AppError::Io {
                operation: "catalog.read",
                ..
            })
        ));
        Ok(())
    }
}
