//! API application state and health tracking.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use reel_events::{Event as CoreEvent, EventBus};
use reel_telemetry::Metrics;
use reel_torrent_core::{CatalogResolver, SessionControl, SessionInspector};
use tokio::task::JoinHandle;
use tracing::debug;

/// Registry entry points used by the HTTP handlers.
#[derive(Clone)]
pub struct SessionHandles {
    control: Arc<dyn SessionControl>,
    inspector: Arc<dyn SessionInspector>,
}

impl SessionHandles {
    /// Bundle the lifecycle and read-side views of the registry.
    #[must_use]
    pub fn new(control: Arc<dyn SessionControl>, inspector: Arc<dyn SessionInspector>) -> Self {
        Self { control, inspector }
    }

    pub(crate) fn control(&self) -> &dyn SessionControl {
        self.control.as_ref()
    }

    pub(crate) fn inspector(&self) -> &dyn SessionInspector {
        self.inspector.as_ref()
    }
}

/// Serving options that are not part of the registry.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Roots the static file route may read from.
    pub static_roots: Vec<PathBuf>,
    /// Upper bound on a single wait for bytes that are not yet downloaded.
    pub read_recheck: Duration,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            static_roots: Vec::new(),
            read_recheck: Duration::from_millis(500),
        }
    }
}

pub(crate) struct ApiState {
    pub(crate) sessions: SessionHandles,
    pub(crate) catalog: Option<Arc<dyn CatalogResolver>>,
    pub(crate) events: EventBus,
    pub(crate) telemetry: Metrics,
    pub(crate) options: StreamOptions,
    health_status: Arc<Mutex<Vec<String>>>,
}

impl ApiState {
    pub(crate) fn new(
        sessions: SessionHandles,
        catalog: Option<Arc<dyn CatalogResolver>>,
        events: EventBus,
        telemetry: Metrics,
        options: StreamOptions,
    ) -> Self {
        Self {
            sessions,
            catalog,
            events,
            telemetry,
            options,
            health_status: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Mirror engine health flags published on the bus.
    pub(crate) fn track_health(&self) -> JoinHandle<()> {
        let mut stream = self.events.subscribe();
        let health = Arc::clone(&self.health_status);
        tokio::spawn(async move {
            while let Some(envelope) = stream.next().await {
                if let CoreEvent::HealthChanged { degraded } = envelope.event {
                    debug!(?degraded, "health flags updated");
                    *Self::lock_guard(&health) = degraded;
                }
            }
        })
    }

    pub(crate) fn current_health_degraded(&self) -> Vec<String> {
        Self::lock_guard(&self.health_status).clone()
    }

    fn lock_guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
