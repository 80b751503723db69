//! Typed configuration sections.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

/// Fully resolved engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineConfig {
    pub http: HttpConfig,
    pub storage: StorageConfig,
    pub swarm: SwarmConfig,
    /// Upper bound on progress broadcasts per session.
    pub progress_interval: Duration,
    /// Optional JSON slug catalog.
    pub catalog_path: Option<PathBuf>,
    /// Resume every restored session at startup.
    pub auto_resume: bool,
    pub logging: LoggingConfig,
}

/// HTTP listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpConfig {
    pub bind_addr: IpAddr,
    pub port: u16,
}

impl HttpConfig {
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }
}

/// On-disk layout and disk-space policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageConfig {
    /// Root under which each session gets `<data_dir>/<hash>`.
    pub data_dir: PathBuf,
    /// SQLite file backing the session store.
    pub store_path: PathBuf,
    /// Roots the static file endpoint may serve from.
    pub static_roots: Vec<PathBuf>,
    /// Floor below which new sessions are rejected.
    pub min_free_bytes: u64,
    pub disk_check_interval: Duration,
}

/// Swarm adapter tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwarmConfig {
    /// Loopback seed root (`<seed_dir>/<hash>/...`).
    pub seed_dir: PathBuf,
    pub rate_bps: u64,
    pub piece_bytes: u64,
    pub poll_interval: Duration,
    pub peers: u32,
    /// Bounded wait for the initial file list.
    pub metadata_timeout: Duration,
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty` or `json`.
    pub format: String,
}
