//! `REEL_*` environment lookup.

use std::net::IpAddr;

use crate::defaults;
use crate::error::{ConfigError, ConfigResult};
use crate::model::{EngineConfig, HttpConfig, LoggingConfig, StorageConfig, SwarmConfig};
use crate::validate::{
    parse_bool, parse_log_format, parse_millis, parse_number, parse_path, parse_path_list,
    parse_port, parse_positive, parse_secs,
};

pub const BIND_ADDR: &str = "REEL_BIND_ADDR";
pub const HTTP_PORT: &str = "REEL_HTTP_PORT";
pub const DATA_DIR: &str = "REEL_DATA_DIR";
pub const STORE_PATH: &str = "REEL_STORE_PATH";
pub const SEED_DIR: &str = "REEL_SEED_DIR";
pub const CATALOG_PATH: &str = "REEL_CATALOG_PATH";
pub const STATIC_ROOTS: &str = "REEL_STATIC_ROOTS";
pub const MIN_FREE_BYTES: &str = "REEL_MIN_FREE_BYTES";
pub const DISK_CHECK_SECS: &str = "REEL_DISK_CHECK_SECS";
pub const METADATA_TIMEOUT_SECS: &str = "REEL_METADATA_TIMEOUT_SECS";
pub const PROGRESS_INTERVAL_MS: &str = "REEL_PROGRESS_INTERVAL_MS";
pub const SWARM_RATE_BPS: &str = "REEL_SWARM_RATE_BPS";
pub const SWARM_PIECE_BYTES: &str = "REEL_SWARM_PIECE_BYTES";
pub const SWARM_POLL_MS: &str = "REEL_SWARM_POLL_MS";
pub const SWARM_PEERS: &str = "REEL_SWARM_PEERS";
pub const AUTO_RESUME: &str = "REEL_AUTO_RESUME";
pub const LOG_LEVEL: &str = "REEL_LOG_LEVEL";
pub const LOG_FORMAT: &str = "REEL_LOG_FORMAT";

impl EngineConfig {
    /// Load from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for the first variable that fails
    /// validation.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for the first variable that fails
    /// validation.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let bind_addr = match get(BIND_ADDR) {
            Some(raw) => raw
                .trim()
                .parse::<IpAddr>()
                .map_err(|_| ConfigError::InvalidValue {
                    key: BIND_ADDR,
                    value: raw.clone(),
                    reason: "must be an IP address",
                })?,
            None => defaults::BIND_ADDR
                .parse()
                .map_err(|_| ConfigError::InvalidValue {
                    key: BIND_ADDR,
                    value: defaults::BIND_ADDR.to_string(),
                    reason: "must be an IP address",
                })?,
        };
        let http = HttpConfig {
            bind_addr,
            port: get(HTTP_PORT)
                .map(|raw| parse_port(HTTP_PORT, &raw))
                .transpose()?
                .unwrap_or(defaults::HTTP_PORT),
        };

        let data_dir = get(DATA_DIR)
            .map(|raw| parse_path(DATA_DIR, &raw))
            .transpose()?
            .unwrap_or_else(|| defaults::DATA_DIR.into());
        let storage = StorageConfig {
            static_roots: get(STATIC_ROOTS)
                .map(|raw| parse_path_list(STATIC_ROOTS, &raw))
                .transpose()?
                .unwrap_or_else(|| vec![data_dir.clone()]),
            data_dir,
            store_path: get(STORE_PATH)
                .map(|raw| parse_path(STORE_PATH, &raw))
                .transpose()?
                .unwrap_or_else(|| defaults::STORE_PATH.into()),
            min_free_bytes: get(MIN_FREE_BYTES)
                .map(|raw| parse_number(MIN_FREE_BYTES, &raw))
                .transpose()?
                .unwrap_or(defaults::MIN_FREE_BYTES),
            disk_check_interval: get(DISK_CHECK_SECS)
                .map(|raw| parse_secs(DISK_CHECK_SECS, &raw))
                .transpose()?
                .unwrap_or(defaults::DISK_CHECK_INTERVAL),
        };

        let swarm = SwarmConfig {
            seed_dir: get(SEED_DIR)
                .map(|raw| parse_path(SEED_DIR, &raw))
                .transpose()?
                .unwrap_or_else(|| defaults::SEED_DIR.into()),
            rate_bps: get(SWARM_RATE_BPS)
                .map(|raw| parse_positive(SWARM_RATE_BPS, &raw))
                .transpose()?
                .unwrap_or(defaults::SWARM_RATE_BPS),
            piece_bytes: get(SWARM_PIECE_BYTES)
                .map(|raw| parse_positive(SWARM_PIECE_BYTES, &raw))
                .transpose()?
                .unwrap_or(defaults::SWARM_PIECE_BYTES),
            poll_interval: get(SWARM_POLL_MS)
                .map(|raw| parse_millis(SWARM_POLL_MS, &raw))
                .transpose()?
                .unwrap_or(defaults::SWARM_POLL_INTERVAL),
            peers: get(SWARM_PEERS)
                .map(|raw| parse_number(SWARM_PEERS, &raw))
                .transpose()?
                .unwrap_or(defaults::SWARM_PEERS),
            metadata_timeout: get(METADATA_TIMEOUT_SECS)
                .map(|raw| parse_secs(METADATA_TIMEOUT_SECS, &raw))
                .transpose()?
                .unwrap_or(defaults::METADATA_TIMEOUT),
        };

        Ok(Self {
            http,
            storage,
            swarm,
            progress_interval: get(PROGRESS_INTERVAL_MS)
                .map(|raw| parse_millis(PROGRESS_INTERVAL_MS, &raw))
                .transpose()?
                .unwrap_or(defaults::PROGRESS_INTERVAL),
            catalog_path: get(CATALOG_PATH)
                .map(|raw| parse_path(CATALOG_PATH, &raw))
                .transpose()?,
            auto_resume: get(AUTO_RESUME)
                .map(|raw| parse_bool(AUTO_RESUME, &raw))
                .transpose()?
                .unwrap_or(false),
            logging: LoggingConfig {
                level: get(LOG_LEVEL).unwrap_or_else(|| defaults::LOG_LEVEL.to_string()),
                format: get(LOG_FORMAT)
                    .map(|raw| parse_log_format(LOG_FORMAT, &raw))
                    .transpose()?
                    .unwrap_or_else(|| defaults::LOG_FORMAT.to_string()),
            },
        })
    }
}
