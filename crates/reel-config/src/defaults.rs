//! Fallback values applied when a variable is unset.

use std::time::Duration;

pub const BIND_ADDR: &str = "127.0.0.1";
pub const HTTP_PORT: u16 = 7878;
pub const DATA_DIR: &str = "./data/sessions";
pub const STORE_PATH: &str = "./data/reel.sqlite";
pub const SEED_DIR: &str = "./data/seeds";
/// 1 GiB.
pub const MIN_FREE_BYTES: u64 = 1 << 30;
pub const DISK_CHECK_INTERVAL: Duration = Duration::from_secs(30);
pub const METADATA_TIMEOUT: Duration = Duration::from_secs(30);
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);
/// 8 MiB/s.
pub const SWARM_RATE_BPS: u64 = 8 << 20;
/// 256 KiB.
pub const SWARM_PIECE_BYTES: u64 = 256 << 10;
pub const SWARM_POLL_INTERVAL: Duration = Duration::from_millis(200);
pub const SWARM_PEERS: u32 = 4;
pub const LOG_LEVEL: &str = "info";
pub const LOG_FORMAT: &str = "pretty";
