#![forbid(unsafe_code)]

//! Environment-driven configuration for the reel engine.
//!
//! Layout: `model.rs` (typed sections), `defaults.rs` (fallback values),
//! `validate.rs` (parsing helpers), `loader.rs` (`REEL_*` lookup).

pub mod defaults;
pub mod error;
pub mod loader;
pub mod model;
mod validate;

pub use error::{ConfigError, ConfigResult};
pub use model::{EngineConfig, HttpConfig, LoggingConfig, StorageConfig, SwarmConfig};
