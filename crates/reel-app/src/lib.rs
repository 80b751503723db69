#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Reel engine wiring: session registry, disk guard, catalog, and bootstrap.
//!
//! Layout: `registry.rs` (session lifecycle), `broadcaster.rs` (throttled
//! progress), `disk.rs` (free-space guard), `catalog.rs` (slug lookup),
//! `bootstrap.rs` (service wiring).

/// Application bootstrap and environment loading.
pub mod bootstrap;
mod broadcaster;
/// Slug catalog backing the slug stream route.
pub mod catalog;
/// Free-space probing and the periodic disk guard.
pub mod disk;
/// Application error types.
pub mod error;
/// In-memory session registry.
pub mod registry;

pub use bootstrap::{Engine, build_engine, run_app};
pub use catalog::StaticCatalog;
pub use disk::{DiskProbe, FsDiskProbe};
pub use error::{AppError, AppResult};
pub use registry::{RegistryDeps, RegistrySettings, SessionRegistry};
