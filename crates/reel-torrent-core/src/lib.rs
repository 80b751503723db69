//! Engine-agnostic session interfaces and DTOs.

pub mod coverage;
pub mod error;
pub mod model;
pub mod service;

pub use coverage::{Coverage, CoverageHandle, CoverageReader, CoverageStatus};
pub use error::{TorrentError, TorrentResult};
pub use model::{
    AdapterEvent, AdapterSpec, ContentDescriptor, InfoHash, ParsedDescriptor, SelectedFile,
    SessionProgress, SessionSnapshot, SwarmFile, select_playable_file, video_mime,
};
pub use reel_events::{DiscoveredFile, SessionState};
pub use service::{
    CatalogResolver, SessionControl, SessionInspector, StreamSource, SwarmAdapter,
    SwarmAdapterFactory,
};
