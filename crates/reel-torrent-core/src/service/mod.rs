//! Adapter, registry, and catalog traits.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::coverage::CoverageReader;
use crate::error::TorrentResult;
use crate::model::{
    AdapterEvent, AdapterSpec, ContentDescriptor, InfoHash, SelectedFile, SessionSnapshot,
    SwarmFile,
};

/// Wrapper around one live swarm download. One instance per session; it is
/// destroyed on pause/delete and never reused across a pause boundary.
#[async_trait]
pub trait SwarmAdapter: Send + Sync {
    /// Content hash this adapter serves.
    fn hash(&self) -> &InfoHash;

    /// Subscribe to this adapter's own event stream. The stream ends when the
    /// adapter is destroyed.
    fn subscribe(&self) -> broadcast::Receiver<AdapterEvent>;

    /// Wait (bounded) for the swarm's initial file list.
    async fn files(&self, wait: Duration) -> TorrentResult<Vec<SwarmFile>>;

    /// Restrict the transfer to one file of the swarm.
    async fn select_file(&self, file: &SwarmFile) -> TorrentResult<()>;

    /// Stop transferring and flush pending writes, keeping resources open.
    async fn pause(&self) -> TorrentResult<()>;

    /// Release network and disk resources. Terminal for this instance.
    async fn destroy(&self) -> TorrentResult<()>;
}

/// Constructs adapters on `start`/`resume`.
#[async_trait]
pub trait SwarmAdapterFactory: Send + Sync {
    async fn create(&self, spec: AdapterSpec) -> TorrentResult<Arc<dyn SwarmAdapter>>;

    /// Check the bytes of `file` already stored under `spec.storage_path`
    /// without joining the swarm, inserting every verified range into
    /// `spec.coverage`. Returns the verified byte count.
    async fn verify_storage(&self, spec: &AdapterSpec, file: &SelectedFile) -> TorrentResult<u64>;
}

/// Lifecycle operations exposed to the HTTP layer.
#[async_trait]
pub trait SessionControl: Send + Sync {
    /// Create, reuse, or resume the session for `descriptor`.
    async fn start(&self, descriptor: ContentDescriptor) -> TorrentResult<SessionSnapshot>;

    /// Release the adapter, keeping downloaded bytes. Idempotent.
    async fn pause(&self, hash: &InfoHash) -> TorrentResult<SessionSnapshot>;

    /// Recreate the adapter for a paused session. Idempotent.
    async fn resume(&self, hash: &InfoHash) -> TorrentResult<SessionSnapshot>;

    /// Tear down and remove the session and its storage. Idempotent.
    async fn delete(&self, hash: &InfoHash) -> TorrentResult<()>;

    /// Rehydrate persisted sessions as paused.
    async fn restore(&self) -> TorrentResult<Vec<SessionSnapshot>>;
}

/// Read-side access used by the HTTP layer.
#[async_trait]
pub trait SessionInspector: Send + Sync {
    async fn get(&self, hash: &InfoHash) -> TorrentResult<SessionSnapshot>;

    async fn list(&self) -> TorrentResult<Vec<SessionSnapshot>>;

    /// Open the selected file for range streaming.
    async fn open_stream(&self, hash: &InfoHash) -> TorrentResult<StreamSource>;
}

/// Selected file plus the coverage reader guarding it.
pub struct StreamSource {
    pub path: PathBuf,
    pub total_bytes: u64,
    pub content_type: &'static str,
    pub reader: CoverageReader,
}

/// Resolves a human slug into a descriptor.
#[async_trait]
pub trait CatalogResolver: Send + Sync {
    async fn resolve(&self, slug: &str) -> anyhow::Result<Option<ContentDescriptor>>;
}
