//! Swarm adapter backed by a per-session background worker.
//!
//! Each adapter owns one worker task that drives a [`session`] and answers
//! commands over a bounded channel. Piece availability is written straight
//! into the session's coverage handle; lifecycle observations go out on the
//! adapter's own broadcast channel, which closes when the worker stops.

pub mod command;
pub mod error;
mod session;
mod worker;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reel_torrent_core::{
    AdapterEvent, AdapterSpec, InfoHash, SelectedFile, SwarmAdapter, SwarmAdapterFactory,
    SwarmFile, TorrentError, TorrentResult,
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info};

use crate::command::{AddRequest, SwarmCommand};
pub use crate::error::{SwarmError, SwarmResult};
use crate::error::op_failed;

const COMMAND_BUFFER: usize = 128;
const EVENT_BUFFER: usize = 256;

/// Tuning for the seed-directory swarm backend.
#[derive(Debug, Clone)]
pub struct SwarmSettings {
    /// Root holding one directory of content per info-hash.
    pub seed_dir: PathBuf,
    /// Transfer budget per second, per adapter.
    pub rate_bps: u64,
    pub piece_bytes: u64,
    /// Worker poll cadence.
    pub poll_interval: Duration,
    /// Peer count reported while the seed is reachable.
    pub peers: u32,
}

/// Handle to one live swarm worker.
pub struct SwarmClient {
    hash: InfoHash,
    commands: mpsc::Sender<SwarmCommand>,
    events: Mutex<broadcast::Receiver<AdapterEvent>>,
}

impl SwarmClient {
    async fn send_command(
        &self,
        operation: &'static str,
        command: SwarmCommand,
    ) -> TorrentResult<()> {
        self.commands.send(command).await.map_err(|_| {
            op_failed(
                operation,
                self.hash.as_str(),
                SwarmError::WorkerUnavailable { operation },
            )
        })
    }

    async fn request(
        &self,
        operation: &'static str,
        build: impl FnOnce(oneshot::Sender<SwarmResult<()>>) -> SwarmCommand,
    ) -> TorrentResult<()> {
        let (respond_to, rx) = oneshot::channel();
        self.send_command(operation, build(respond_to)).await?;
        rx.await
            .map_err(|_| SwarmError::WorkerUnavailable { operation })
            .and_then(|result| result)
            .map_err(|err| op_failed(operation, self.hash.as_str(), err))
    }
}

#[async_trait]
impl SwarmAdapter for SwarmClient {
    fn hash(&self) -> &InfoHash {
        &self.hash
    }

    fn subscribe(&self) -> broadcast::Receiver<AdapterEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .resubscribe()
    }

    async fn files(&self, wait: Duration) -> TorrentResult<Vec<SwarmFile>> {
        let (respond_to, rx) = oneshot::channel();
        self.send_command("file_list", SwarmCommand::Files { respond_to })
            .await?;
        match tokio::time::timeout(wait, rx).await {
            Ok(Ok(files)) => Ok(files),
            Ok(Err(_)) => Err(op_failed(
                "file_list",
                self.hash.as_str(),
                SwarmError::WorkerUnavailable {
                    operation: "file_list",
                },
            )),
            Err(_) => Err(TorrentError::AdapterTimeout {
                hash: self.hash.to_string(),
                operation: "file_list",
            }),
        }
    }

    async fn select_file(&self, file: &SwarmFile) -> TorrentResult<()> {
        let index = file.index;
        self.request("select_file", |respond_to| SwarmCommand::SelectFile {
            index,
            respond_to,
        })
        .await
    }

    async fn pause(&self) -> TorrentResult<()> {
        self.request("pause", |respond_to| SwarmCommand::Pause { respond_to })
            .await
    }

    async fn destroy(&self) -> TorrentResult<()> {
        let (respond_to, rx) = oneshot::channel();
        // A worker that already exited has nothing left to release.
        if self
            .commands
            .send(SwarmCommand::Destroy { respond_to })
            .await
            .is_err()
        {
            return Ok(());
        }
        match rx.await {
            Ok(result) => result.map_err(|err| op_failed("destroy", self.hash.as_str(), err)),
            Err(_) => Ok(()),
        }
    }
}

/// Builds a [`SwarmClient`] and its worker per adapter request.
#[derive(Debug, Clone)]
pub struct SwarmClientFactory {
    settings: SwarmSettings,
}

impl SwarmClientFactory {
    #[must_use]
    pub const fn new(settings: SwarmSettings) -> Self {
        Self { settings }
    }

    #[must_use]
    pub const fn settings(&self) -> &SwarmSettings {
        &self.settings
    }
}

#[async_trait]
impl SwarmAdapterFactory for SwarmClientFactory {
    async fn create(&self, spec: AdapterSpec) -> TorrentResult<Arc<dyn SwarmAdapter>> {
        let parsed = spec.descriptor.parse()?;
        let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
        let (events, template) = broadcast::channel(EVENT_BUFFER);
        let session = session::create_session(&self.settings);
        worker::spawn(
            spec.hash.clone(),
            session,
            rx,
            events,
            spec.coverage,
            self.settings.poll_interval,
        );

        let client = SwarmClient {
            hash: spec.hash.clone(),
            commands,
            events: Mutex::new(template),
        };
        client
            .send_command(
                "add",
                SwarmCommand::Add(Box::new(AddRequest {
                    hash: spec.hash.clone(),
                    storage_path: spec.storage_path,
                    trackers: parsed.trackers,
                })),
            )
            .await?;
        info!(hash = %spec.hash, "swarm adapter created");
        Ok(Arc::new(client))
    }

    async fn verify_storage(&self, spec: &AdapterSpec, file: &SelectedFile) -> TorrentResult<u64> {
        let file = SwarmFile {
            index: file.index,
            path: file.path.clone(),
            size_bytes: file.size_bytes,
        };
        let present = session::verify_stored(&self.settings, &spec.hash, &spec.storage_path, file)
            .await
            .map_err(|err| op_failed("verify_storage", spec.hash.as_str(), err))?;
        let mut verified_bytes = 0;
        for range in present {
            verified_bytes += range.end - range.start;
            spec.coverage.insert(range);
        }
        debug!(hash = %spec.hash, verified_bytes, "stored pieces verified");
        Ok(verified_bytes)
    }
}
