use std::path::PathBuf;

use reel_torrent_core::{InfoHash, SwarmFile};
use tokio::sync::oneshot;

use crate::error::SwarmResult;

/// Content admitted to a swarm session.
#[derive(Debug, Clone)]
pub struct AddRequest {
    /// Content hash identifying the swarm.
    pub hash: InfoHash,
    /// Directory the selected file is written under.
    pub storage_path: PathBuf,
    /// Tracker URLs announced by the descriptor.
    pub trackers: Vec<String>,
}

/// Commands serviced by the per-adapter swarm worker.
#[derive(Debug)]
pub enum SwarmCommand {
    /// Admit content to the session.
    Add(Box<AddRequest>),
    /// Reply with the file list once the swarm has produced it.
    Files {
        /// Receives the file list; dropped if the worker exits first.
        respond_to: oneshot::Sender<Vec<SwarmFile>>,
    },
    /// Restrict the transfer to one file.
    SelectFile {
        /// Index in the swarm's file list.
        index: usize,
        /// Completion of the selection.
        respond_to: oneshot::Sender<SwarmResult<()>>,
    },
    /// Stop transferring and flush writes.
    Pause {
        /// Completion of the pause.
        respond_to: oneshot::Sender<SwarmResult<()>>,
    },
    /// Release the session and stop the worker.
    Destroy {
        /// Completion of the teardown.
        respond_to: oneshot::Sender<SwarmResult<()>>,
    },
}
