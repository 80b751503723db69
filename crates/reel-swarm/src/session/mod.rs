#![allow(clippy::redundant_pub_crate)]

use std::ops::Range;

use async_trait::async_trait;
use reel_torrent_core::{SessionProgress, SwarmFile};

use crate::SwarmSettings;
use crate::command::AddRequest;
use crate::error::SwarmResult;

mod loopback;

pub(crate) use loopback::verify_stored;

/// Observations drained from a session on each poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SessionEvent {
    FilesDiscovered(Vec<SwarmFile>),
    /// Byte ranges of the selected file that are now on disk and verified.
    PiecesAvailable(Vec<Range<u64>>),
    Progress(SessionProgress),
    FileCompleted,
}

#[async_trait]
pub(crate) trait SwarmSession: Send {
    async fn add(&mut self, request: &AddRequest) -> SwarmResult<()>;
    async fn select_file(&mut self, index: usize) -> SwarmResult<SwarmFile>;
    async fn pause(&mut self) -> SwarmResult<()>;
    async fn shutdown(&mut self) -> SwarmResult<()>;
    async fn poll_events(&mut self) -> SwarmResult<Vec<SessionEvent>>;
}

pub(crate) fn create_session(settings: &SwarmSettings) -> Box<dyn SwarmSession> {
    Box::new(loopback::LoopbackSession::new(settings))
}
