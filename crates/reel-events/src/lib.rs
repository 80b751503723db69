//! Event bus for the reel session engine.
//!
//! The bus provides a typed event enum and sequential identifiers on top of
//! `tokio::broadcast`. Delivery is best-effort: there is no replay ring, and a
//! subscriber that falls behind skips straight to the newest events. Progress
//! snapshots are superseded by the next tick, so nothing is ever queued for a
//! slow consumer.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::sync::broadcast::{Receiver, Sender};

/// Identifier assigned to each event emitted by the engine.
pub type EventId = u64;

/// Default broadcast capacity.
const DEFAULT_CAPACITY: usize = 256;

/// Typed domain events surfaced across the system.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A session row was created for a new content hash.
    SessionAdded {
        /// Lower-case hex content hash.
        hash: String,
        /// Display title supplied with the descriptor.
        title: String,
    },
    /// The swarm enumerated its file list.
    FilesDiscovered {
        hash: String,
        files: Vec<DiscoveredFile>,
    },
    /// Coalesced progress snapshot for the selected file.
    Progress {
        hash: String,
        downloaded_bytes: u64,
        total_bytes: u64,
        /// Instantaneous download rate in bytes per second.
        rate: u64,
        peers: u32,
        state: SessionState,
    },
    /// Session moved to a new lifecycle state.
    StateChanged { hash: String, state: SessionState },
    /// The selected file is fully present on disk.
    Completed {
        hash: String,
        /// Absolute path of the selected file.
        path: String,
    },
    /// Session was deleted and its storage removed.
    SessionRemoved { hash: String },
    /// Engine-wide health flags changed.
    HealthChanged { degraded: Vec<String> },
}

impl Event {
    /// Machine-friendly discriminator for SSE consumers.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Event::SessionAdded { .. } => "session_added",
            Event::FilesDiscovered { .. } => "files_discovered",
            Event::Progress { .. } => "progress",
            Event::StateChanged { .. } => "state_changed",
            Event::Completed { .. } => "completed",
            Event::SessionRemoved { .. } => "session_removed",
            Event::HealthChanged { .. } => "health_changed",
        }
    }

    /// Content hash the event refers to, if it is session-scoped.
    #[must_use]
    pub fn hash(&self) -> Option<&str> {
        match self {
            Event::SessionAdded { hash, .. }
            | Event::FilesDiscovered { hash, .. }
            | Event::Progress { hash, .. }
            | Event::StateChanged { hash, .. }
            | Event::Completed { hash, .. }
            | Event::SessionRemoved { hash } => Some(hash),
            Event::HealthChanged { .. } => None,
        }
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and
/// emission timestamp.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct EventEnvelope {
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    pub event: Event,
}

/// Individual file enumerated by the swarm.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Path relative to the session storage root.
    pub path: String,
    pub size_bytes: u64,
}

/// Lifecycle of a streaming session.
///
/// `Deleted` and `Failed` are terminal; `Paused` is reachable from every
/// non-terminal state.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionState {
    Pending,
    Downloading,
    Paused,
    Completed,
    Deleted,
    Failed { message: String },
}

impl SessionState {
    /// Stable label used in persisted rows and metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Deleted => "deleted",
            Self::Failed { .. } => "failed",
        }
    }

    /// Whether no further transition (other than a retrying `start`) applies.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Deleted | Self::Failed { .. })
    }

    /// Whether the session currently owns a live swarm adapter.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Downloading | Self::Completed)
    }
}

/// Shared event bus built on top of `tokio::broadcast`.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    /// Construct a new bus with the provided broadcast capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "event bus capacity must be positive");
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Construct a bus with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Publish a new event to the bus, assigning it a sequential identifier.
    ///
    /// Events published while nobody is subscribed are dropped.
    pub fn publish(&self, event: Event) -> EventId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };
        let _ = self.sender.send(envelope);
        id
    }

    /// Subscribe to events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> EventStream {
        EventStream {
            receiver: self.sender.subscribe(),
        }
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Live view over the broadcast channel.
pub struct EventStream {
    receiver: Receiver<EventEnvelope>,
}

impl EventStream {
    /// Receive the next event, skipping anything lost to lag.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
