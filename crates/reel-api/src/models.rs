//! Request and response bodies for the HTTP surface.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use reel_events::SessionState;
use reel_telemetry::MetricsSnapshot;
use reel_torrent_core::{SelectedFile, SessionProgress, SessionSnapshot};
use serde::{Deserialize, Serialize};

/// RFC9457-compatible problem response body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Body of `POST /stream/start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRequest {
    pub descriptor: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// Body of `POST /stream/get-torrent-data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptorRequest {
    pub descriptor: String,
}

/// The session as the UI sees it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionView {
    pub hash: String,
    pub title: String,
    pub descriptor: String,
    pub state: SessionState,
    pub selected_file: Option<SelectedFileView>,
    pub storage_path: PathBuf,
    pub progress: ProgressView,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectedFileView {
    pub index: usize,
    pub path: String,
    pub size_bytes: u64,
    pub content_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressView {
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    /// Bytes per second.
    pub rate: u64,
    pub peers: u32,
    pub percent_complete: f64,
}

/// Acknowledgement for `DELETE /stream/delete/{hash}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeleteResponse {
    pub hash: String,
    pub state: SessionState,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub build: String,
    pub degraded: Vec<String>,
    pub metrics: MetricsSnapshot,
}

impl From<&SelectedFile> for SelectedFileView {
    fn from(file: &SelectedFile) -> Self {
        Self {
            index: file.index,
            path: file.path.clone(),
            size_bytes: file.size_bytes,
            content_type: file.content_type().to_string(),
        }
    }
}

impl From<SessionProgress> for ProgressView {
    fn from(progress: SessionProgress) -> Self {
        Self {
            downloaded_bytes: progress.downloaded_bytes,
            total_bytes: progress.total_bytes,
            rate: progress.rate,
            peers: progress.peers,
            percent_complete: progress.percent_complete(),
        }
    }
}

impl From<SessionSnapshot> for SessionView {
    fn from(snapshot: SessionSnapshot) -> Self {
        Self {
            hash: snapshot.hash.to_string(),
            title: snapshot.title,
            descriptor: snapshot.descriptor.uri,
            state: snapshot.state,
            selected_file: snapshot.selected_file.as_ref().map(SelectedFileView::from),
            storage_path: snapshot.storage_path,
            progress: ProgressView::from(snapshot.progress),
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
        }
    }
}
