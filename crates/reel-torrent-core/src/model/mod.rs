//! Core session domain types shared across the workspace.

mod magnet;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use reel_events::{DiscoveredFile, SessionState};
use serde::{Deserialize, Serialize};

use crate::coverage::CoverageHandle;
use crate::error::TorrentResult;

pub use magnet::{InfoHash, ParsedDescriptor};

/// Container extensions recognised as playable, with their MIME types.
const VIDEO_CONTAINERS: &[(&str, &str)] = &[
    ("mp4", "video/mp4"),
    ("m4v", "video/x-m4v"),
    ("mkv", "video/x-matroska"),
    ("webm", "video/webm"),
    ("avi", "video/x-msvideo"),
    ("mov", "video/quicktime"),
    ("wmv", "video/x-ms-wmv"),
    ("flv", "video/x-flv"),
    ("mpg", "video/mpeg"),
    ("mpeg", "video/mpeg"),
    ("ts", "video/mp2t"),
    ("m2ts", "video/mp2t"),
    ("ogv", "video/ogg"),
    ("3gp", "video/3gpp"),
];

/// MIME type for a path with a known video container extension.
#[must_use]
pub fn video_mime(path: &str) -> Option<&'static str> {
    let extension = Path::new(path).extension()?.to_str()?;
    VIDEO_CONTAINERS
        .iter()
        .find(|(ext, _)| ext.eq_ignore_ascii_case(extension))
        .map(|(_, mime)| *mime)
}

/// Opaque locator plus a human title, as supplied by the catalog layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentDescriptor {
    /// Magnet-style URI (or bare info hash).
    pub uri: String,
    /// Display title.
    #[serde(default)]
    pub title: String,
}

impl ContentDescriptor {
    #[must_use]
    pub fn new(uri: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            title: title.into(),
        }
    }

    /// Parse the locator into its content hash and auxiliary parameters.
    ///
    /// # Errors
    ///
    /// Returns [`crate::TorrentError::InvalidDescriptor`] for malformed locators.
    pub fn parse(&self) -> TorrentResult<ParsedDescriptor> {
        magnet::parse_descriptor(&self.uri)
    }

    /// Title to display, falling back to the magnet `dn` and then the hash.
    #[must_use]
    pub fn display_title(&self, parsed: &ParsedDescriptor) -> String {
        if !self.title.trim().is_empty() {
            return self.title.clone();
        }
        parsed
            .display_name
            .clone()
            .unwrap_or_else(|| parsed.hash.to_string())
    }
}

/// One entry of the swarm's file list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwarmFile {
    /// Position in the swarm's file list.
    pub index: usize,
    /// Path relative to the storage root, `/`-separated.
    pub path: String,
    pub size_bytes: u64,
}

impl From<&SwarmFile> for DiscoveredFile {
    fn from(file: &SwarmFile) -> Self {
        Self {
            path: file.path.clone(),
            size_bytes: file.size_bytes,
        }
    }
}

/// Pick the playable file: the largest entry with a video container extension.
///
/// Ties keep the earliest entry in swarm order.
#[must_use]
pub fn select_playable_file(files: &[SwarmFile]) -> Option<&SwarmFile> {
    files
        .iter()
        .filter(|file| video_mime(&file.path).is_some())
        .fold(None, |best: Option<&SwarmFile>, file| match best {
            Some(current) if current.size_bytes >= file.size_bytes => Some(current),
            _ => Some(file),
        })
}

/// The single file chosen for playback. Set once per session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedFile {
    pub index: usize,
    /// Path relative to the session storage root.
    pub path: String,
    pub size_bytes: u64,
}

impl SelectedFile {
    /// Absolute location below `storage_path`.
    #[must_use]
    pub fn absolute_path(&self, storage_path: &Path) -> PathBuf {
        self.path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .fold(storage_path.to_path_buf(), |path, segment| path.join(segment))
    }

    /// MIME type derived from the container extension.
    #[must_use]
    pub fn content_type(&self) -> &'static str {
        video_mime(&self.path).unwrap_or("application/octet-stream")
    }
}

impl From<&SwarmFile> for SelectedFile {
    fn from(file: &SwarmFile) -> Self {
        Self {
            index: file.index,
            path: file.path.clone(),
            size_bytes: file.size_bytes,
        }
    }
}

/// Volatile transfer statistics for the selected file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionProgress {
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    /// Instantaneous download rate in bytes per second.
    pub rate: u64,
    pub peers: u32,
}

impl SessionProgress {
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn percent_complete(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            (self.downloaded_bytes as f64 / self.total_bytes as f64) * 100.0
        }
    }
}

/// Read-only view of a session handed to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub hash: InfoHash,
    pub title: String,
    pub descriptor: ContentDescriptor,
    pub state: SessionState,
    pub selected_file: Option<SelectedFile>,
    pub storage_path: PathBuf,
    pub progress: SessionProgress,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionSnapshot {
    /// Absolute path of the selected file, once chosen.
    #[must_use]
    pub fn selected_path(&self) -> Option<PathBuf> {
        self.selected_file
            .as_ref()
            .map(|file| file.absolute_path(&self.storage_path))
    }
}

/// Everything a factory needs to build an adapter for one session.
#[derive(Debug, Clone)]
pub struct AdapterSpec {
    pub hash: InfoHash,
    pub descriptor: ContentDescriptor,
    pub storage_path: PathBuf,
    /// Byte-availability condition the adapter publishes into.
    pub coverage: CoverageHandle,
}

/// Events emitted by one adapter instance. Never shared across sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterEvent {
    /// Initial file list from the swarm.
    FilesDiscovered(Vec<SwarmFile>),
    /// Transfer statistics for the selected file.
    Progress(SessionProgress),
    /// Every byte of the selected file is present and verified.
    FileCompleted,
    /// Unrecoverable adapter failure.
    Failed { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(index: usize, path: &str, size_bytes: u64) -> SwarmFile {
        SwarmFile {
            index,
            path: path.into(),
            size_bytes,
        }
    }

    #[test]
    fn largest_video_file_wins() {
        let files = vec![
            file(0, "sample/sample.mkv", 10),
            file(1, "movie.nfo", 1_000),
            file(2, "movie/Movie.MP4", 900),
            file(3, "extras/trailer.mp4", 50),
        ];
        let chosen = select_playable_file(&files).expect("playable file");
        assert_eq!(chosen.index, 2);
    }

    #[test]
    fn ties_keep_swarm_order() {
        let files = vec![file(0, "a.mkv", 5), file(1, "b.mkv", 5)];
        assert_eq!(select_playable_file(&files).map(|f| f.index), Some(0));
    }

    #[test]
    fn no_video_means_no_selection() {
        let files = vec![file(0, "readme.txt", 5), file(1, "cover.jpg", 50)];
        assert!(select_playable_file(&files).is_none());
        assert!(select_playable_file(&[]).is_none());
    }

    #[test]
    fn selected_file_resolves_below_storage() {
        let selected = SelectedFile::from(&file(0, "season/ep1.webm", 1));
        let path = selected.absolute_path(Path::new("/data/abc"));
        assert_eq!(path, Path::new("/data/abc/season/ep1.webm"));
        assert_eq!(selected.content_type(), "video/webm");
    }

    #[test]
    fn title_falls_back_to_display_name_then_hash() {
        let hash = "c9e15763f722f23e98a29decdfae341b98d53056";
        let descriptor = ContentDescriptor::new(format!("magnet:?xt=urn:btih:{hash}&dn=Named"), "");
        let parsed = descriptor.parse().expect("valid");
        assert_eq!(descriptor.display_title(&parsed), "Named");

        let descriptor = ContentDescriptor::new(hash, " ");
        let parsed = descriptor.parse().expect("valid");
        assert_eq!(descriptor.display_title(&parsed), hash);
    }

    #[test]
    fn percent_complete_handles_unknown_total() {
        let progress = SessionProgress::default();
        assert!(progress.percent_complete().abs() < f64::EPSILON);
        let progress = SessionProgress {
            downloaded_bytes: 50,
            total_bytes: 200,
            ..SessionProgress::default()
        };
        assert!((progress.percent_complete() - 25.0).abs() < f64::EPSILON);
    }
}
