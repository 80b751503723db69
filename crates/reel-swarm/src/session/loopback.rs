//! Seed-directory backed swarm session.
//!
//! Content for hash `H` is served from `<seed_dir>/H/`. Until that directory
//! exists the swarm has no metadata. Pieces of the selected file are copied in
//! order under a byte budget refilled at `rate_bps`, and pieces already present
//! in the target are verified by digest and kept.

use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use reel_torrent_core::{InfoHash, SessionProgress, SwarmFile};
use sha2::{Digest, Sha256};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;
use walkdir::WalkDir;

use super::{SessionEvent, SwarmSession};
use crate::SwarmSettings;
use crate::command::AddRequest;
use crate::error::{SwarmError, SwarmResult};

pub(crate) struct LoopbackSession {
    seed_dir: PathBuf,
    rate_bps: u64,
    piece_bytes: u64,
    peers: u32,
    torrent: Option<LoopbackTorrent>,
}

struct LoopbackTorrent {
    hash: InfoHash,
    seed_root: PathBuf,
    storage_path: PathBuf,
    files: Option<Vec<SwarmFile>>,
    transfer: Option<Transfer>,
    paused: bool,
}

struct Transfer {
    file: SwarmFile,
    source: PathBuf,
    target: PathBuf,
    piece_bytes: u64,
    have: Vec<bool>,
    have_bytes: u64,
    verified: bool,
    completed: bool,
    budget: u64,
    last_tick: Instant,
}

impl LoopbackSession {
    pub(crate) fn new(settings: &SwarmSettings) -> Self {
        Self {
            seed_dir: settings.seed_dir.clone(),
            rate_bps: settings.rate_bps.max(1),
            piece_bytes: settings.piece_bytes.max(1),
            peers: settings.peers,
            torrent: None,
        }
    }

    fn torrent_mut(&mut self, operation: &'static str) -> SwarmResult<&mut LoopbackTorrent> {
        self.torrent
            .as_mut()
            .ok_or(SwarmError::NotAdded { operation })
    }
}

#[async_trait]
impl SwarmSession for LoopbackSession {
    async fn add(&mut self, request: &AddRequest) -> SwarmResult<()> {
        debug!(
            hash = %request.hash,
            trackers = request.trackers.len(),
            "loopback swarm admitted content"
        );
        self.torrent = Some(LoopbackTorrent {
            hash: request.hash.clone(),
            seed_root: self.seed_dir.join(request.hash.as_str()),
            storage_path: request.storage_path.clone(),
            files: None,
            transfer: None,
            paused: false,
        });
        Ok(())
    }

    async fn select_file(&mut self, index: usize) -> SwarmResult<SwarmFile> {
        let piece_bytes = self.piece_bytes;
        let torrent = self.torrent_mut("select_file")?;
        let hash = torrent.hash.to_string();
        let files = torrent
            .files
            .as_ref()
            .ok_or_else(|| SwarmError::MetadataPending { hash: hash.clone() })?;
        let file = files
            .iter()
            .find(|file| file.index == index)
            .cloned()
            .ok_or_else(|| SwarmError::UnknownFile {
                hash: hash.clone(),
                index,
            })?;

        if let Some(existing) = &torrent.transfer {
            if existing.file.index == index {
                return Ok(file);
            }
            return Err(SwarmError::SelectionLocked {
                hash,
                current: existing.file.index,
                requested: index,
            });
        }

        let target = relative_join(&torrent.storage_path, &file.path);
        prepare_target(&target, file.size_bytes).await?;
        torrent.transfer = Some(Transfer::new(
            file.clone(),
            relative_join(&torrent.seed_root, &file.path),
            target,
            piece_bytes,
        ));
        Ok(file)
    }

    async fn pause(&mut self) -> SwarmResult<()> {
        let torrent = self.torrent_mut("pause")?;
        torrent.paused = true;
        Ok(())
    }

    async fn shutdown(&mut self) -> SwarmResult<()> {
        self.torrent = None;
        Ok(())
    }

    async fn poll_events(&mut self) -> SwarmResult<Vec<SessionEvent>> {
        let rate_bps = self.rate_bps;
        let peers = self.peers;
        let Some(torrent) = self.torrent.as_mut() else {
            return Ok(Vec::new());
        };
        let mut events = Vec::new();

        if torrent.files.is_none()
            && let Some(files) = discover_files(&torrent.seed_root)?
        {
            events.push(SessionEvent::FilesDiscovered(files.clone()));
            torrent.files = Some(files);
        }

        if torrent.paused {
            return Ok(events);
        }
        let Some(transfer) = torrent.transfer.as_mut() else {
            return Ok(events);
        };

        if !transfer.verified {
            let present = transfer.verify_existing().await?;
            transfer.verified = true;
            if !present.is_empty() {
                events.push(SessionEvent::PiecesAvailable(present));
            }
        }

        let now = Instant::now();
        let elapsed_ms = u64::try_from(now.duration_since(transfer.last_tick).as_millis())
            .unwrap_or(u64::MAX)
            .max(1);
        transfer.last_tick = now;
        let refill = rate_bps.saturating_mul(elapsed_ms) / 1_000;
        let cap = rate_bps.max(transfer.piece_bytes);
        transfer.budget = transfer.budget.saturating_add(refill).min(cap);

        let (fetched, fetched_bytes) = transfer.fetch_missing().await?;
        if !fetched.is_empty() {
            events.push(SessionEvent::PiecesAvailable(fetched));
        }

        events.push(SessionEvent::Progress(SessionProgress {
            downloaded_bytes: transfer.have_bytes,
            total_bytes: transfer.file.size_bytes,
            rate: fetched_bytes.saturating_mul(1_000) / elapsed_ms,
            peers,
        }));

        if transfer.is_complete() && !transfer.completed {
            transfer.completed = true;
            events.push(SessionEvent::FileCompleted);
        }
        Ok(events)
    }
}

impl Transfer {
    fn new(file: SwarmFile, source: PathBuf, target: PathBuf, piece_bytes: u64) -> Self {
        let pieces = file.size_bytes.div_ceil(piece_bytes);
        Self {
            have: vec![false; usize::try_from(pieces).unwrap_or(usize::MAX)],
            file,
            source,
            target,
            piece_bytes,
            have_bytes: 0,
            verified: false,
            completed: false,
            budget: 0,
            last_tick: Instant::now(),
        }
    }

    fn piece_range(&self, piece: usize) -> Range<u64> {
        let start = piece as u64 * self.piece_bytes;
        let end = (start + self.piece_bytes).min(self.file.size_bytes);
        start..end
    }

    fn is_complete(&self) -> bool {
        self.have.iter().all(|present| *present)
    }

    fn mark(&mut self, piece: usize) {
        if let Some(slot) = self.have.get_mut(piece)
            && !*slot
        {
            *slot = true;
            let range = self.piece_range(piece);
            self.have_bytes += range.end - range.start;
        }
    }

    /// Keep pieces whose bytes already match the seed.
    async fn verify_existing(&mut self) -> SwarmResult<Vec<Range<u64>>> {
        let mut target = match File::open(&self.target).await {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(SwarmError::io("open_target", &self.target, err)),
        };
        let mut source = File::open(&self.source)
            .await
            .map_err(|err| SwarmError::io("open_seed", &self.source, err))?;

        let mut present = Vec::new();
        for piece in 0..self.have.len() {
            let range = self.piece_range(piece);
            let ours = read_at(&mut target, range.clone())
                .await
                .map_err(|err| SwarmError::io("read_target", &self.target, err))?;
            let theirs = read_at(&mut source, range.clone())
                .await
                .map_err(|err| SwarmError::io("read_seed", &self.source, err))?;
            if Sha256::digest(&ours) == Sha256::digest(&theirs) {
                self.mark(piece);
                push_range(&mut present, range);
            }
        }
        debug!(
            path = %self.target.display(),
            present_bytes = self.have_bytes,
            "verified existing pieces"
        );
        Ok(present)
    }

    /// Copy missing pieces in order while the budget allows.
    async fn fetch_missing(&mut self) -> SwarmResult<(Vec<Range<u64>>, u64)> {
        let mut fetched = Vec::new();
        let mut fetched_bytes = 0;
        let Some(first_missing) = self.have.iter().position(|present| !present) else {
            return Ok((fetched, fetched_bytes));
        };
        let first = self.piece_range(first_missing);
        if self.budget < first.end - first.start {
            return Ok((fetched, fetched_bytes));
        }

        let mut source = File::open(&self.source)
            .await
            .map_err(|err| SwarmError::io("open_seed", &self.source, err))?;
        let mut target = OpenOptions::new()
            .write(true)
            .open(&self.target)
            .await
            .map_err(|err| SwarmError::io("open_target", &self.target, err))?;

        for piece in first_missing..self.have.len() {
            if self.have[piece] {
                continue;
            }
            let range = self.piece_range(piece);
            let len = range.end - range.start;
            if self.budget < len {
                break;
            }
            let bytes = read_at(&mut source, range.clone())
                .await
                .map_err(|err| SwarmError::io("read_seed", &self.source, err))?;
            target
                .seek(SeekFrom::Start(range.start))
                .await
                .map_err(|err| SwarmError::io("write_target", &self.target, err))?;
            target
                .write_all(&bytes)
                .await
                .map_err(|err| SwarmError::io("write_target", &self.target, err))?;
            self.budget -= len;
            fetched_bytes += len;
            self.mark(piece);
            push_range(&mut fetched, range);
        }

        target
            .flush()
            .await
            .map_err(|err| SwarmError::io("flush_target", &self.target, err))?;
        Ok((fetched, fetched_bytes))
    }
}

/// Verify a stored copy of `file` against its seed without admitting the
/// content. A missing or differently sized seed or target verifies nothing.
pub(crate) async fn verify_stored(
    settings: &SwarmSettings,
    hash: &InfoHash,
    storage_path: &Path,
    file: SwarmFile,
) -> SwarmResult<Vec<Range<u64>>> {
    let source = relative_join(&settings.seed_dir.join(hash.as_str()), &file.path);
    let target = relative_join(storage_path, &file.path);
    for path in [&source, &target] {
        match fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() && metadata.len() == file.size_bytes => {}
            Ok(_) => return Ok(Vec::new()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(SwarmError::io("stat_stored", path, err)),
        }
    }
    let mut transfer = Transfer::new(file, source, target, settings.piece_bytes.max(1));
    transfer.verify_existing().await
}

/// Enumerate the seed tree, or `None` while it is not yet present.
fn discover_files(root: &Path) -> SwarmResult<Option<Vec<SwarmFile>>> {
    if !root.is_dir() {
        return Ok(None);
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|err| SwarmError::io("enumerate_seed", root, err.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let metadata = entry
            .metadata()
            .map_err(|err| SwarmError::io("enumerate_seed", entry.path(), err.into()))?;
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let path = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push(SwarmFile {
            index: files.len(),
            path,
            size_bytes: metadata.len(),
        });
    }
    Ok(Some(files))
}

async fn prepare_target(target: &Path, size_bytes: u64) -> SwarmResult<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|err| SwarmError::io("create_target_dir", parent, err))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(target)
        .await
        .map_err(|err| SwarmError::io("open_target", target, err))?;
    let current = file
        .metadata()
        .await
        .map_err(|err| SwarmError::io("stat_target", target, err))?
        .len();
    if current != size_bytes {
        file.set_len(size_bytes)
            .await
            .map_err(|err| SwarmError::io("size_target", target, err))?;
    }
    Ok(())
}

fn relative_join(root: &Path, relative: &str) -> PathBuf {
    relative
        .split('/')
        .filter(|segment| !segment.is_empty())
        .fold(root.to_path_buf(), |path, segment| path.join(segment))
}

async fn read_at(file: &mut File, range: Range<u64>) -> std::io::Result<Vec<u8>> {
    let len = usize::try_from(range.end - range.start)
        .map_err(|_| std::io::Error::other("piece exceeds addressable memory"))?;
    let mut buffer = vec![0; len];
    file.seek(SeekFrom::Start(range.start)).await?;
    file.read_exact(&mut buffer).await?;
    Ok(buffer)
}

fn push_range(ranges: &mut Vec<Range<u64>>, range: Range<u64>) {
    match ranges.last_mut() {
        Some(last) if last.end == range.start => last.end = range.end,
        _ => ranges.push(range),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    const HASH: &str = "0123456789abcdef0123456789abcdef01234567";

    fn settings(seed_dir: &Path, rate_bps: u64) -> SwarmSettings {
        SwarmSettings {
            seed_dir: seed_dir.to_path_buf(),
            rate_bps,
            piece_bytes: 16,
            poll_interval: Duration::from_millis(10),
            peers: 3,
        }
    }

    fn seed_bytes(len: usize) -> Vec<u8> {
        (0..len).map(|index| (index % 251) as u8).collect()
    }

    async fn admitted(seed: &TempDir, data: &TempDir, rate_bps: u64) -> LoopbackSession {
        let mut session = LoopbackSession::new(&settings(seed.path(), rate_bps));
        session
            .add(&AddRequest {
                hash: InfoHash::parse(HASH).expect("hash"),
                storage_path: data.path().join(HASH),
                trackers: Vec::new(),
            })
            .await
            .expect("add");
        session
    }

    async fn write_seed(seed: &TempDir, files: &[(&str, &[u8])]) {
        for (path, bytes) in files {
            let target = relative_join(&seed.path().join(HASH), path);
            fs::create_dir_all(target.parent().expect("parent"))
                .await
                .expect("seed dir");
            fs::write(&target, bytes).await.expect("seed file");
        }
    }

    async fn drain_until_complete(session: &mut LoopbackSession) -> Vec<SessionEvent> {
        let mut seen = Vec::new();
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let events = session.poll_events().await.expect("poll");
            let done = events.contains(&SessionEvent::FileCompleted);
            seen.extend(events);
            if done {
                return seen;
            }
        }
        panic!("transfer never completed");
    }

    #[tokio::test]
    async fn files_appear_once_seed_exists() {
        let seed = TempDir::new().expect("seed");
        let data = TempDir::new().expect("data");
        let mut session = admitted(&seed, &data, 1_000_000).await;

        assert!(session.poll_events().await.expect("poll").is_empty());

        let movie = seed_bytes(40);
        write_seed(&seed, &[("b/movie.mkv", movie.as_slice()), ("a.nfo", &b"info"[..])]).await;
        let events = session.poll_events().await.expect("poll");
        assert_eq!(
            events,
            vec![SessionEvent::FilesDiscovered(vec![
                SwarmFile {
                    index: 0,
                    path: "a.nfo".into(),
                    size_bytes: 4,
                },
                SwarmFile {
                    index: 1,
                    path: "b/movie.mkv".into(),
                    size_bytes: 40,
                },
            ])]
        );
        assert!(session.poll_events().await.expect("poll").is_empty());
    }

    #[tokio::test]
    async fn selection_requires_metadata_and_stays_fixed() {
        let seed = TempDir::new().expect("seed");
        let data = TempDir::new().expect("data");
        let mut session = admitted(&seed, &data, 1_000_000).await;

        assert!(matches!(
            session.select_file(0).await,
            Err(SwarmError::MetadataPending { .. })
        ));

        let bytes = seed_bytes(8);
        write_seed(&seed, &[("a.mkv", bytes.as_slice()), ("b.mkv", bytes.as_slice())]).await;
        session.poll_events().await.expect("poll");
        assert!(matches!(
            session.select_file(7).await,
            Err(SwarmError::UnknownFile { index: 7, .. })
        ));
        session.select_file(1).await.expect("select");
        session.select_file(1).await.expect("reselect same file");
        assert!(matches!(
            session.select_file(0).await,
            Err(SwarmError::SelectionLocked {
                current: 1,
                requested: 0,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn transfer_copies_seed_bytes_and_completes_once() {
        let seed = TempDir::new().expect("seed");
        let data = TempDir::new().expect("data");
        let bytes = seed_bytes(100);
        write_seed(&seed, &[("movie.mp4", bytes.as_slice())]).await;
        let mut session = admitted(&seed, &data, 1_000_000).await;
        session.poll_events().await.expect("discover");
        session.select_file(0).await.expect("select");

        let events = drain_until_complete(&mut session).await;
        let completions = events
            .iter()
            .filter(|event| **event == SessionEvent::FileCompleted)
            .count();
        assert_eq!(completions, 1);
        assert!(events.iter().any(|event| matches!(
            event,
            SessionEvent::Progress(SessionProgress {
                downloaded_bytes: 100,
                total_bytes: 100,
                peers: 3,
                ..
            })
        )));

        let written = fs::read(data.path().join(HASH).join("movie.mp4"))
            .await
            .expect("target");
        assert_eq!(written, bytes);

        let later = session.poll_events().await.expect("poll");
        assert!(!later.contains(&SessionEvent::FileCompleted));
    }

    #[tokio::test]
    async fn existing_pieces_are_verified_not_refetched() {
        let seed = TempDir::new().expect("seed");
        let data = TempDir::new().expect("data");
        let bytes = seed_bytes(64);
        write_seed(&seed, &[("movie.mkv", bytes.as_slice())]).await;

        let target = data.path().join(HASH).join("movie.mkv");
        fs::create_dir_all(target.parent().expect("parent"))
            .await
            .expect("target dir");
        let mut partial = bytes[..32].to_vec();
        partial.resize(64, 0xFF);
        fs::write(&target, &partial).await.expect("partial");

        // Rate of one byte per second: nothing is fetched within the test.
        let mut session = admitted(&seed, &data, 1).await;
        session.poll_events().await.expect("discover");
        session.select_file(0).await.expect("select");
        let events = session.poll_events().await.expect("poll");

        assert!(events.contains(&SessionEvent::PiecesAvailable(vec![0..32])));
        assert!(events.iter().any(|event| matches!(
            event,
            SessionEvent::Progress(SessionProgress {
                downloaded_bytes: 32,
                total_bytes: 64,
                ..
            })
        )));
    }

    #[tokio::test]
    async fn stored_file_verifies_without_admission() {
        let seed = TempDir::new().expect("seed");
        let data = TempDir::new().expect("data");
        let bytes = seed_bytes(64);
        write_seed(&seed, &[("movie.mkv", bytes.as_slice())]).await;
        let hash = InfoHash::parse(HASH).expect("hash");
        let file = SwarmFile {
            index: 0,
            path: "movie.mkv".into(),
            size_bytes: 64,
        };
        let storage = data.path().join(HASH);
        let config = settings(seed.path(), 1);

        let nothing = verify_stored(&config, &hash, &storage, file.clone())
            .await
            .expect("missing target");
        assert!(nothing.is_empty());

        fs::create_dir_all(&storage).await.expect("target dir");
        let mut partial = bytes[..48].to_vec();
        partial.resize(64, 0);
        fs::write(storage.join("movie.mkv"), &partial)
            .await
            .expect("partial");
        let present = verify_stored(&config, &hash, &storage, file)
            .await
            .expect("verify");
        assert_eq!(present, vec![0..48]);
    }

    #[tokio::test]
    async fn paused_session_stops_transferring() {
        let seed = TempDir::new().expect("seed");
        let data = TempDir::new().expect("data");
        let bytes = seed_bytes(64);
        write_seed(&seed, &[("movie.mkv", bytes.as_slice())]).await;
        let mut session = admitted(&seed, &data, 1_000_000).await;
        session.poll_events().await.expect("discover");
        session.select_file(0).await.expect("select");
        session.pause().await.expect("pause");

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(session.poll_events().await.expect("poll").is_empty());
    }

    #[tokio::test]
    async fn commands_before_add_are_rejected() {
        let seed = TempDir::new().expect("seed");
        let mut session = LoopbackSession::new(&settings(seed.path(), 10));
        assert!(matches!(
            session.pause().await,
            Err(SwarmError::NotAdded { operation: "pause" })
        ));
        assert!(session.poll_events().await.expect("poll").is_empty());
    }
}
