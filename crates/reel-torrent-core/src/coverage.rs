//! Per-session "bytes available up to offset" condition.
//!
//! The adapter worker inserts verified byte ranges of the selected file into a
//! [`CoverageHandle`]; HTTP readers hold a [`CoverageReader`] and suspend on the
//! underlying `watch` channel until the offset they need is covered. Teardown
//! flips the status so that every waiting reader wakes and fails instead of
//! hanging on a swarm that no longer exists.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::timeout;

use crate::error::{TorrentError, TorrentResult};
use crate::model::InfoHash;

/// Whether readers may keep waiting for missing bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverageStatus {
    /// An adapter is live; missing bytes may still arrive.
    Live,
    /// No adapter; covered bytes can be read, missing bytes fail fast.
    Paused,
    /// Session is being deleted; all reads stop.
    Closed,
}

/// Downloaded ranges of the selected file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coverage {
    ranges: Vec<Range<u64>>,
    total_bytes: u64,
    status: CoverageStatus,
}

impl Coverage {
    fn new() -> Self {
        Self {
            ranges: Vec::new(),
            total_bytes: 0,
            status: CoverageStatus::Paused,
        }
    }

    #[must_use]
    pub const fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    #[must_use]
    pub const fn status(&self) -> CoverageStatus {
        self.status
    }

    /// Sum of covered bytes.
    #[must_use]
    pub fn downloaded_bytes(&self) -> u64 {
        self.ranges.iter().map(|range| range.end - range.start).sum()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.total_bytes > 0 && self.downloaded_bytes() >= self.total_bytes
    }

    /// End (exclusive) of the covered run containing `offset`, or `offset`
    /// itself when that byte is missing.
    #[must_use]
    pub fn available_from(&self, offset: u64) -> u64 {
        self.ranges
            .iter()
            .find(|range| range.start <= offset && offset < range.end)
            .map_or(offset, |range| range.end)
    }

    fn insert(&mut self, range: Range<u64>) {
        let end = if self.total_bytes > 0 {
            range.end.min(self.total_bytes)
        } else {
            range.end
        };
        if range.start >= end {
            return;
        }
        self.ranges.push(range.start..end);
        self.ranges.sort_by_key(|range| range.start);

        let mut merged: Vec<Range<u64>> = Vec::with_capacity(self.ranges.len());
        for range in self.ranges.drain(..) {
            match merged.last_mut() {
                Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
                _ => merged.push(range),
            }
        }
        self.ranges = merged;
    }
}

/// Writer side, owned by the registry and shared with the live adapter.
#[derive(Clone)]
pub struct CoverageHandle {
    hash: InfoHash,
    state: Arc<watch::Sender<Coverage>>,
    readers: Arc<watch::Sender<usize>>,
}

impl fmt::Debug for CoverageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoverageHandle")
            .field("hash", &self.hash)
            .field("coverage", &*self.state.borrow())
            .field("readers", &*self.readers.borrow())
            .finish()
    }
}

impl CoverageHandle {
    /// Empty coverage in [`CoverageStatus::Paused`].
    #[must_use]
    pub fn new(hash: InfoHash) -> Self {
        let (state, _) = watch::channel(Coverage::new());
        let (readers, _) = watch::channel(0_usize);
        Self {
            hash,
            state: Arc::new(state),
            readers: Arc::new(readers),
        }
    }

    #[must_use]
    pub fn hash(&self) -> &InfoHash {
        &self.hash
    }

    /// Declare the selected file's length. Existing ranges are kept.
    pub fn set_total(&self, total_bytes: u64) {
        self.state.send_modify(|coverage| coverage.total_bytes = total_bytes);
    }

    /// Record a verified byte range and wake readers.
    pub fn insert(&self, range: Range<u64>) {
        self.state.send_modify(|coverage| coverage.insert(range));
    }

    /// Forget every range and the declared length, keeping the status.
    pub fn reset(&self) {
        self.state.send_modify(|coverage| {
            coverage.ranges.clear();
            coverage.total_bytes = 0;
        });
    }

    pub fn set_status(&self, status: CoverageStatus) {
        self.state.send_modify(|coverage| coverage.status = status);
    }

    /// Current coverage.
    #[must_use]
    pub fn snapshot(&self) -> Coverage {
        self.state.borrow().clone()
    }

    /// Register a new reader.
    #[must_use]
    pub fn reader(&self) -> CoverageReader {
        self.readers.send_modify(|count| *count += 1);
        CoverageReader {
            hash: self.hash.clone(),
            receiver: self.state.subscribe(),
            readers: Arc::clone(&self.readers),
        }
    }

    #[must_use]
    pub fn active_readers(&self) -> usize {
        *self.readers.borrow()
    }

    /// Wait until every reader has been dropped. Returns `false` on timeout.
    pub async fn drain_readers(&self, wait: Duration) -> bool {
        let mut receiver = self.readers.subscribe();
        matches!(
            timeout(wait, receiver.wait_for(|count| *count == 0)).await,
            Ok(Ok(_))
        )
    }
}

/// Reader side held by one HTTP range response.
pub struct CoverageReader {
    hash: InfoHash,
    receiver: watch::Receiver<Coverage>,
    readers: Arc<watch::Sender<usize>>,
}

impl CoverageReader {
    /// Whether the session is being deleted.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.receiver.borrow().status == CoverageStatus::Closed
    }

    /// Suspend until the byte at `offset` is covered and return the end
    /// (exclusive) of the covered run. `recheck` bounds each individual wait.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::StreamClosed`] when the session is deleted,
    /// or paused while `offset` is still missing.
    pub async fn wait_available(&mut self, offset: u64, recheck: Duration) -> TorrentResult<u64> {
        loop {
            let (status, end) = {
                let coverage = self.receiver.borrow_and_update();
                (coverage.status, coverage.available_from(offset))
            };
            match status {
                CoverageStatus::Closed => return Err(self.closed("deleted")),
                _ if end > offset => return Ok(end),
                CoverageStatus::Paused => return Err(self.closed("paused")),
                CoverageStatus::Live => {}
            }
            if let Ok(Err(_)) = timeout(recheck, self.receiver.changed()).await {
                return Err(self.closed("dropped"));
            }
        }
    }

    fn closed(&self, reason: &'static str) -> TorrentError {
        TorrentError::StreamClosed {
            hash: self.hash.to_string(),
            reason,
        }
    }
}

impl Drop for CoverageReader {
    fn drop(&mut self) {
        self.readers
            .send_modify(|count| *count = count.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> CoverageHandle {
        let hash = InfoHash::parse("c9e15763f722f23e98a29decdfae341b98d53056").expect("hash");
        CoverageHandle::new(hash)
    }

    #[test]
    fn ranges_merge_and_clamp() {
        let coverage = handle();
        coverage.set_total(100);
        coverage.insert(10..20);
        coverage.insert(0..10);
        coverage.insert(50..500);
        coverage.insert(15..30);

        let snapshot = coverage.snapshot();
        assert_eq!(snapshot.available_from(0), 30);
        assert_eq!(snapshot.available_from(30), 30);
        assert_eq!(snapshot.available_from(60), 100);
        assert_eq!(snapshot.downloaded_bytes(), 80);
        assert!(!snapshot.is_complete());

        coverage.insert(30..50);
        assert!(coverage.snapshot().is_complete());
    }

    #[tokio::test]
    async fn reader_wakes_when_range_arrives() {
        let coverage = handle();
        coverage.set_total(1_000);
        coverage.set_status(CoverageStatus::Live);
        let mut reader = coverage.reader();

        let writer = coverage.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.insert(0..256);
        });

        let end = timeout(
            Duration::from_secs(2),
            reader.wait_available(0, Duration::from_millis(50)),
        )
        .await
        .expect("reader never woke")
        .expect("coverage closed");
        assert_eq!(end, 256);
    }

    #[tokio::test]
    async fn teardown_releases_waiting_readers() {
        let coverage = handle();
        coverage.set_status(CoverageStatus::Live);
        let mut reader = coverage.reader();

        let writer = coverage.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.set_status(CoverageStatus::Closed);
        });

        let result = timeout(
            Duration::from_secs(2),
            reader.wait_available(0, Duration::from_secs(60)),
        )
        .await
        .expect("reader was not released");
        assert!(matches!(
            result,
            Err(TorrentError::StreamClosed {
                reason: "deleted",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn paused_coverage_serves_present_bytes_only() {
        let coverage = handle();
        coverage.set_total(100);
        coverage.insert(0..40);
        let mut reader = coverage.reader();

        assert_eq!(
            reader
                .wait_available(10, Duration::from_millis(10))
                .await
                .expect("covered"),
            40
        );
        assert!(matches!(
            reader.wait_available(40, Duration::from_millis(10)).await,
            Err(TorrentError::StreamClosed {
                reason: "paused",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn drain_waits_for_readers_to_drop() {
        let coverage = handle();
        let reader = coverage.reader();
        assert_eq!(coverage.active_readers(), 1);
        assert!(!coverage.drain_readers(Duration::from_millis(20)).await);

        drop(reader);
        assert!(coverage.drain_readers(Duration::from_millis(20)).await);
    }
}
