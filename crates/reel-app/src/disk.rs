//! Free-space probing and the periodic disk guard.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reel_events::{Event, EventBus};
use reel_torrent_core::TorrentError;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{info, warn};

use crate::registry::SessionRegistry;

/// Health flag raised while free space is below the floor.
pub const DISK_SPACE_FLAG: &str = "disk_space";

/// Reports free bytes on the volume holding a path.
pub trait DiskProbe: Send + Sync {
    /// Bytes available to unprivileged writers.
    ///
    /// # Errors
    ///
    /// Returns the underlying error when the volume cannot be queried.
    fn available_bytes(&self, path: &Path) -> io::Result<u64>;
}

/// [`DiskProbe`] backed by `statvfs`/`GetDiskFreeSpaceEx` via `fs2`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsDiskProbe;

impl DiskProbe for FsDiskProbe {
    fn available_bytes(&self, path: &Path) -> io::Result<u64> {
        // The session root may not exist yet; ask the nearest ancestor that does.
        let existing = path
            .ancestors()
            .find(|candidate| candidate.exists())
            .unwrap_or(path);
        fs2::available_space(existing)
    }
}

/// Re-check free space every `every`. Below the floor, downloading sessions
/// are paused and `disk_space` is reported degraded until space recovers.
pub fn spawn_disk_guard(
    registry: Arc<SessionRegistry>,
    events: EventBus,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut degraded = false;
        loop {
            ticker.tick().await;
            match registry.check_disk() {
                Ok(()) => {
                    if degraded {
                        info!("free disk space recovered");
                        events.publish(Event::HealthChanged {
                            degraded: Vec::new(),
                        });
                        degraded = false;
                    }
                }
                Err(TorrentError::InsufficientDiskSpace {
                    available_bytes,
                    required_bytes,
                }) => {
                    let paused = registry.pause_downloading().await;
                    if !degraded {
                        warn!(
                            available_bytes,
                            required_bytes, paused, "free disk space below floor"
                        );
                        events.publish(Event::HealthChanged {
                            degraded: vec![DISK_SPACE_FLAG.to_string()],
                        });
                        degraded = true;
                    }
                }
                Err(err) => warn!(error = %err, "disk space probe failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_walks_up_to_an_existing_directory() -> io::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let missing = temp.path().join("not").join("yet").join("created");
        let available = FsDiskProbe.available_bytes(&missing)?;
        assert!(available > 0);
        Ok(())
    }
}
