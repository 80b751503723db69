//! Throttled republishing of adapter progress onto the event bus.
//!
//! One task per live adapter. Adapter progress is coalesced to the latest
//! snapshot and published at most once per interval; a missed tick is simply
//! superseded by the next one. The task ends when the adapter is destroyed
//! and its event channel closes.

use std::time::Duration;

use reel_events::{Event, EventBus, SessionState};
use reel_torrent_core::{AdapterEvent, InfoHash, SessionProgress};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::debug;

pub(crate) fn spawn(
    hash: InfoHash,
    mut adapter_events: broadcast::Receiver<AdapterEvent>,
    state: watch::Receiver<SessionState>,
    events: EventBus,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut latest: Option<SessionProgress> = None;
        loop {
            tokio::select! {
                received = adapter_events.recv() => match received {
                    Ok(AdapterEvent::Progress(progress)) => latest = Some(progress),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(hash = %hash, skipped, "progress broadcaster lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = ticker.tick() => {
                    if let Some(progress) = latest.take() {
                        publish(&events, &hash, progress, &state);
                    }
                }
            }
        }
        debug!(hash = %hash, "progress broadcaster stopped");
    })
}

fn publish(
    events: &EventBus,
    hash: &InfoHash,
    progress: SessionProgress,
    state: &watch::Receiver<SessionState>,
) {
    events.publish(Event::Progress {
        hash: hash.to_string(),
        downloaded_bytes: progress.downloaded_bytes,
        total_bytes: progress.total_bytes,
        rate: progress.rate,
        peers: progress.peers,
        state: state.borrow().clone(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    fn progress(downloaded_bytes: u64) -> AdapterEvent {
        AdapterEvent::Progress(SessionProgress {
            downloaded_bytes,
            total_bytes: 1_000,
            rate: 10,
            peers: 2,
        })
    }

    #[tokio::test]
    async fn bursts_are_coalesced_to_the_latest_snapshot() {
        let hash = InfoHash::parse("c9e15763f722f23e98a29decdfae341b98d53056").expect("hash");
        let (sender, receiver) = broadcast::channel(256);
        let (_state_tx, state_rx) = watch::channel(SessionState::Downloading);
        let bus = EventBus::new();
        let mut stream = bus.subscribe();

        let task = spawn(
            hash,
            receiver,
            state_rx,
            bus.clone(),
            Duration::from_millis(200),
        );
        // Let the immediate first tick pass before the burst.
        tokio::time::sleep(Duration::from_millis(20)).await;
        for downloaded in 1..=100 {
            sender.send(progress(downloaded)).expect("send");
        }

        let envelope = timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("no progress published")
            .expect("bus closed");
        match envelope.event {
            Event::Progress {
                downloaded_bytes,
                state,
                ..
            } => {
                assert_eq!(downloaded_bytes, 100);
                assert_eq!(state, SessionState::Downloading);
            }
            other => panic!("unexpected event {other:?}"),
        }

        drop(sender);
        timeout(Duration::from_secs(2), task)
            .await
            .expect("broadcaster did not stop")
            .expect("broadcaster panicked");
        assert!(
            timeout(Duration::from_millis(300), stream.next())
                .await
                .is_err(),
            "no further snapshots after the adapter is gone"
        );
    }
}
