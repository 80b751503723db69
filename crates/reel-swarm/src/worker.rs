#![allow(clippy::redundant_pub_crate)]

use std::collections::BTreeSet;
use std::ops::ControlFlow;
use std::time::{Duration, Instant};

use reel_torrent_core::{AdapterEvent, CoverageHandle, InfoHash, SessionProgress, SwarmFile};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::command::SwarmCommand;
use crate::session::{SessionEvent, SwarmSession};

const PROGRESS_COALESCE_INTERVAL: Duration = Duration::from_millis(100);
/// Consecutive poll failures tolerated before the adapter reports itself failed.
const POLL_FAILURE_LIMIT: u32 = 25;

pub(crate) fn spawn(
    hash: InfoHash,
    session: Box<dyn SwarmSession>,
    mut commands: mpsc::Receiver<SwarmCommand>,
    events: broadcast::Sender<AdapterEvent>,
    coverage: CoverageHandle,
    poll_interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut worker = Worker::new(hash, session, events, coverage);
        let mut poll = tokio::time::interval(poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(command) => {
                            if worker.handle(command).await.is_break() {
                                break;
                            }
                        }
                        None => {
                            if let Err(err) = worker.session.shutdown().await {
                                warn!(hash = %worker.hash, error = %err, "swarm shutdown failed");
                            }
                            break;
                        }
                    }
                }
                _ = poll.tick(), if !worker.halted => worker.poll().await,
            }
        }
        debug!(hash = %worker.hash, "swarm worker stopped");
    })
}

struct Worker {
    hash: InfoHash,
    session: Box<dyn SwarmSession>,
    events: broadcast::Sender<AdapterEvent>,
    coverage: CoverageHandle,
    files: Option<Vec<SwarmFile>>,
    file_waiters: Vec<oneshot::Sender<Vec<SwarmFile>>>,
    health: BTreeSet<&'static str>,
    consecutive_failures: u32,
    halted: bool,
    latest_progress: Option<SessionProgress>,
    progress_last_emit: Option<Instant>,
}

impl Worker {
    fn new(
        hash: InfoHash,
        session: Box<dyn SwarmSession>,
        events: broadcast::Sender<AdapterEvent>,
        coverage: CoverageHandle,
    ) -> Self {
        Self {
            hash,
            session,
            events,
            coverage,
            files: None,
            file_waiters: Vec::new(),
            health: BTreeSet::new(),
            consecutive_failures: 0,
            halted: false,
            latest_progress: None,
            progress_last_emit: None,
        }
    }

    /// Service one command. `Break` means the worker must stop.
    async fn handle(&mut self, command: SwarmCommand) -> ControlFlow<()> {
        match command {
            SwarmCommand::Add(request) => {
                if let Err(err) = self.session.add(&request).await {
                    let detail = err.to_string();
                    self.mark_degraded("session", Some(&detail));
                }
            }
            SwarmCommand::Files { respond_to } => match &self.files {
                Some(files) => {
                    let _ = respond_to.send(files.clone());
                }
                None => self.file_waiters.push(respond_to),
            },
            SwarmCommand::SelectFile { index, respond_to } => {
                let result = self.session.select_file(index).await.map(|file| {
                    self.coverage.set_total(file.size_bytes);
                    info!(hash = %self.hash, path = %file.path, "swarm file selected");
                });
                let _ = respond_to.send(result);
            }
            SwarmCommand::Pause { respond_to } => {
                let result = self.session.pause().await;
                if result.is_ok() {
                    self.flush_progress();
                }
                let _ = respond_to.send(result);
            }
            SwarmCommand::Destroy { respond_to } => {
                let _ = respond_to.send(self.session.shutdown().await);
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn poll(&mut self) {
        match self.session.poll_events().await {
            Ok(events) => {
                self.consecutive_failures = 0;
                self.mark_recovered("session");
                for event in events {
                    self.apply(event);
                }
            }
            Err(err) => {
                self.consecutive_failures += 1;
                let detail = err.to_string();
                self.mark_degraded("session", Some(&detail));
                if self.consecutive_failures >= POLL_FAILURE_LIMIT {
                    warn!(
                        hash = %self.hash,
                        failures = self.consecutive_failures,
                        "swarm polling abandoned"
                    );
                    self.halted = true;
                    let _ = self.events.send(AdapterEvent::Failed {
                        message: detail,
                    });
                }
            }
        }
    }

    fn apply(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::FilesDiscovered(files) => {
                debug!(hash = %self.hash, count = files.len(), "swarm files discovered");
                for waiter in self.file_waiters.drain(..) {
                    let _ = waiter.send(files.clone());
                }
                let _ = self.events.send(AdapterEvent::FilesDiscovered(files.clone()));
                self.files = Some(files);
            }
            SessionEvent::PiecesAvailable(ranges) => {
                for range in ranges {
                    self.coverage.insert(range);
                }
            }
            SessionEvent::Progress(progress) => {
                self.latest_progress = Some(progress);
                let due = self
                    .progress_last_emit
                    .is_none_or(|last| last.elapsed() >= PROGRESS_COALESCE_INTERVAL);
                if due {
                    self.flush_progress();
                }
            }
            SessionEvent::FileCompleted => {
                self.flush_progress();
                info!(hash = %self.hash, "swarm file completed");
                let _ = self.events.send(AdapterEvent::FileCompleted);
            }
        }
    }

    fn flush_progress(&mut self) {
        if let Some(progress) = self.latest_progress.take() {
            self.progress_last_emit = Some(Instant::now());
            let _ = self.events.send(AdapterEvent::Progress(progress));
        }
    }

    fn mark_degraded(&mut self, component: &'static str, detail: Option<&str>) {
        let inserted = self.health.insert(component);
        let state = if inserted {
            "swarm component degraded"
        } else {
            "swarm component still degraded"
        };
        if let Some(detail) = detail {
            warn!(hash = %self.hash, component, detail = %detail, "{state}");
        } else {
            warn!(hash = %self.hash, component, "{state}");
        }
    }

    fn mark_recovered(&mut self, component: &'static str) {
        if self.health.remove(component) {
            info!(hash = %self.hash, component, "swarm component recovered");
        }
    }
}
