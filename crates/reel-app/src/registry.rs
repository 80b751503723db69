//! Session registry: in-memory authority over live sessions.
//!
//! # Design
//!
//! - One entry per content hash; the map lock is only held for lookups, never
//!   across an await, so operations on different hashes do not contend.
//! - Each entry owns a transition lock (`slot`) guarding its adapter, its
//!   background tasks, and a generation counter. Every lifecycle operation runs
//!   under that lock, so concurrent `start`s create at most one adapter and a
//!   `delete` waits for an in-flight `pause`/`resume` before proceeding.
//! - Every state change is written to the store before the view is updated or
//!   an event is published.
//! - Adapters are destroyed on pause/delete/shutdown and rebuilt from the stored
//!   descriptor on resume; they are never reused across a pause boundary.
//! - A restored session starts with empty coverage. The first stream request
//!   checks the stored file against the swarm's pieces so paused content is
//!   servable without an adapter.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reel_events::{DiscoveredFile, Event, EventBus, SessionState};
use reel_store::{SessionStore, StoredSession};
use reel_telemetry::Metrics;
use reel_torrent_core::{
    AdapterEvent, AdapterSpec, ContentDescriptor, CoverageHandle, CoverageStatus, InfoHash,
    SelectedFile, SessionControl, SessionInspector, SessionProgress, SessionSnapshot,
    StreamSource, SwarmAdapter, SwarmAdapterFactory, SwarmFile, TorrentError, TorrentResult,
    select_playable_file,
};
use tokio::sync::{Mutex as AsyncMutex, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broadcaster;
use crate::disk::DiskProbe;

/// Tunables for the registry.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    /// Root under which each session gets `<data_dir>/<hash>`.
    pub data_dir: PathBuf,
    /// Free-space floor checked before a session acquires an adapter.
    pub min_free_bytes: u64,
    /// Bounded wait for the swarm's file list.
    pub metadata_timeout: Duration,
    /// Upper bound on progress broadcasts per session.
    pub progress_interval: Duration,
    /// How long `delete` waits for in-flight readers before removing storage.
    pub reader_drain: Duration,
}

/// Collaborators the registry orchestrates.
pub struct RegistryDeps {
    /// Durable session rows.
    pub store: Arc<dyn SessionStore>,
    /// Builds one adapter per start/resume.
    pub factory: Arc<dyn SwarmAdapterFactory>,
    /// Free-space source for admission checks.
    pub disk: Arc<dyn DiskProbe>,
    /// Outbound lifecycle and progress events.
    pub events: EventBus,
    /// Adapter and session gauges.
    pub telemetry: Metrics,
}

/// Hash-keyed table of sessions implementing the lifecycle operations.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<InfoHash, Arc<SessionEntry>>>,
    shared: Shared,
    factory: Arc<dyn SwarmAdapterFactory>,
    disk: Arc<dyn DiskProbe>,
    telemetry: Metrics,
    settings: RegistrySettings,
}

struct SessionEntry {
    hash: InfoHash,
    slot: AsyncMutex<SessionSlot>,
    view: RwLock<SessionSnapshot>,
    coverage: CoverageHandle,
    state: watch::Sender<SessionState>,
}

#[derive(Default)]
struct SessionSlot {
    adapter: Option<Arc<dyn SwarmAdapter>>,
    tasks: Vec<JoinHandle<()>>,
    generation: u64,
    deleted: bool,
    /// Coverage reflects the bytes on disk, either fed by a live adapter or
    /// rebuilt by a storage check.
    verified: bool,
}

/// Pieces the background monitor needs.
#[derive(Clone)]
struct Shared {
    store: Arc<dyn SessionStore>,
    events: EventBus,
}

impl SessionEntry {
    fn new(snapshot: SessionSnapshot) -> Self {
        let coverage = CoverageHandle::new(snapshot.hash.clone());
        if let Some(file) = &snapshot.selected_file {
            coverage.set_total(file.size_bytes);
        }
        let (state, _) = watch::channel(snapshot.state.clone());
        Self {
            hash: snapshot.hash.clone(),
            slot: AsyncMutex::new(SessionSlot::default()),
            view: RwLock::new(snapshot),
            coverage,
            state,
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        self.view
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn state(&self) -> SessionState {
        self.view
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .state
            .clone()
    }

    fn update(&self, apply: impl FnOnce(&mut SessionSnapshot)) {
        let mut view = self.view.write().unwrap_or_else(PoisonError::into_inner);
        apply(&mut view);
        view.updated_at = Utc::now();
    }

    fn set_state(&self, state: SessionState) {
        self.update(|view| view.state = state.clone());
        self.state.send_replace(state);
    }

    fn stored(&self, state: &SessionState) -> StoredSession {
        let view = self.view.read().unwrap_or_else(PoisonError::into_inner);
        StoredSession {
            hash: view.hash.clone(),
            descriptor: view.descriptor.clone(),
            selected_file: view.selected_file.clone(),
            storage_path: view.storage_path.clone(),
            state: state.clone(),
            created_at: view.created_at,
        }
    }
}

impl Shared {
    /// Write `state` durably, then expose it.
    async fn persist(&self, entry: &SessionEntry, state: SessionState) -> TorrentResult<()> {
        self.store
            .upsert(&entry.stored(&state))
            .await
            .map_err(|err| TorrentError::operation("store.upsert", Some(entry.hash.as_str()), err))?;
        entry.set_state(state);
        Ok(())
    }

    async fn transition(&self, entry: &SessionEntry, state: SessionState) -> TorrentResult<()> {
        self.persist(entry, state.clone()).await?;
        info!(hash = %entry.hash, state = state.label(), "session state changed");
        self.events.publish(Event::StateChanged {
            hash: entry.hash.to_string(),
            state,
        });
        Ok(())
    }

    async fn complete(&self, entry: &SessionEntry, generation: u64) {
        let slot = entry.slot.lock().await;
        if slot.deleted || slot.generation != generation {
            return;
        }
        if entry.state() != SessionState::Downloading {
            return;
        }
        entry.update(|view| view.progress.downloaded_bytes = view.progress.total_bytes);
        if let Err(err) = self.transition(entry, SessionState::Completed).await {
            warn!(hash = %entry.hash, error = %err, "failed to persist completion");
            return;
        }
        let path = entry
            .snapshot()
            .selected_path()
            .map(|path| path.display().to_string())
            .unwrap_or_default();
        self.events.publish(Event::Completed {
            hash: entry.hash.to_string(),
            path,
        });
        drop(slot);
    }

    async fn fail(&self, entry: &SessionEntry, generation: u64, message: String) {
        let mut slot = entry.slot.lock().await;
        if slot.deleted || slot.generation != generation {
            return;
        }
        warn!(hash = %entry.hash, %message, "swarm adapter failed");
        entry.coverage.set_status(CoverageStatus::Paused);
        // Detach rather than abort: this task is one of them.
        slot.tasks.clear();
        slot.generation += 1;
        if let Err(err) = self
            .transition(entry, SessionState::Failed { message })
            .await
        {
            warn!(hash = %entry.hash, error = %err, "failed to persist adapter failure");
        }
        if let Some(adapter) = slot.adapter.take()
            && let Err(err) = adapter.destroy().await
        {
            warn!(hash = %entry.hash, error = %err, "failed to destroy failed adapter");
        }
    }
}

fn spawn_monitor(
    shared: Shared,
    entry: Arc<SessionEntry>,
    generation: u64,
    mut adapter_events: broadcast::Receiver<AdapterEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match adapter_events.recv().await {
                Ok(AdapterEvent::Progress(progress)) => {
                    entry.update(|view| view.progress = progress);
                }
                Ok(AdapterEvent::FileCompleted) => shared.complete(&entry, generation).await,
                Ok(AdapterEvent::Failed { message }) => {
                    shared.fail(&entry, generation, message).await;
                }
                Ok(AdapterEvent::FilesDiscovered(_)) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(hash = %entry.hash, skipped, "session monitor lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn not_found(hash: &InfoHash) -> TorrentError {
    TorrentError::SessionNotFound {
        hash: hash.to_string(),
    }
}

fn invalid_state(hash: &InfoHash, operation: &'static str, state: &SessionState) -> TorrentError {
    TorrentError::InvalidState {
        hash: hash.to_string(),
        operation,
        state: state.label(),
    }
}

/// Pick the file to transfer: the stored selection when there is one,
/// otherwise the largest playable file.
fn choose_file(snapshot: &SessionSnapshot, files: &[SwarmFile]) -> TorrentResult<SwarmFile> {
    match &snapshot.selected_file {
        Some(selected) => files
            .iter()
            .find(|file| file.index == selected.index && file.path == selected.path)
            .cloned()
            .ok_or_else(|| {
                TorrentError::operation(
                    "select_file",
                    Some(snapshot.hash.as_str()),
                    "selected file is no longer listed by the swarm",
                )
            }),
        None => select_playable_file(files)
            .cloned()
            .ok_or_else(|| TorrentError::NoPlayableFile {
                hash: snapshot.hash.to_string(),
            }),
    }
}

impl SessionRegistry {
    /// Empty registry; call [`SessionControl::restore`] to load persisted rows.
    #[must_use]
    pub fn new(deps: RegistryDeps, settings: RegistrySettings) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            shared: Shared {
                store: deps.store,
                events: deps.events,
            },
            factory: deps.factory,
            disk: deps.disk,
            telemetry: deps.telemetry,
            settings,
        }
    }

    /// Fail with [`TorrentError::InsufficientDiskSpace`] when free space on the
    /// data volume is below the floor.
    ///
    /// # Errors
    ///
    /// Returns an error when space is short or the volume cannot be queried.
    pub fn check_disk(&self) -> TorrentResult<()> {
        let data_dir = &self.settings.data_dir;
        let available_bytes = self
            .disk
            .available_bytes(data_dir)
            .map_err(|err| TorrentError::io("disk.available_space", data_dir, err))?;
        if available_bytes < self.settings.min_free_bytes {
            return Err(TorrentError::InsufficientDiskSpace {
                available_bytes,
                required_bytes: self.settings.min_free_bytes,
            });
        }
        Ok(())
    }

    /// Pause every downloading session. Returns how many were paused.
    pub async fn pause_downloading(&self) -> usize {
        let mut paused = 0;
        for entry in self.entries() {
            if entry.state() != SessionState::Downloading {
                continue;
            }
            match SessionControl::pause(self, &entry.hash).await {
                Ok(_) => paused += 1,
                Err(err) => warn!(hash = %entry.hash, error = %err, "failed to pause session"),
            }
        }
        paused
    }

    /// Resume every paused session. Returns how many reached `Downloading`.
    pub async fn resume_paused(&self) -> usize {
        let mut resumed = 0;
        for entry in self.entries() {
            if entry.state() != SessionState::Paused {
                continue;
            }
            match SessionControl::resume(self, &entry.hash).await {
                Ok(_) => resumed += 1,
                Err(err) => warn!(hash = %entry.hash, error = %err, "auto-resume failed"),
            }
        }
        resumed
    }

    /// Destroy every live adapter without touching persisted state, so the
    /// next process restores those sessions as paused.
    pub async fn shutdown(&self) {
        let mut released = 0_usize;
        for entry in self.entries() {
            let mut slot = entry.slot.lock().await;
            if slot.adapter.is_some() {
                self.teardown(&entry, &mut slot, CoverageStatus::Paused)
                    .await;
                released += 1;
            }
        }
        self.telemetry.set_active_sessions(0);
        info!(released, "session registry shut down");
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<InfoHash, Arc<SessionEntry>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn entries(&self) -> Vec<Arc<SessionEntry>> {
        self.lock_sessions().values().cloned().collect()
    }

    fn find(&self, hash: &InfoHash) -> Option<Arc<SessionEntry>> {
        self.lock_sessions().get(hash).cloned()
    }

    fn lookup(&self, hash: &InfoHash) -> TorrentResult<Arc<SessionEntry>> {
        self.find(hash).ok_or_else(|| not_found(hash))
    }

    /// Drop `entry` from the table unless it has already been replaced.
    fn forget(&self, entry: &Arc<SessionEntry>) {
        let mut sessions = self.lock_sessions();
        if sessions
            .get(&entry.hash)
            .is_some_and(|current| Arc::ptr_eq(current, entry))
        {
            sessions.remove(&entry.hash);
        }
    }

    fn entry_for_start(
        &self,
        hash: &InfoHash,
        descriptor: &ContentDescriptor,
    ) -> Arc<SessionEntry> {
        let mut sessions = self.lock_sessions();
        let entry = sessions.entry(hash.clone()).or_insert_with(|| {
            let now = Utc::now();
            Arc::new(SessionEntry::new(SessionSnapshot {
                hash: hash.clone(),
                title: descriptor.title.clone(),
                descriptor: descriptor.clone(),
                state: SessionState::Pending,
                selected_file: None,
                storage_path: self.settings.data_dir.join(hash.as_str()),
                progress: SessionProgress::default(),
                created_at: now,
                updated_at: now,
            }))
        });
        Arc::clone(entry)
    }

    fn refresh_active_gauge(&self) {
        let active = self
            .entries()
            .iter()
            .filter(|entry| entry.state().is_active())
            .count();
        self.telemetry
            .set_active_sessions(i64::try_from(active).unwrap_or(i64::MAX));
    }

    /// First launch of a freshly created entry.
    async fn launch(
        &self,
        entry: &Arc<SessionEntry>,
        slot: &mut SessionSlot,
    ) -> TorrentResult<SessionSnapshot> {
        let admitted = match self.check_disk() {
            Ok(()) => self.shared.persist(entry, SessionState::Pending).await,
            Err(err) => Err(err),
        };
        if let Err(err) = admitted {
            slot.deleted = true;
            self.forget(entry);
            return Err(err);
        }

        let snapshot = entry.snapshot();
        info!(hash = %entry.hash, title = %snapshot.title, "session created");
        self.shared.events.publish(Event::SessionAdded {
            hash: entry.hash.to_string(),
            title: snapshot.title,
        });
        self.shared.events.publish(Event::StateChanged {
            hash: entry.hash.to_string(),
            state: SessionState::Pending,
        });
        self.spin_up(entry, slot).await
    }

    /// `start` on a failed session: clear the selection and try again.
    async fn retry(
        &self,
        entry: &Arc<SessionEntry>,
        slot: &mut SessionSlot,
    ) -> TorrentResult<SessionSnapshot> {
        self.teardown(entry, slot, CoverageStatus::Paused).await;
        self.check_disk()?;
        entry.update(|view| {
            view.selected_file = None;
            view.progress = SessionProgress::default();
        });
        entry.coverage.reset();
        slot.verified = false;
        self.shared
            .transition(entry, SessionState::Pending)
            .await?;
        self.spin_up(entry, slot).await
    }

    async fn resume_locked(
        &self,
        entry: &Arc<SessionEntry>,
        slot: &mut SessionSlot,
    ) -> TorrentResult<SessionSnapshot> {
        self.check_disk()?;
        self.spin_up(entry, slot).await
    }

    /// Create an adapter, wait for its file list, select the file, and move
    /// to `Downloading`. Any failure after creation persists `Failed`.
    async fn spin_up(
        &self,
        entry: &Arc<SessionEntry>,
        slot: &mut SessionSlot,
    ) -> TorrentResult<SessionSnapshot> {
        let snapshot = entry.snapshot();
        let spec = AdapterSpec {
            hash: entry.hash.clone(),
            descriptor: snapshot.descriptor.clone(),
            storage_path: snapshot.storage_path.clone(),
            coverage: entry.coverage.clone(),
        };
        let adapter = match self.factory.create(spec).await {
            Ok(adapter) => adapter,
            Err(err) => {
                self.mark_failed(entry, &err).await;
                return Err(err);
            }
        };
        self.telemetry.inc_adapters_created();
        slot.generation += 1;
        let generation = slot.generation;
        let monitor_events = adapter.subscribe();
        let progress_events = adapter.subscribe();

        let selected = match self.select(entry, &snapshot, adapter.as_ref()).await {
            Ok(selected) => selected,
            Err(err) => {
                if let Err(destroy_err) = adapter.destroy().await {
                    warn!(hash = %entry.hash, error = %destroy_err, "failed to destroy adapter");
                }
                entry.coverage.set_status(CoverageStatus::Paused);
                self.mark_failed(entry, &err).await;
                return Err(err);
            }
        };

        entry.coverage.set_total(selected.size_bytes);
        entry.coverage.set_status(CoverageStatus::Live);
        entry.update(|view| {
            view.progress.total_bytes = selected.size_bytes;
            view.selected_file = Some(selected);
        });
        slot.adapter = Some(Arc::clone(&adapter));
        slot.verified = true;
        if let Err(err) = self
            .shared
            .transition(entry, SessionState::Downloading)
            .await
        {
            self.teardown(entry, slot, CoverageStatus::Paused).await;
            return Err(err);
        }

        slot.tasks = vec![
            spawn_monitor(
                self.shared.clone(),
                Arc::clone(entry),
                generation,
                monitor_events,
            ),
            broadcaster::spawn(
                entry.hash.clone(),
                progress_events,
                entry.state.subscribe(),
                self.shared.events.clone(),
                self.settings.progress_interval,
            ),
        ];
        self.refresh_active_gauge();
        Ok(entry.snapshot())
    }

    async fn select(
        &self,
        entry: &SessionEntry,
        snapshot: &SessionSnapshot,
        adapter: &dyn SwarmAdapter,
    ) -> TorrentResult<SelectedFile> {
        let files = adapter.files(self.settings.metadata_timeout).await?;
        self.shared.events.publish(Event::FilesDiscovered {
            hash: entry.hash.to_string(),
            files: files.iter().map(DiscoveredFile::from).collect(),
        });
        let file = choose_file(snapshot, &files)?;
        adapter.select_file(&file).await?;
        debug!(hash = %entry.hash, path = %file.path, size_bytes = file.size_bytes, "file selected");
        Ok(SelectedFile::from(&file))
    }

    async fn mark_failed(&self, entry: &SessionEntry, err: &TorrentError) {
        let state = SessionState::Failed {
            message: err.to_string(),
        };
        if let Err(persist_err) = self.shared.transition(entry, state.clone()).await {
            warn!(hash = %entry.hash, error = %persist_err, "failed to persist session failure");
            entry.set_state(state);
        }
        self.refresh_active_gauge();
    }

    /// Release the adapter and its tasks, waking readers with `status`.
    async fn teardown(&self, entry: &SessionEntry, slot: &mut SessionSlot, status: CoverageStatus) {
        entry.coverage.set_status(status);
        for task in slot.tasks.drain(..) {
            task.abort();
        }
        slot.generation += 1;
        if let Some(adapter) = slot.adapter.take() {
            if let Err(err) = adapter.pause().await {
                debug!(hash = %entry.hash, error = %err, "adapter pause before destroy failed");
            }
            if let Err(err) = adapter.destroy().await {
                warn!(hash = %entry.hash, error = %err, "failed to destroy adapter");
            }
        }
    }

    async fn remove_storage(&self, entry: &SessionEntry) -> TorrentResult<()> {
        let storage_path = entry.snapshot().storage_path;
        match tokio::fs::remove_dir_all(&storage_path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(TorrentError::io("delete_storage", storage_path, err)),
        }
    }

    /// Rebuild coverage of a paused session from its stored file, once.
    async fn verify_stored(&self, entry: &SessionEntry) {
        let mut slot = entry.slot.lock().await;
        if slot.deleted || slot.verified || slot.adapter.is_some() {
            return;
        }
        let snapshot = entry.snapshot();
        let Some(file) = snapshot.selected_file.as_ref() else {
            return;
        };
        if snapshot.state != SessionState::Paused {
            return;
        }
        let spec = AdapterSpec {
            hash: entry.hash.clone(),
            descriptor: snapshot.descriptor.clone(),
            storage_path: snapshot.storage_path.clone(),
            coverage: entry.coverage.clone(),
        };
        match self.factory.verify_storage(&spec, file).await {
            Ok(verified_bytes) => {
                slot.verified = true;
                entry.update(|view| view.progress.downloaded_bytes = verified_bytes);
                info!(hash = %entry.hash, verified_bytes, "stored file verified");
            }
            Err(err) => warn!(hash = %entry.hash, error = %err, "stored file check failed"),
        }
    }
}

#[async_trait]
impl SessionControl for SessionRegistry {
    async fn start(&self, descriptor: ContentDescriptor) -> TorrentResult<SessionSnapshot> {
        let parsed = descriptor.parse()?;
        let descriptor =
            ContentDescriptor::new(descriptor.uri.trim(), descriptor.display_title(&parsed));
        loop {
            let entry = self.entry_for_start(&parsed.hash, &descriptor);
            let mut slot = entry.slot.lock().await;
            if slot.deleted {
                self.forget(&entry);
                continue;
            }
            match entry.state() {
                SessionState::Downloading | SessionState::Completed => {
                    return Ok(entry.snapshot());
                }
                SessionState::Paused => {
                    info!(hash = %entry.hash, "start resumes paused session");
                    return self.resume_locked(&entry, &mut slot).await;
                }
                SessionState::Failed { message } => {
                    info!(hash = %entry.hash, %message, "start retries failed session");
                    return self.retry(&entry, &mut slot).await;
                }
                SessionState::Pending => return self.launch(&entry, &mut slot).await,
                SessionState::Deleted => {}
            }
        }
    }

    async fn pause(&self, hash: &InfoHash) -> TorrentResult<SessionSnapshot> {
        let entry = self.lookup(hash)?;
        let mut slot = entry.slot.lock().await;
        if slot.deleted {
            return Err(not_found(hash));
        }
        let state = entry.state();
        match state {
            SessionState::Paused => return Ok(entry.snapshot()),
            SessionState::Failed { .. } | SessionState::Deleted => {
                return Err(invalid_state(hash, "pause", &state));
            }
            SessionState::Pending | SessionState::Downloading | SessionState::Completed => {}
        }
        self.teardown(&entry, &mut slot, CoverageStatus::Paused)
            .await;
        let persisted = self.shared.transition(&entry, SessionState::Paused).await;
        if persisted.is_err() {
            // The adapter is already released.
            entry.set_state(SessionState::Paused);
        }
        self.refresh_active_gauge();
        persisted?;
        Ok(entry.snapshot())
    }

    async fn resume(&self, hash: &InfoHash) -> TorrentResult<SessionSnapshot> {
        let entry = self.lookup(hash)?;
        let mut slot = entry.slot.lock().await;
        if slot.deleted {
            return Err(not_found(hash));
        }
        let state = entry.state();
        match state {
            SessionState::Downloading | SessionState::Completed => Ok(entry.snapshot()),
            SessionState::Paused => self.resume_locked(&entry, &mut slot).await,
            SessionState::Pending | SessionState::Failed { .. } | SessionState::Deleted => {
                Err(invalid_state(hash, "resume", &state))
            }
        }
    }

    async fn delete(&self, hash: &InfoHash) -> TorrentResult<()> {
        let Some(entry) = self.find(hash) else {
            return Ok(());
        };
        let mut slot = entry.slot.lock().await;
        if slot.deleted {
            return Ok(());
        }
        slot.deleted = true;
        self.teardown(&entry, &mut slot, CoverageStatus::Closed)
            .await;
        if !entry
            .coverage
            .drain_readers(self.settings.reader_drain)
            .await
        {
            warn!(
                hash = %hash,
                readers = entry.coverage.active_readers(),
                "readers still attached after drain window"
            );
        }

        if let Err(err) = self.remove_storage(&entry).await {
            slot.deleted = false;
            self.mark_failed(&entry, &err).await;
            return Err(err);
        }
        if let Err(err) = self.shared.store.remove(hash).await {
            let err = TorrentError::operation("store.remove", Some(hash.as_str()), err);
            slot.deleted = false;
            self.mark_failed(&entry, &err).await;
            return Err(err);
        }
        self.forget(&entry);
        entry.set_state(SessionState::Deleted);
        drop(slot);

        info!(hash = %hash, "session deleted");
        self.shared.events.publish(Event::SessionRemoved {
            hash: hash.to_string(),
        });
        self.shared.events.publish(Event::StateChanged {
            hash: hash.to_string(),
            state: SessionState::Deleted,
        });
        self.refresh_active_gauge();
        Ok(())
    }

    async fn restore(&self) -> TorrentResult<Vec<SessionSnapshot>> {
        let rows = self
            .shared
            .store
            .load_all()
            .await
            .map_err(|err| TorrentError::operation("store.load_all", None, err))?;
        let mut restored = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(existing) = self.find(&row.hash) {
                restored.push(existing.snapshot());
                continue;
            }
            let now = Utc::now();
            let entry = Arc::new(SessionEntry::new(SessionSnapshot {
                hash: row.hash.clone(),
                title: row.descriptor.title.clone(),
                descriptor: row.descriptor,
                state: row.state,
                progress: SessionProgress {
                    total_bytes: row
                        .selected_file
                        .as_ref()
                        .map_or(0, |file| file.size_bytes),
                    ..SessionProgress::default()
                },
                selected_file: row.selected_file,
                storage_path: row.storage_path,
                created_at: row.created_at,
                updated_at: now,
            }));
            let inserted = {
                let mut sessions = self.lock_sessions();
                if sessions.contains_key(&row.hash) {
                    false
                } else {
                    sessions.insert(row.hash.clone(), Arc::clone(&entry));
                    true
                }
            };
            if !inserted {
                if let Some(existing) = self.find(&row.hash) {
                    restored.push(existing.snapshot());
                }
                continue;
            }

            let slot = entry.slot.lock().await;
            if let Err(err) = self.shared.persist(&entry, SessionState::Paused).await {
                warn!(hash = %row.hash, error = %err, "failed to persist restored session");
                entry.set_state(SessionState::Paused);
            }
            drop(slot);
            restored.push(entry.snapshot());
        }
        info!(count = restored.len(), "sessions restored");
        self.refresh_active_gauge();
        Ok(restored)
    }
}

#[async_trait]
impl SessionInspector for SessionRegistry {
    async fn get(&self, hash: &InfoHash) -> TorrentResult<SessionSnapshot> {
        Ok(self.lookup(hash)?.snapshot())
    }

    async fn list(&self) -> TorrentResult<Vec<SessionSnapshot>> {
        let mut sessions: Vec<_> = self
            .entries()
            .iter()
            .map(|entry| entry.snapshot())
            .collect();
        sessions.sort_by(|left, right| {
            left.created_at
                .cmp(&right.created_at)
                .then_with(|| left.hash.as_str().cmp(right.hash.as_str()))
        });
        Ok(sessions)
    }

    async fn open_stream(&self, hash: &InfoHash) -> TorrentResult<StreamSource> {
        let entry = self.lookup(hash)?;
        self.verify_stored(&entry).await;
        let snapshot = entry.snapshot();
        let servable = matches!(
            snapshot.state,
            SessionState::Downloading | SessionState::Paused | SessionState::Completed
        );
        let selected = snapshot
            .selected_file
            .as_ref()
            .filter(|_| servable)
            .ok_or_else(|| invalid_state(hash, "stream", &snapshot.state))?;
        Ok(StreamSource {
            path: selected.absolute_path(&snapshot.storage_path),
            total_bytes: selected.size_bytes,
            content_type: selected.content_type(),
            reader: entry.coverage.reader(),
        })
    }
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

    fn snapshot(selected_file: Option<SelectedFile>) -> SessionSnapshot {
        let now = Utc::now();
        SessionSnapshot {
            hash: InfoHash::parse("c9e15763f722f23e98a29decdfae341b98d53056").expect("hash"),
            title: "t".into(),
            descriptor: ContentDescriptor::new("c9e15763f722f23e98a29decdfae341b98d53056", "t"),
            state: SessionState::Paused,
            selected_file,
            storage_path: PathBuf::from("/data/c9e15763f722f23e98a29decdfae341b98d53056"),
            progress: SessionProgress::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn fresh_session_picks_largest_playable_file() {
        let files = vec![file(0, "a.mkv", 10), file(1, "b.mp4", 20), file(2, "c.iso", 99)];
        let chosen = choose_file(&snapshot(None), &files).expect("playable");
        assert_eq!(chosen.index, 1);
    }

    #[test]
    fn resumed_session_keeps_its_selection() {
        let files = vec![file(0, "a.mkv", 10), file(1, "b.mp4", 20)];
        let selected = SelectedFile::from(&files[0]);
        let chosen = choose_file(&snapshot(Some(selected)), &files).expect("still listed");
        assert_eq!(chosen.index, 0);

        let renamed = vec![file(0, "other.mkv", 10)];
        let selected = SelectedFile::from(&files[0]);
        assert!(matches!(
            choose_file(&snapshot(Some(selected)), &renamed),
            Err(TorrentError::OperationFailed { .. })
        ));
    }

    #[test]
    fn empty_file_list_has_no_playable_file() {
        assert!(matches!(
            choose_file(&snapshot(None), &[]),
            Err(TorrentError::NoPlayableFile { .. })
        ));
    }
}
