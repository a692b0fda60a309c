//! The download service: the one owner of running downloads.
//!
//! Every externally visible download has a durable [`DownloadRecord`]. While
//! it runs in this process it also has an entry in the in-memory task table.
//! Control operations consult the table first and fall back to the record,
//! so a download left behind by a previous process can still be inspected
//! and dismissed.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use isofetch::broadcast::ProgressBroadcaster;
//! use isofetch::service::{DownloadService, ServiceConfig};
//! use isofetch::store::JsonFileStore;
//!
//! let store = Arc::new(JsonFileStore::open("/var/lib/isofetch")?);
//! let service = DownloadService::new(store, Arc::new(ProgressBroadcaster::default()), ServiceConfig::default());
//!
//! let record = service.start_download(entry).await?;
//! service.pause(record.id).await?;
//! service.resume(record.id).await?;
//! service.cancel(record.id).await?;
//! ```

use std::path::{Component, Path};
use std::sync::Arc;
use std::thread;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::config::ServiceConfig;
use super::error::{ServiceError, ServiceResult};
use super::pump::{run_pump, with_store, ChannelObserver};
use crate::broadcast::{ProgressBroadcaster, ProgressPayload};
use crate::catalog::CatalogEntry;
use crate::download::{DownloadEngine, DownloadState, DownloadTask};
use crate::format::format_bytes;
use crate::store::{CheckpointStore, DownloadRecord, NewRecord, SourceDescriptor, StoreResult};

/// State shared between the service and its event pumps.
pub(crate) struct Shared {
    pub(crate) store: Arc<dyn CheckpointStore>,
    pub(crate) broadcaster: Arc<ProgressBroadcaster>,
    /// Tasks by download id, from launch until their worker has exited.
    /// Engine workers never touch this table.
    pub(crate) tasks: DashMap<u64, Arc<DownloadTask>>,
    /// One writer per record: held across each read-modify-write.
    record_locks: DashMap<u64, Arc<tokio::sync::Mutex<()>>>,
    pub(crate) config: ServiceConfig,
}

impl Shared {
    /// Run `op` against the store while holding the write lock of record `id`.
    pub(crate) async fn modify_record<T, F>(&self, id: u64, op: F) -> ServiceResult<T>
    where
        F: FnOnce(&dyn CheckpointStore) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let lock = Arc::clone(self.record_locks.entry(id).or_default().value());
        let _guard = lock.lock().await;
        with_store(&self.store, op).await
    }

    /// Drop `task` from the table once no worker can write its destination.
    ///
    /// While a worker still runs, its pump releases the task on exit.
    pub(crate) fn release_if_idle(&self, task: &Arc<DownloadTask>) {
        if task.state().is_terminal() && !task.is_running() {
            self.tasks.remove_if(&task.id(), |_, live| Arc::ptr_eq(live, task));
        }
    }
}

/// Aggregate counters over all stored downloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadStats {
    pub total_downloads: usize,
    pub active_downloads: usize,
    pub completed_downloads: usize,
    pub failed_downloads: usize,
    /// Sum of bytes over completed downloads.
    pub total_bytes_downloaded: u64,
    pub total_bytes_formatted: String,
}

impl DownloadStats {
    fn from_records(records: &[DownloadRecord]) -> Self {
        let count = |state: DownloadState| records.iter().filter(|r| r.state == state).count();
        let total_bytes_downloaded = records
            .iter()
            .filter(|r| r.state == DownloadState::Completed)
            .map(|r| r.downloaded_bytes)
            .sum();

        Self {
            total_downloads: records.len(),
            active_downloads: count(DownloadState::Downloading),
            completed_downloads: count(DownloadState::Completed),
            failed_downloads: count(DownloadState::Failed),
            total_bytes_downloaded,
            total_bytes_formatted: format_bytes(total_bytes_downloaded),
        }
    }
}

/// Drives the engine from async code and keeps records and subscribers in sync.
pub struct DownloadService {
    shared: Arc<Shared>,
    engine: Arc<DownloadEngine>,
    /// Serializes the destination check with task-table insertion.
    claim_lock: Mutex<()>,
}

impl DownloadService {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        broadcaster: Arc<ProgressBroadcaster>,
        config: ServiceConfig,
    ) -> Self {
        let engine = Arc::new(DownloadEngine::new(config.engine.clone()));
        Self {
            shared: Arc::new(Shared {
                store,
                broadcaster,
                tasks: DashMap::new(),
                record_locks: DashMap::new(),
                config,
            }),
            engine,
            claim_lock: Mutex::new(()),
        }
    }

    pub fn broadcaster(&self) -> &Arc<ProgressBroadcaster> {
        &self.shared.broadcaster
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.shared.config
    }

    /// Number of downloads with a task in this process, including cancelled
    /// ones whose worker has not exited yet.
    pub fn active_count(&self) -> usize {
        self.shared.tasks.len()
    }

    pub fn is_active(&self, id: u64) -> bool {
        self.shared.tasks.contains_key(&id)
    }

    /// Report records a previous process left mid-flight.
    ///
    /// They are not restarted; they stay listed and can be cancelled through
    /// the durable path. Returns how many were found.
    pub async fn recover(&self) -> ServiceResult<usize> {
        let records = self.list(None).await?;
        let orphans: Vec<_> = records
            .iter()
            .filter(|r| {
                matches!(
                    r.state,
                    DownloadState::Pending | DownloadState::Downloading | DownloadState::Verifying
                ) && !self.is_active(r.id)
            })
            .collect();

        for record in &orphans {
            warn!(
                download_id = record.id,
                state = %record.state,
                bytes = record.downloaded_bytes,
                "Download has no worker in this process"
            );
        }
        if !orphans.is_empty() {
            info!(count = orphans.len(), "Found orphaned downloads");
        }
        Ok(orphans.len())
    }

    // =========================================================================
    // Control
    // =========================================================================

    /// Create a record for `entry` and start downloading it in the background.
    ///
    /// Returns as soon as the worker is launched.
    pub async fn start_download(&self, entry: CatalogEntry) -> ServiceResult<DownloadRecord> {
        let checksum = entry.checksum()?;
        let filename = entry.output_filename();
        let destination = self.shared.config.download_dir.join(&filename);
        if !is_single_component(&filename) {
            return Err(ServiceError::UnsafeDestination(destination));
        }

        let new = NewRecord {
            source: SourceDescriptor::from(&entry),
            url: entry.url.clone(),
            output_path: destination.clone(),
            total_bytes: entry.size.unwrap_or(0),
            checksum: checksum.as_ref().map(|c| c.expected.clone()),
            checksum_type: checksum.as_ref().map(|c| c.algorithm.to_string()),
        };
        let record = with_store(&self.shared.store, move |store| store.create(new)).await?;
        let id = record.id;

        let task = Arc::new(
            DownloadTask::new(id, entry.url.clone(), destination.clone())
                .with_mirrors(entry.mirrors.clone())
                .with_expected_size(entry.size)
                .with_checksum(checksum)
                .with_headers(entry.header_pairs()),
        );

        if let Err(err) = self.claim(&task) {
            if let Err(cleanup) = with_store(&self.shared.store, move |store| store.delete(id)).await {
                warn!(download_id = id, error = %cleanup, "Failed to remove rejected record");
            }
            return Err(err);
        }

        if let Err(err) = self.launch(Arc::clone(&task)) {
            self.shared.tasks.remove(&id);
            return Err(err);
        }

        info!(
            download_id = id,
            name = %entry.name,
            version = %entry.version,
            destination = %destination.display(),
            "Download started"
        );
        Ok(record)
    }

    /// Pause a running download.
    pub async fn pause(&self, id: u64) -> ServiceResult<DownloadRecord> {
        let task = self.live_task(id).await?;
        if !self.engine.pause(&task) {
            return Err(ServiceError::InvalidState {
                id,
                state: task.state(),
                operation: "pause",
            });
        }
        self.persist_live(&task).await
    }

    /// Resume a paused download on a new worker.
    pub async fn resume(&self, id: u64) -> ServiceResult<DownloadRecord> {
        let task = self.live_task(id).await?;
        if !self.engine.prepare_resume(&task) {
            return Err(ServiceError::InvalidState {
                id,
                state: task.state(),
                operation: "resume",
            });
        }

        // Checkpoint before the worker starts so its first event wins.
        let record = self.persist_live(&task).await?;
        self.launch(task)?;
        info!(download_id = id, "Download resumed");
        Ok(record)
    }

    /// Cancel a download, live or not.
    ///
    /// A live task is cancelled in memory and its record marked `cancelled`.
    /// It leaves the task table only once its worker has exited, so the
    /// destination stays claimed until the last write is flushed. Without a
    /// live task the record is marked `cancelled` whatever its stored state.
    /// Fails only when the id has no record.
    pub async fn cancel(&self, id: u64) -> ServiceResult<DownloadRecord> {
        let live = self.shared.tasks.get(&id).map(|t| Arc::clone(t.value()));
        match live {
            Some(task) => self.cancel_live(task).await,
            None => self.cancel_durable(id).await,
        }
    }

    /// Delete every completed, failed or cancelled record.
    pub async fn clear_completed(&self) -> ServiceResult<usize> {
        let removed = with_store(&self.shared.store, |store| {
            store.delete_in_states(&DownloadState::TERMINAL)
        })
        .await?;
        let tasks = &self.shared.tasks;
        self.shared
            .record_locks
            .retain(|id, lock| tasks.contains_key(id) || Arc::strong_count(lock) > 1);
        info!(removed, "Cleared finished downloads");
        Ok(removed)
    }

    /// Cancel if live, then delete the record. Files on disk are kept.
    pub async fn delete(&self, id: u64) -> ServiceResult<()> {
        let live = self.shared.tasks.get(&id).map(|t| Arc::clone(t.value()));
        if let Some(task) = live {
            self.engine.cancel(&task);
            self.shared.release_if_idle(&task);
        }
        self.shared
            .modify_record(id, move |store| store.delete(id))
            .await?;
        self.shared.record_locks.remove(&id);
        info!(download_id = id, "Download deleted");
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get(&self, id: u64) -> ServiceResult<DownloadRecord> {
        with_store(&self.shared.store, move |store| store.get(id)).await
    }

    /// Records newest first, optionally filtered by state.
    pub async fn list(&self, state: Option<DownloadState>) -> ServiceResult<Vec<DownloadRecord>> {
        with_store(&self.shared.store, move |store| store.list(state)).await
    }

    pub async fn stats(&self) -> ServiceResult<DownloadStats> {
        let records = self.list(None).await?;
        Ok(DownloadStats::from_records(&records))
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Insert `task` into the table unless another task holds the same file.
    ///
    /// A cancelled task still holds its destination until its worker exits.
    fn claim(&self, task: &Arc<DownloadTask>) -> ServiceResult<()> {
        let _guard = self.claim_lock.lock();
        let conflict = self.shared.tasks.iter().find_map(|entry| {
            let other = entry.value();
            (other.destination() == task.destination()).then(|| other.id())
        });

        if let Some(existing) = conflict {
            return Err(ServiceError::AlreadyActive {
                existing,
                path: task.destination().to_path_buf(),
            });
        }
        self.shared.tasks.insert(task.id(), Arc::clone(task));
        Ok(())
    }

    /// Start a worker thread and its event pump.
    fn launch(&self, task: Arc<DownloadTask>) -> ServiceResult<()> {
        let (tx, rx) = mpsc::channel(self.shared.config.event_capacity);
        let engine = Arc::clone(&self.engine);
        let worker_task = Arc::clone(&task);

        thread::Builder::new()
            .name(format!("download-{}", task.id()))
            .spawn(move || {
                let observer = ChannelObserver::new(tx);
                engine.start(&worker_task, &observer);
            })
            .map_err(ServiceError::Spawn)?;

        tokio::spawn(run_pump(Arc::clone(&self.shared), task, rx));
        Ok(())
    }

    /// The live task for `id`, or why there is none.
    async fn live_task(&self, id: u64) -> ServiceResult<Arc<DownloadTask>> {
        if let Some(task) = self.shared.tasks.get(&id).map(|t| Arc::clone(t.value())) {
            return Ok(task);
        }
        let record = self.get(id).await?;
        Err(ServiceError::NotActive {
            id,
            state: record.state,
        })
    }

    /// Checkpoint the task's live state and progress, then broadcast it.
    async fn persist_live(&self, task: &DownloadTask) -> ServiceResult<DownloadRecord> {
        let id = task.id();
        let (state, progress) = task.snapshot();

        let record = self.shared.modify_record(id, move |store| {
            let mut record = store.get(id)?;
            if !record.state.is_terminal() {
                record.state = state;
                record.apply_progress(&progress);
                store.update(&record)?;
            }
            Ok(record)
        })
        .await?;

        self.shared
            .broadcaster
            .broadcast(&ProgressPayload::from_record(&record));
        Ok(record)
    }

    async fn cancel_live(&self, task: Arc<DownloadTask>) -> ServiceResult<DownloadRecord> {
        let id = task.id();
        if !self.engine.cancel(&task) {
            debug!(download_id = id, state = %task.state(), "Task past cancellable state");
        }
        self.shared.release_if_idle(&task);
        let record = self.mark_cancelled(id).await?;
        info!(download_id = id, "Download cancelled");
        Ok(record)
    }

    async fn cancel_durable(&self, id: u64) -> ServiceResult<DownloadRecord> {
        let record = self.mark_cancelled(id).await?;
        info!(download_id = id, "Cancelled download with no live task");
        Ok(record)
    }

    async fn mark_cancelled(&self, id: u64) -> ServiceResult<DownloadRecord> {
        let record = self.shared.modify_record(id, move |store| {
            let mut record = store.get(id)?;
            record.state = DownloadState::Cancelled;
            record.speed = 0.0;
            record.eta = 0;
            store.update(&record)?;
            Ok(record)
        })
        .await?;

        self.shared
            .broadcaster
            .broadcast(&ProgressPayload::from_record(&record));
        Ok(record)
    }
}

fn is_single_component(filename: &str) -> bool {
    let mut components = Path::new(filename).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}
