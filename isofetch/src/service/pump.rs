//! Worker-to-runtime event bridge.
//!
//! The engine runs on a plain OS thread and reports through a
//! [`ChannelObserver`], which pushes [`DownloadEvent`]s into a bounded tokio
//! channel with `blocking_send`. One pump task per run drains that channel
//! inside the runtime, where it broadcasts every event and checkpoints a
//! subset of them.
//!
//! ```text
//!  worker thread                      tokio runtime
//!  ─────────────                      ─────────────
//!  engine.start ──► ChannelObserver ──mpsc──► run_pump ──► broadcaster
//!                                                 │
//!                                                 └──► store (every step% / state change / terminal)
//! ```

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use super::download::Shared;
use super::error::{ServiceError, ServiceResult};
use crate::broadcast::ProgressPayload;
use crate::download::{
    DownloadObserver, DownloadOutcome, DownloadProgress, DownloadState, DownloadTask,
};
use crate::store::{CheckpointStore, DownloadRecord, StoreResult};

/// What a worker reports.
#[derive(Debug, Clone)]
pub(crate) enum DownloadEvent {
    Progress {
        state: DownloadState,
        progress: DownloadProgress,
    },
    Finished(DownloadOutcome),
}

/// Observer that forwards engine notifications into a channel.
///
/// Must only be used from a non-async thread.
pub(crate) struct ChannelObserver {
    tx: mpsc::Sender<DownloadEvent>,
}

impl ChannelObserver {
    pub(crate) fn new(tx: mpsc::Sender<DownloadEvent>) -> Self {
        Self { tx }
    }
}

impl DownloadObserver for ChannelObserver {
    fn on_progress(&self, state: DownloadState, progress: &DownloadProgress) {
        // A closed channel means the runtime is shutting down.
        let _ = self.tx.blocking_send(DownloadEvent::Progress {
            state,
            progress: *progress,
        });
    }

    fn on_complete(&self, outcome: &DownloadOutcome) {
        let _ = self.tx.blocking_send(DownloadEvent::Finished(outcome.clone()));
    }
}

/// Decides which progress events are worth a checkpoint write.
#[derive(Debug)]
pub(crate) struct CheckpointPolicy {
    step: f64,
    last_state: Option<DownloadState>,
    last_bucket: Option<u64>,
}

impl CheckpointPolicy {
    pub(crate) fn new(step: f64) -> Self {
        Self {
            step,
            last_state: None,
            last_bucket: None,
        }
    }

    /// True on a state change or when `percentage` enters a new step bucket.
    pub(crate) fn due(&mut self, state: DownloadState, percentage: f64) -> bool {
        let bucket = (percentage / self.step).floor() as u64;
        let due = state.is_terminal()
            || self.last_state != Some(state)
            || self.last_bucket != Some(bucket);
        if due {
            self.last_state = Some(state);
            self.last_bucket = Some(bucket);
        }
        due
    }
}

/// Run a blocking store operation on the blocking pool.
pub(crate) async fn with_store<T, F>(store: &Arc<dyn CheckpointStore>, op: F) -> ServiceResult<T>
where
    F: FnOnce(&dyn CheckpointStore) -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || op(store.as_ref()))
        .await
        .map_err(|e| ServiceError::Join(e.to_string()))?
        .map_err(Into::into)
}

/// Drain one run's events until the worker drops its sender.
///
/// The sender lives as long as the worker thread, so once the channel closes
/// the destination is flushed and a terminal task can leave the table.
pub(crate) async fn run_pump(
    shared: Arc<Shared>,
    task: Arc<DownloadTask>,
    mut events: mpsc::Receiver<DownloadEvent>,
) {
    let id = task.id();
    let mut policy = CheckpointPolicy::new(shared.config.persist_step);

    while let Some(event) = events.recv().await {
        match event {
            DownloadEvent::Progress { state, progress } => {
                shared
                    .broadcaster
                    .broadcast(&ProgressPayload::new(id, state, &progress, None));

                if policy.due(state, progress.percentage()) {
                    if let Err(err) = checkpoint(&shared, &task, progress).await {
                        warn!(download_id = id, error = %err, "Failed to checkpoint progress");
                    }
                }
            }
            DownloadEvent::Finished(outcome) => finish(&shared, &task, outcome).await,
        }
    }

    shared.release_if_idle(&task);
    debug!(download_id = id, state = %task.state(), "Event pump finished");
}

/// Write a progress checkpoint using the task's live state.
///
/// Terminal records are left alone: the terminal write belongs to
/// [`finish`] or to a cancel.
pub(super) async fn checkpoint(
    shared: &Shared,
    task: &DownloadTask,
    progress: DownloadProgress,
) -> ServiceResult<()> {
    let id = task.id();
    let live_state = task.state();
    if live_state.is_terminal() {
        return Ok(());
    }
    let started_at = task.started_at();

    shared.modify_record(id, move |store| {
        let mut record = store.get(id)?;
        if record.state.is_terminal() {
            return Ok(());
        }
        record.state = live_state;
        record.apply_progress(&progress);
        record.started_at = started_at.or(record.started_at);
        store.update(&record)
    })
    .await
}

/// Persist and announce the end of a run.
async fn finish(shared: &Shared, task: &Arc<DownloadTask>, outcome: DownloadOutcome) {
    let id = task.id();
    let started_at = task.started_at();
    let completed_at = task.completed_at();
    let terminal = outcome.clone();

    let persisted = shared.modify_record(id, move |store| {
        let mut record = store.get(id)?;
        // A durable cancel dismisses the download for good.
        if record.state == DownloadState::Cancelled {
            return Ok(record);
        }
        apply_outcome(&mut record, &terminal);
        record.started_at = started_at.or(record.started_at);
        if terminal.state == DownloadState::Completed {
            record.completed_at = completed_at.or_else(|| Some(Utc::now()));
        }
        store.update(&record)?;
        Ok(record)
    })
    .await;

    let payload = match persisted {
        Ok(record) => ProgressPayload::from_record(&record),
        Err(err) => {
            error!(
                download_id = id,
                state = %outcome.state,
                error = %err,
                "Failed to persist final download state"
            );
            ProgressPayload::new(id, outcome.state, &outcome.progress, outcome.error.clone())
        }
    };
    shared.broadcaster.broadcast(&payload);
}

pub(crate) fn apply_outcome(record: &mut DownloadRecord, outcome: &DownloadOutcome) {
    record.state = outcome.state;
    record.apply_progress(&outcome.progress);
    record.speed = 0.0;
    record.eta = 0;
    record.checksum_verified = outcome.checksum_verified;
    match outcome.state {
        DownloadState::Completed => {
            record.progress = 100.0;
            record.error_message = None;
        }
        DownloadState::Failed => record.error_message = outcome.error.clone(),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_steps() {
        let mut policy = CheckpointPolicy::new(10.0);
        assert!(policy.due(DownloadState::Downloading, 0.0));
        assert!(!policy.due(DownloadState::Downloading, 5.0));
        assert!(!policy.due(DownloadState::Downloading, 9.9));
        assert!(policy.due(DownloadState::Downloading, 10.2));
        assert!(!policy.due(DownloadState::Downloading, 19.0));
        assert!(policy.due(DownloadState::Downloading, 35.0));
    }

    #[test]
    fn test_policy_state_change() {
        let mut policy = CheckpointPolicy::new(10.0);
        assert!(policy.due(DownloadState::Downloading, 100.0));
        assert!(policy.due(DownloadState::Verifying, 100.0));
        assert!(!policy.due(DownloadState::Verifying, 100.0));
    }

    #[test]
    fn test_policy_unknown_total_checkpoints_on_state_only() {
        let mut policy = CheckpointPolicy::new(10.0);
        assert!(policy.due(DownloadState::Downloading, 0.0));
        assert!(!policy.due(DownloadState::Downloading, 0.0));
    }

    #[test]
    fn test_channel_observer_forwards() {
        let (tx, mut rx) = mpsc::channel(4);
        let observer = ChannelObserver::new(tx);
        observer.on_progress(DownloadState::Downloading, &DownloadProgress::default());
        assert!(matches!(
            rx.try_recv().unwrap(),
            DownloadEvent::Progress {
                state: DownloadState::Downloading,
                ..
            }
        ));
    }
}
