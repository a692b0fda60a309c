//! Download task and progress model.
//!
//! A [`DownloadTask`] is shared (`Arc`) between the worker thread that runs
//! the engine and whoever controls it. Control operations only touch the
//! state, the cancellation flag and the run epoch; byte counters are written
//! by the worker alone.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use super::checksum::Checksum;
use super::state::DownloadState;

/// Snapshot of transfer progress.
///
/// `total_bytes` is `0` while the size is unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    /// Bytes per second averaged over the current run.
    pub speed: f64,
    /// Estimated seconds remaining, `0` when unknown.
    pub eta_secs: u64,
}

impl DownloadProgress {
    /// Completion percentage in `0.0..=100.0`; `0.0` when the total is unknown.
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.downloaded_bytes as f64 / self.total_bytes as f64 * 100.0).min(100.0)
    }
}

#[derive(Debug)]
struct TaskInner {
    state: DownloadState,
    progress: DownloadProgress,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

/// One download: where to fetch from, where to write, and its live state.
#[derive(Debug)]
pub struct DownloadTask {
    id: u64,
    url: String,
    mirrors: Vec<String>,
    destination: PathBuf,
    expected_size: Option<u64>,
    checksum: Option<Checksum>,
    headers: Vec<(String, String)>,

    /// Set once, never cleared.
    cancelled: AtomicBool,
    /// Bumped on pause; a worker stops once the epoch it started with is stale.
    epoch: AtomicU64,
    inner: Mutex<TaskInner>,
    /// Held by the worker for the duration of a run.
    run_lock: Mutex<()>,
}

impl DownloadTask {
    pub fn new(id: u64, url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            id,
            url: url.into(),
            mirrors: Vec::new(),
            destination: destination.into(),
            expected_size: None,
            checksum: None,
            headers: Vec::new(),
            cancelled: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            inner: Mutex::new(TaskInner {
                state: DownloadState::Pending,
                progress: DownloadProgress::default(),
                started_at: None,
                completed_at: None,
                error: None,
            }),
            run_lock: Mutex::new(()),
        }
    }

    /// Alternate sources tried in order after the primary URL.
    pub fn with_mirrors(mut self, mirrors: Vec<String>) -> Self {
        self.mirrors = mirrors;
        self
    }

    /// Declared size from catalog metadata. Zero is treated as unknown.
    pub fn with_expected_size(mut self, size: Option<u64>) -> Self {
        self.expected_size = size.filter(|s| *s > 0);
        self.inner.get_mut().progress.total_bytes = self.expected_size.unwrap_or(0);
        self
    }

    pub fn with_checksum(mut self, checksum: Option<Checksum>) -> Self {
        self.checksum = checksum;
        self
    }

    /// Extra request headers sent to every source.
    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn mirrors(&self) -> &[String] {
        &self.mirrors
    }

    /// Primary URL followed by mirrors, in the order they are tried.
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.url.as_str()).chain(self.mirrors.iter().map(String::as_str))
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn expected_size(&self) -> Option<u64> {
        self.expected_size
    }

    pub fn checksum(&self) -> Option<&Checksum> {
        self.checksum.as_ref()
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn state(&self) -> DownloadState {
        self.inner.lock().state
    }

    pub fn progress(&self) -> DownloadProgress {
        self.inner.lock().progress
    }

    /// State and progress read under one lock.
    pub fn snapshot(&self) -> (DownloadState, DownloadProgress) {
        let inner = self.inner.lock();
        (inner.state, inner.progress)
    }

    pub fn error(&self) -> Option<String> {
        self.inner.lock().error.clone()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().completed_at
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Whether a worker is inside [`DownloadEngine::start`](super::DownloadEngine::start)
    /// for this task and may still write the destination.
    pub fn is_running(&self) -> bool {
        self.run_lock.is_locked()
    }

    // =========================================================================
    // Engine-side mutation
    // =========================================================================

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub(crate) fn lock_run(&self) -> MutexGuard<'_, ()> {
        self.run_lock.lock()
    }

    /// Move `from -> to` atomically; returns false if the state was not `from`.
    pub(crate) fn transition(&self, from: DownloadState, to: DownloadState) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != from {
            return false;
        }
        inner.state = to;
        true
    }

    /// Request a pause: `downloading -> paused`, invalidating the running worker.
    pub(crate) fn request_pause(&self) -> bool {
        let mut inner = self.inner.lock();
        if !inner.state.can_pause() {
            return false;
        }
        inner.state = DownloadState::Paused;
        inner.progress.speed = 0.0;
        inner.progress.eta_secs = 0;
        self.epoch.fetch_add(1, Ordering::AcqRel);
        true
    }

    /// Request cancellation from any cancellable state.
    pub(crate) fn request_cancel(&self) -> bool {
        let mut inner = self.inner.lock();
        if !inner.state.can_cancel() {
            return false;
        }
        self.cancelled.store(true, Ordering::Release);
        inner.state = DownloadState::Cancelled;
        inner.progress.speed = 0.0;
        inner.progress.eta_secs = 0;
        true
    }

    /// Enter `downloading` for a new run starting at `offset` bytes.
    pub(crate) fn begin_run(&self, offset: u64) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != DownloadState::Pending {
            return false;
        }
        inner.state = DownloadState::Downloading;
        inner.progress.downloaded_bytes = offset;
        inner.progress.speed = 0.0;
        inner.progress.eta_secs = 0;
        inner.error = None;
        inner.started_at = Some(Utc::now());
        true
    }

    pub(crate) fn add_downloaded(&self, bytes: u64) -> u64 {
        let mut inner = self.inner.lock();
        inner.progress.downloaded_bytes += bytes;
        inner.progress.downloaded_bytes
    }

    /// Raise the known total. Totals never shrink.
    pub(crate) fn refine_total(&self, total: u64) {
        let mut inner = self.inner.lock();
        if total > inner.progress.total_bytes {
            inner.progress.total_bytes = total;
        }
    }

    pub(crate) fn set_rate(&self, speed: f64, eta_secs: u64) -> DownloadProgress {
        let mut inner = self.inner.lock();
        inner.progress.speed = speed;
        inner.progress.eta_secs = eta_secs;
        inner.progress
    }

    /// Enter `completed`, reporting the actual file size as final progress.
    pub(crate) fn finish_completed(&self, file_size: u64) -> Option<DownloadProgress> {
        let mut inner = self.inner.lock();
        if inner.state != DownloadState::Verifying {
            return None;
        }
        inner.state = DownloadState::Completed;
        inner.completed_at = Some(Utc::now());
        inner.progress.downloaded_bytes = file_size;
        inner.progress.total_bytes = inner.progress.total_bytes.max(file_size);
        inner.progress.speed = 0.0;
        inner.progress.eta_secs = 0;
        Some(inner.progress)
    }

    /// Enter `failed` unless the task already reached a terminal state.
    pub(crate) fn finish_failed(&self, message: impl Into<String>) -> Option<DownloadProgress> {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            return None;
        }
        inner.state = DownloadState::Failed;
        inner.error = Some(message.into());
        inner.progress.speed = 0.0;
        inner.progress.eta_secs = 0;
        Some(inner.progress)
    }
}
