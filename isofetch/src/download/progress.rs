//! Progress reporting for a single transfer run.
//!
//! The engine reads in 64KB chunks, far more often than any consumer wants
//! to hear about. [`TransferMeter`] decides when a chunk is worth reporting
//! and derives speed and ETA from the bytes moved since the run began.

use std::time::{Duration, Instant};

use super::checksum::VerificationStatus;
use super::state::DownloadState;
use super::task::DownloadProgress;

/// Minimum interval between progress reports.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Receives engine notifications.
///
/// Called from the worker thread. Implementations must not block for long;
/// the service forwards to a bounded channel, the CLI redraws a bar.
pub trait DownloadObserver: Send + Sync {
    /// Called on entering a state and on throttled ticks while downloading.
    fn on_progress(&self, state: DownloadState, progress: &DownloadProgress);

    /// Called exactly once when a run reaches a terminal state.
    fn on_complete(&self, outcome: &DownloadOutcome);
}

/// Result of a run that reached a terminal state.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadOutcome {
    pub state: DownloadState,
    pub progress: DownloadProgress,
    /// Human-readable failure reason; `None` for completed and cancelled.
    pub error: Option<String>,
    pub checksum_verified: VerificationStatus,
}

impl DownloadOutcome {
    pub fn succeeded(&self) -> bool {
        self.state == DownloadState::Completed
    }
}

/// Observer that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl DownloadObserver for NoopObserver {
    fn on_progress(&self, _state: DownloadState, _progress: &DownloadProgress) {}
    fn on_complete(&self, _outcome: &DownloadOutcome) {}
}

/// Throttle and rate calculation for one run.
#[derive(Debug)]
pub struct TransferMeter {
    started: Instant,
    start_bytes: u64,
    interval: Duration,
    last_report: Instant,
}

impl TransferMeter {
    /// Start measuring at `start_bytes` (the resume offset).
    pub fn new(start_bytes: u64, interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            started: now,
            start_bytes,
            interval,
            last_report: now,
        }
    }

    /// Whether enough time passed since the last report. Records `now` if so.
    pub fn should_report(&mut self, now: Instant) -> bool {
        if now.duration_since(self.last_report) < self.interval {
            return false;
        }
        self.last_report = now;
        true
    }

    /// Speed in bytes/second and ETA in seconds.
    ///
    /// Speed counts only bytes moved during this run; ETA is `0` when speed
    /// or total is unknown.
    pub fn rate(&self, downloaded: u64, total: u64, now: Instant) -> (f64, u64) {
        let elapsed = now.duration_since(self.started).as_secs_f64();
        let moved = downloaded.saturating_sub(self.start_bytes);
        let speed = if elapsed > 0.0 {
            moved as f64 / elapsed
        } else {
            0.0
        };
        let eta = if speed > 0.0 && total > downloaded {
            ((total - downloaded) as f64 / speed) as u64
        } else {
            0
        };
        (speed, eta)
    }
}
