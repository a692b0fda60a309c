//! The download engine.
//!
//! [`DownloadEngine::start`] performs one run of a [`DownloadTask`] on the
//! calling thread:
//!
//! ```text
//!   existing file? ──► size >= expected ──────────────────────┐
//!        │                                                    │
//!        ▼                                                    ▼
//!   for url in [primary, mirrors..]                      verifying
//!        │  GET (Range: bytes=offset-)                        │
//!        │  TLS failure ──► same url, no cert check           ├─► checksum ok / none ──► completed
//!        │  source error ──► next url                         └─► mismatch ──► failed
//!        │  local write error ──► failed
//!        ▼
//!   stream 64KB chunks, check cancel/pause per chunk,
//!   report progress at most every 500ms
//! ```
//!
//! The engine knows nothing about persistence or broadcast. Everything it
//! has to say goes through a [`DownloadObserver`].
//!
//! # Example
//!
//! ```ignore
//! use isofetch::download::{DownloadEngine, DownloadTask, EngineConfig, NoopObserver};
//!
//! let engine = DownloadEngine::new(EngineConfig::default());
//! let task = DownloadTask::new(1, "https://example.org/os.iso", "/tmp/os.iso");
//! let outcome = engine.start(&task, &NoopObserver);
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use tracing::{debug, error, info, warn};

use super::checksum::VerificationStatus;
use super::error::{DownloadError, DownloadResult};
use super::http::{SourceClient, DEFAULT_ATTEMPT_TIMEOUT_SECS, DEFAULT_CONNECT_TIMEOUT_SECS};
use super::progress::{DownloadObserver, DownloadOutcome, TransferMeter, DEFAULT_PROGRESS_INTERVAL};
use super::state::DownloadState;
use super::task::DownloadTask;

/// Buffer size for reading/writing during downloads (64KB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Message recorded when a file does not match its declared checksum.
pub const CHECKSUM_FAILED_MESSAGE: &str = "Checksum verification failed";

// =============================================================================
// Configuration
// =============================================================================

/// Engine tuning.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Connect timeout for each request.
    pub connect_timeout: Duration,
    /// Upper bound for one attempt against one source.
    pub attempt_timeout: Duration,
    /// Minimum interval between progress reports.
    pub progress_interval: Duration,
    /// Read size for the body stream.
    pub chunk_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            attempt_timeout: Duration::from_secs(DEFAULT_ATTEMPT_TIMEOUT_SECS),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl EngineConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }
}

/// How the transfer phase of a run ended.
#[derive(Debug)]
enum RunEnd {
    /// Body fully written; proceed to verification.
    Finished,
    Paused,
    Cancelled,
    Failed(String),
}

// =============================================================================
// Engine
// =============================================================================

/// Transfers one task per call to [`start`](Self::start).
#[derive(Debug, Clone, Default)]
pub struct DownloadEngine {
    config: EngineConfig,
}

impl DownloadEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run `task` to a terminal state, blocking the calling thread.
    ///
    /// Returns `None` when the run stops without a terminal state: the task
    /// was paused, or it was not `pending` when the run began. Otherwise the
    /// outcome is returned and also passed to `observer.on_complete`.
    pub fn start(
        &self,
        task: &DownloadTask,
        observer: &dyn DownloadObserver,
    ) -> Option<DownloadOutcome> {
        let _run = task.lock_run();

        if task.is_cancelled() {
            return Some(self.report_cancelled(task, observer));
        }

        let epoch = task.epoch();
        let offset = existing_size(task.destination());
        if !task.begin_run(offset) {
            debug!(download_id = task.id(), state = %task.state(), "Task not pending, skipping run");
            return None;
        }

        info!(
            download_id = task.id(),
            url = %task.url(),
            mirrors = task.mirrors().len(),
            offset,
            "Starting download"
        );
        observer.on_progress(DownloadState::Downloading, &task.progress());

        let already_complete = matches!(task.expected_size(), Some(total) if offset >= total);
        if already_complete {
            info!(download_id = task.id(), bytes = offset, "Destination already complete");
        } else {
            match self.transfer(task, epoch, observer) {
                RunEnd::Finished => {}
                RunEnd::Paused => {
                    info!(download_id = task.id(), bytes = task.progress().downloaded_bytes, "Download paused");
                    return None;
                }
                RunEnd::Cancelled => return Some(self.report_cancelled(task, observer)),
                RunEnd::Failed(message) => {
                    return Some(self.report_failed(
                        task,
                        message,
                        VerificationStatus::Unchecked,
                        observer,
                    ))
                }
            }
        }

        self.verify(task, observer)
    }

    /// Pause a downloading task. The worker stops after its current chunk.
    pub fn pause(&self, task: &DownloadTask) -> bool {
        let paused = task.request_pause();
        if paused {
            info!(download_id = task.id(), "Pause requested");
        }
        paused
    }

    /// Make a paused task runnable again without starting it.
    ///
    /// Used by callers that run [`start`](Self::start) on their own thread.
    pub fn prepare_resume(&self, task: &DownloadTask) -> bool {
        task.transition(DownloadState::Paused, DownloadState::Pending)
    }

    /// Resume a paused task on the calling thread.
    pub fn resume(
        &self,
        task: &DownloadTask,
        observer: &dyn DownloadObserver,
    ) -> Option<DownloadOutcome> {
        if !self.prepare_resume(task) {
            return None;
        }
        self.start(task, observer)
    }

    /// Cancel a pending, downloading or paused task.
    ///
    /// Cooperative: a running worker notices between chunks.
    pub fn cancel(&self, task: &DownloadTask) -> bool {
        let cancelled = task.request_cancel();
        if cancelled {
            info!(download_id = task.id(), "Cancel requested");
        }
        cancelled
    }

    // =========================================================================
    // Transfer
    // =========================================================================

    fn transfer(&self, task: &DownloadTask, epoch: u64, observer: &dyn DownloadObserver) -> RunEnd {
        let client = match SourceClient::new(self.config.connect_timeout, self.config.attempt_timeout)
        {
            Ok(client) => client,
            Err(err) => return RunEnd::Failed(err.to_string()),
        };

        let offset = task.progress().downloaded_bytes;
        let mut writer = match open_destination(task.destination(), offset) {
            Ok(writer) => writer,
            Err(err) => {
                error!(download_id = task.id(), error = %err, "Cannot open destination");
                return RunEnd::Failed(err.to_string());
            }
        };

        let mut meter = TransferMeter::new(offset, self.config.progress_interval);
        let mut last_error = None;

        for url in task.sources() {
            match self.fetch(&client, task, url, &mut writer, &mut meter, epoch, observer) {
                Ok(end) => return end,
                Err(err) if err.is_source_error() => {
                    warn!(download_id = task.id(), url = %url, error = %err, "Source failed");
                    if let Err(source) = writer.flush() {
                        return RunEnd::Failed(write_failed(task.destination(), source).to_string());
                    }
                    last_error = Some(err);
                }
                Err(err) => {
                    error!(download_id = task.id(), error = %err, "Local I/O failure");
                    return RunEnd::Failed(err.to_string());
                }
            }

            if task.is_cancelled() {
                return RunEnd::Cancelled;
            }
            if task.epoch() != epoch {
                return RunEnd::Paused;
            }
        }

        RunEnd::Failed(match last_error {
            Some(err) => format!("All download sources failed. Last error: {}", err),
            None => "No download sources configured".to_string(),
        })
    }

    /// Stream one source into `writer`, continuing from the task's byte count.
    #[allow(clippy::too_many_arguments)]
    fn fetch(
        &self,
        client: &SourceClient,
        task: &DownloadTask,
        url: &str,
        writer: &mut BufWriter<File>,
        meter: &mut TransferMeter,
        epoch: u64,
        observer: &dyn DownloadObserver,
    ) -> DownloadResult<RunEnd> {
        let offset = task.progress().downloaded_bytes;
        let response = client.open(url, offset, task.headers())?;
        let status = response.status();

        if offset > 0 && status == StatusCode::RANGE_NOT_SATISFIABLE {
            info!(download_id = task.id(), url = %url, offset, "Range past end of source, local file complete");
            return Ok(RunEnd::Finished);
        }
        if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
            return Err(DownloadError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        // A source that ignores Range resends the whole body; drop what we have.
        let mut skip = 0u64;
        if status == StatusCode::PARTIAL_CONTENT {
            if let Some(range) = response.content_range() {
                if range.start != offset {
                    return Err(DownloadError::RangeMismatch {
                        url: url.to_string(),
                        requested: offset,
                        received: range.start,
                    });
                }
            }
        } else if offset > 0 {
            debug!(download_id = task.id(), url = %url, offset, "Source ignored range request");
            skip = offset;
        }

        if let Some(size) = response.resource_size(offset) {
            task.refine_total(size);
        }

        let mut body = response.into_inner();
        let mut buffer = vec![0u8; self.config.chunk_size];

        loop {
            let read = body.read(&mut buffer).map_err(|source| DownloadError::Transfer {
                url: url.to_string(),
                source,
            })?;
            if read == 0 {
                break;
            }

            let mut chunk = &buffer[..read];
            if skip > 0 {
                let dropped = skip.min(read as u64) as usize;
                skip -= dropped as u64;
                chunk = &chunk[dropped..];
            }

            if !chunk.is_empty() {
                writer
                    .write_all(chunk)
                    .map_err(|source| write_failed(task.destination(), source))?;
                task.add_downloaded(chunk.len() as u64);
            }

            if task.is_cancelled() {
                return Ok(RunEnd::Cancelled);
            }
            if task.epoch() != epoch {
                writer
                    .flush()
                    .map_err(|source| write_failed(task.destination(), source))?;
                return Ok(RunEnd::Paused);
            }

            let now = Instant::now();
            if meter.should_report(now) {
                let current = task.progress();
                let (speed, eta) = meter.rate(current.downloaded_bytes, current.total_bytes, now);
                let progress = task.set_rate(speed, eta);
                observer.on_progress(DownloadState::Downloading, &progress);
            }
        }

        if skip > 0 {
            return Err(DownloadError::ShortBody {
                url: url.to_string(),
                offset,
            });
        }

        writer
            .flush()
            .map_err(|source| write_failed(task.destination(), source))?;
        Ok(RunEnd::Finished)
    }

    // =========================================================================
    // Verification and terminal reporting
    // =========================================================================

    fn verify(&self, task: &DownloadTask, observer: &dyn DownloadObserver) -> Option<DownloadOutcome> {
        if !task.transition(DownloadState::Downloading, DownloadState::Verifying) {
            return task
                .is_cancelled()
                .then(|| self.report_cancelled(task, observer));
        }
        observer.on_progress(DownloadState::Verifying, &task.progress());

        let path = task.destination();
        let verified = match task.checksum().filter(|c| !c.is_placeholder()) {
            None => {
                debug!(download_id = task.id(), "No usable checksum, skipping verification");
                VerificationStatus::Unchecked
            }
            Some(checksum) => match checksum.verify_file(path) {
                Ok(Ok(())) => {
                    debug!(download_id = task.id(), algorithm = %checksum.algorithm, "Checksum verified");
                    VerificationStatus::Passed
                }
                Ok(Err(actual)) => {
                    warn!(
                        download_id = task.id(),
                        algorithm = %checksum.algorithm,
                        expected = %checksum.expected,
                        actual = %actual,
                        "Checksum mismatch"
                    );
                    return Some(self.report_failed(
                        task,
                        CHECKSUM_FAILED_MESSAGE.to_string(),
                        VerificationStatus::Failed,
                        observer,
                    ));
                }
                Err(err) => {
                    return Some(self.report_failed(
                        task,
                        err.to_string(),
                        VerificationStatus::Unchecked,
                        observer,
                    ))
                }
            },
        };

        let size = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(source) => {
                let err = DownloadError::ReadFailed {
                    path: path.to_path_buf(),
                    source,
                };
                return Some(self.report_failed(task, err.to_string(), verified, observer));
            }
        };

        let progress = task.finish_completed(size)?;
        info!(download_id = task.id(), bytes = size, verified = ?verified, "Download completed");

        let outcome = DownloadOutcome {
            state: DownloadState::Completed,
            progress,
            error: None,
            checksum_verified: verified,
        };
        observer.on_complete(&outcome);
        Some(outcome)
    }

    fn report_failed(
        &self,
        task: &DownloadTask,
        message: String,
        verified: VerificationStatus,
        observer: &dyn DownloadObserver,
    ) -> DownloadOutcome {
        let Some(progress) = task.finish_failed(message.clone()) else {
            return self.report_cancelled(task, observer);
        };
        warn!(download_id = task.id(), error = %message, "Download failed");

        let outcome = DownloadOutcome {
            state: DownloadState::Failed,
            progress,
            error: Some(message),
            checksum_verified: verified,
        };
        observer.on_complete(&outcome);
        outcome
    }

    fn report_cancelled(&self, task: &DownloadTask, observer: &dyn DownloadObserver) -> DownloadOutcome {
        info!(download_id = task.id(), "Download cancelled");
        let outcome = DownloadOutcome {
            state: DownloadState::Cancelled,
            progress: task.progress(),
            error: None,
            checksum_verified: VerificationStatus::Unchecked,
        };
        observer.on_complete(&outcome);
        outcome
    }
}

fn existing_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

fn write_failed(path: &Path, source: std::io::Error) -> DownloadError {
    DownloadError::WriteFailed {
        path: path.to_path_buf(),
        source,
    }
}

/// Open the destination for appending at `offset`, or truncate when `offset` is 0.
fn open_destination(path: &Path, offset: u64) -> DownloadResult<BufWriter<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| write_failed(parent, source))?;
    }

    let file = if offset > 0 {
        OpenOptions::new().append(true).open(path)
    } else {
        File::create(path)
    }
    .map_err(|source| write_failed(path, source))?;

    Ok(BufWriter::with_capacity(DEFAULT_CHUNK_SIZE, file))
}
