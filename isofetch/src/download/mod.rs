//! Resumable, mirror-aware download engine.
//!
//! - [`DownloadTask`] - what to fetch and its live state
//! - [`DownloadEngine`] - blocking transfer, resume, mirror fallback, verification
//! - [`DownloadObserver`] - progress and completion notifications
//! - [`checksum`] - sha256 / sha1 / sha512 / md5 file digests

pub mod checksum;
mod engine;
mod error;
pub mod http;
mod progress;
mod state;
mod task;

pub use checksum::{Checksum, ChecksumAlgorithm, VerificationStatus};
pub use engine::{DownloadEngine, EngineConfig, CHECKSUM_FAILED_MESSAGE, DEFAULT_CHUNK_SIZE};
pub use error::{DownloadError, DownloadResult};
pub use progress::{
    DownloadObserver, DownloadOutcome, NoopObserver, TransferMeter, DEFAULT_PROGRESS_INTERVAL,
};
pub use state::{DownloadState, ParseStateError};
pub use task::{DownloadProgress, DownloadTask};
