//! Error types for the download engine.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for engine operations.
pub type DownloadResult<T> = Result<T, DownloadError>;

/// Errors raised while transferring or verifying a file.
///
/// Source errors are recoverable by moving on to the next mirror; local
/// errors end the download immediately. See [`DownloadError::is_source_error`].
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    /// Connection, TLS or timeout failure talking to a source.
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The source answered with a status other than 200 or 206.
    #[error("{url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    /// A partial response did not start at the requested offset.
    #[error("{url} answered a range request for offset {requested} with offset {received}")]
    RangeMismatch {
        url: String,
        requested: u64,
        received: u64,
    },

    /// The body stream broke off mid-transfer.
    #[error("transfer from {url} interrupted: {source}")]
    Transfer {
        url: String,
        #[source]
        source: io::Error,
    },

    /// The source sent fewer bytes than the local file already holds.
    #[error("{url} ended before reaching resume offset {offset}")]
    ShortBody { url: String, offset: u64 },

    /// Writing the destination failed.
    #[error("failed to write {}: {source}", path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Reading the destination failed.
    #[error("failed to read {}: {source}", path.display())]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Checksum algorithm name not recognised.
    #[error("unsupported checksum algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

impl DownloadError {
    /// Whether this failure belongs to the source and another mirror may succeed.
    pub fn is_source_error(&self) -> bool {
        matches!(
            self,
            Self::Request { .. }
                | Self::HttpStatus { .. }
                | Self::RangeMismatch { .. }
                | Self::Transfer { .. }
                | Self::ShortBody { .. }
        )
    }
}
