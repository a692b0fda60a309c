use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::download::{DownloadError, DownloadState};
use crate::store::StoreError;

/// Result type for download service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors surfaced to callers of the download service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// No record with this id exists.
    #[error("download {0} not found")]
    NotFound(u64),

    /// The id exists but the operation does not apply to its current state.
    #[error("cannot {operation} download {id} while {state}")]
    InvalidState {
        id: u64,
        state: DownloadState,
        operation: &'static str,
    },

    /// The download exists but is not running in this process.
    #[error("download {id} is not active (last known state: {state})")]
    NotActive { id: u64, state: DownloadState },

    /// Another live download already writes to the same destination.
    #[error("download {existing} is already writing {}", path.display())]
    AlreadyActive { existing: u64, path: PathBuf },

    /// The destination resolved outside the download directory.
    #[error("refusing to write outside the download directory: {}", .0.display())]
    UnsafeDestination(PathBuf),

    /// The request could not be turned into a download.
    #[error("invalid download request: {0}")]
    InvalidRequest(#[from] DownloadError),

    /// Checkpoint storage failed.
    #[error(transparent)]
    Store(StoreError),

    /// A worker thread could not be started.
    #[error("failed to spawn download worker: {0}")]
    Spawn(#[source] io::Error),

    /// A blocking storage call was aborted.
    #[error("storage task failed: {0}")]
    Join(String),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(id),
            other => Self::Store(other),
        }
    }
}
