use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for checkpoint storage.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by a [`CheckpointStore`](super::CheckpointStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record with this id.
    #[error("download {0} not found")]
    NotFound(u64),

    /// I/O failure on the backing directory.
    #[error("storage I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A stored document could not be decoded (includes unknown state text).
    #[error("corrupt record at {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode record {id}: {source}")]
    Encode {
        id: u64,
        #[source]
        source: serde_json::Error,
    },
}
