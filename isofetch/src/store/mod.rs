//! Durable checkpoint records.
//!
//! Each download has exactly one [`DownloadRecord`]. Writers replace the
//! whole record, so a concurrent reader sees either the old or the new
//! version, never a mix.
//!
//! Two backends:
//! - [`JsonFileStore`] - one JSON document per id, survives restarts
//! - [`MemoryStore`] - process-local, for tests and throwaway servers

mod error;
mod json;
mod memory;
mod record;

pub use error::{StoreError, StoreResult};
pub use json::JsonFileStore;
pub use memory::MemoryStore;
pub use record::{DownloadRecord, NewRecord, SourceDescriptor};

#[cfg(test)]
pub(crate) use memory::tests::new_record as test_record;

use crate::download::DownloadState;

/// Storage for checkpoint records.
///
/// Operations are synchronous and short. Async callers run them on the
/// blocking pool.
pub trait CheckpointStore: Send + Sync {
    /// Insert a new `pending` record and assign its id.
    fn create(&self, new: NewRecord) -> StoreResult<DownloadRecord>;

    /// Fetch one record.
    fn get(&self, id: u64) -> StoreResult<DownloadRecord>;

    /// Replace an existing record.
    fn update(&self, record: &DownloadRecord) -> StoreResult<()>;

    /// All records, newest first, optionally restricted to one state.
    fn list(&self, state: Option<DownloadState>) -> StoreResult<Vec<DownloadRecord>>;

    /// Remove one record.
    fn delete(&self, id: u64) -> StoreResult<()>;

    /// Remove every record in one of `states`; returns the number removed.
    fn delete_in_states(&self, states: &[DownloadState]) -> StoreResult<usize>;
}

/// Newest first, ties broken by id.
pub(crate) fn sort_newest_first(records: &mut [DownloadRecord]) {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}
