use std::collections::BTreeMap;

use parking_lot::Mutex;

use super::{
    sort_newest_first, CheckpointStore, DownloadRecord, NewRecord, StoreError, StoreResult,
};
use crate::download::DownloadState;

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    records: BTreeMap<u64, DownloadRecord>,
}

/// In-memory checkpoint store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryStore {
    fn create(&self, new: NewRecord) -> StoreResult<DownloadRecord> {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let record = DownloadRecord::new(inner.next_id, new);
        inner.records.insert(record.id, record.clone());
        Ok(record)
    }

    fn get(&self, id: u64) -> StoreResult<DownloadRecord> {
        self.inner
            .lock()
            .records
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    fn update(&self, record: &DownloadRecord) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        match inner.records.get_mut(&record.id) {
            Some(slot) => {
                *slot = record.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(record.id)),
        }
    }

    fn list(&self, state: Option<DownloadState>) -> StoreResult<Vec<DownloadRecord>> {
        let mut records: Vec<_> = self
            .inner
            .lock()
            .records
            .values()
            .filter(|r| state.map_or(true, |s| r.state == s))
            .cloned()
            .collect();
        sort_newest_first(&mut records);
        Ok(records)
    }

    fn delete(&self, id: u64) -> StoreResult<()> {
        self.inner
            .lock()
            .records
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }

    fn delete_in_states(&self, states: &[DownloadState]) -> StoreResult<usize> {
        let mut inner = self.inner.lock();
        let before = inner.records.len();
        inner.records.retain(|_, r| !states.contains(&r.state));
        Ok(before - inner.records.len())
    }
}
