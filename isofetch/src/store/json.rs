//! Checkpoint records as JSON documents on disk.
//!
//! ```text
//! <root>/
//! ├── next_id          # last assigned id
//! └── records/
//!     ├── 1.json
//!     └── 2.json
//! ```
//!
//! Writes go to a temporary file that is renamed over the target, so
//! readers never observe a half-written record.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{
    sort_newest_first, CheckpointStore, DownloadRecord, NewRecord, StoreError, StoreResult,
};
use crate::download::DownloadState;

const RECORDS_DIR: &str = "records";
const COUNTER_FILE: &str = "next_id";

/// File-backed checkpoint store.
#[derive(Debug)]
pub struct JsonFileStore {
    root: PathBuf,
    records: PathBuf,
    /// Serializes writers; readers rely on atomic renames instead.
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        let records = root.join(RECORDS_DIR);
        fs::create_dir_all(&records).map_err(|source| io_error(&records, source))?;
        debug!(path = %root.display(), "Opened checkpoint store");

        Ok(Self {
            root,
            records,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, id: u64) -> PathBuf {
        self.records.join(format!("{}.json", id))
    }

    fn next_id(&self) -> StoreResult<u64> {
        let path = self.root.join(COUNTER_FILE);
        let last = match fs::read_to_string(&path) {
            Ok(text) => text.trim().parse::<u64>().unwrap_or(0),
            Err(err) if err.kind() == ErrorKind::NotFound => 0,
            Err(source) => return Err(io_error(&path, source)),
        };

        // Never reuse an id still present on disk, even if the counter was lost.
        let highest_on_disk = self.ids()?.into_iter().max().unwrap_or(0);
        let id = last.max(highest_on_disk) + 1;
        write_atomic(&path, id.to_string().as_bytes())?;
        Ok(id)
    }

    fn ids(&self) -> StoreResult<Vec<u64>> {
        let entries = fs::read_dir(&self.records).map_err(|source| io_error(&self.records, source))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| io_error(&self.records, source))?;
            let name = entry.file_name();
            if let Some(id) = name
                .to_str()
                .and_then(|n| n.strip_suffix(".json"))
                .and_then(|n| n.parse::<u64>().ok())
            {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    fn read(&self, id: u64) -> StoreResult<DownloadRecord> {
        let path = self.record_path(id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Err(StoreError::NotFound(id)),
            Err(source) => return Err(io_error(&path, source)),
        };
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt { path, source })
    }

    fn write(&self, record: &DownloadRecord) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(record).map_err(|source| StoreError::Encode {
            id: record.id,
            source,
        })?;
        write_atomic(&self.record_path(record.id), &bytes)
    }
}

impl CheckpointStore for JsonFileStore {
    fn create(&self, new: NewRecord) -> StoreResult<DownloadRecord> {
        let _guard = self.write_lock.lock();
        let record = DownloadRecord::new(self.next_id()?, new);
        self.write(&record)?;
        Ok(record)
    }

    fn get(&self, id: u64) -> StoreResult<DownloadRecord> {
        self.read(id)
    }

    fn update(&self, record: &DownloadRecord) -> StoreResult<()> {
        let _guard = self.write_lock.lock();
        if !self.record_path(record.id).exists() {
            return Err(StoreError::NotFound(record.id));
        }
        self.write(record)
    }

    fn list(&self, state: Option<DownloadState>) -> StoreResult<Vec<DownloadRecord>> {
        let mut records = Vec::new();
        for id in self.ids()? {
            match self.read(id) {
                Ok(record) if state.map_or(true, |s| record.state == s) => records.push(record),
                Ok(_) => {}
                // Deleted between listing and reading.
                Err(StoreError::NotFound(_)) => {}
                Err(err @ StoreError::Corrupt { .. }) => {
                    warn!(download_id = id, error = %err, "Skipping unreadable record");
                }
                Err(err) => return Err(err),
            }
        }
        sort_newest_first(&mut records);
        Ok(records)
    }

    fn delete(&self, id: u64) -> StoreResult<()> {
        let _guard = self.write_lock.lock();
        let path = self.record_path(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(id)),
            Err(source) => Err(io_error(&path, source)),
        }
    }

    fn delete_in_states(&self, states: &[DownloadState]) -> StoreResult<usize> {
        let _guard = self.write_lock.lock();
        let mut removed = 0;
        for id in self.ids()? {
            let Ok(record) = self.read(id) else {
                continue;
            };
            if states.contains(&record.state) {
                let path = self.record_path(id);
                fs::remove_file(&path).map_err(|source| io_error(&path, source))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).map_err(|source| io_error(&tmp, source))?;
    fs::rename(&tmp, path).map_err(|source| io_error(path, source))
}
