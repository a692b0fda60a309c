//! The durable checkpoint record.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{Architecture, CatalogEntry, OsCategory};
use crate::download::{DownloadProgress, DownloadState, VerificationStatus};

/// What is being downloaded, copied from the catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub name: String,
    pub version: String,
    pub category: OsCategory,
    pub architecture: Architecture,
    pub language: String,
}

impl From<&CatalogEntry> for SourceDescriptor {
    fn from(entry: &CatalogEntry) -> Self {
        Self {
            name: entry.name.clone(),
            version: entry.version.clone(),
            category: entry.category,
            architecture: entry.architecture,
            language: entry.language.clone(),
        }
    }
}

/// Fields supplied when a record is created. The store assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub source: SourceDescriptor,
    pub url: String,
    pub output_path: PathBuf,
    pub total_bytes: u64,
    pub checksum: Option<String>,
    pub checksum_type: Option<String>,
}

/// One download's durable state. Always written as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub id: u64,
    pub source: SourceDescriptor,
    pub url: String,
    pub output_path: PathBuf,
    pub state: DownloadState,
    /// Percentage in `0.0..=100.0`.
    pub progress: f64,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    /// Bytes per second.
    pub speed: f64,
    /// Seconds remaining.
    pub eta: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub checksum: Option<String>,
    pub checksum_type: Option<String>,
    pub checksum_verified: VerificationStatus,
}

impl DownloadRecord {
    /// A fresh `pending` record.
    pub fn new(id: u64, new: NewRecord) -> Self {
        Self {
            id,
            source: new.source,
            url: new.url,
            output_path: new.output_path,
            state: DownloadState::Pending,
            progress: 0.0,
            downloaded_bytes: 0,
            total_bytes: new.total_bytes,
            speed: 0.0,
            eta: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            checksum: new.checksum,
            checksum_type: new.checksum_type,
            checksum_verified: VerificationStatus::Unchecked,
        }
    }

    /// Copy byte counters and rate from a progress snapshot.
    pub fn apply_progress(&mut self, progress: &DownloadProgress) {
        self.downloaded_bytes = progress.downloaded_bytes;
        self.total_bytes = progress.total_bytes;
        self.progress = progress.percentage();
        self.speed = progress.speed;
        self.eta = progress.eta_secs;
    }

    /// File name for attachments; `download.iso` when the path has none.
    pub fn filename(&self) -> String {
        self.output_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "download.iso".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_record() -> NewRecord {
        NewRecord {
            source: SourceDescriptor {
                name: "Debian".into(),
                version: "12".into(),
                category: OsCategory::Linux,
                architecture: Architecture::Arm64,
                language: "en-US".into(),
            },
            url: "http://example.org/debian.iso".into(),
            output_path: PathBuf::from("/data/linux-debian-12-arm64-enus.iso"),
            total_bytes: 2048,
            checksum: None,
            checksum_type: None,
        }
    }

    #[test]
    fn test_new_record_is_pending() {
        let record = DownloadRecord::new(3, new_record());
        assert_eq!(record.state, DownloadState::Pending);
        assert_eq!(record.total_bytes, 2048);
        assert_eq!(record.checksum_verified, VerificationStatus::Unchecked);
    }

    #[test]
    fn test_apply_progress() {
        let mut record = DownloadRecord::new(3, new_record());
        record.apply_progress(&DownloadProgress {
            downloaded_bytes: 512,
            total_bytes: 2048,
            speed: 100.0,
            eta_secs: 15,
        });
        assert_eq!(record.progress, 25.0);
        assert_eq!(record.eta, 15);
    }

    #[test]
    fn test_filename() {
        let mut record = DownloadRecord::new(3, new_record());
        assert_eq!(record.filename(), "linux-debian-12-arm64-enus.iso");
        record.output_path = PathBuf::new();
        assert_eq!(record.filename(), "download.iso");
    }

    #[test]
    fn test_state_stored_as_text() {
        let record = DownloadRecord::new(3, new_record());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["state"], "pending");
        assert_eq!(json["checksum_verified"], "unchecked");

        let mut tampered = json.clone();
        tampered["state"] = "stalled".into();
        assert!(serde_json::from_value::<DownloadRecord>(tampered).is_err());
    }
}
