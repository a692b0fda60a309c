//! Checksum calculation for downloaded images.
//!
//! Catalog entries declare a digest in one of four algorithms. Some catalogs
//! publish all-zero placeholders for images whose digest is unknown; those
//! are detected with [`Checksum::is_placeholder`] and never verified.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

use super::error::{DownloadError, DownloadResult};

/// Buffer size for reading files during checksum calculation (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Prefix that marks a catalog checksum as a placeholder.
const PLACEHOLDER_PREFIX: &str = "00000000";

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Sha256,
    Sha1,
    Sha512,
    Md5,
}

impl ChecksumAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha1 => "sha1",
            Self::Sha512 => "sha512",
            Self::Md5 => "md5",
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = DownloadError;

    /// Accepts `sha256`, `SHA-256`, `sha_256` and similar spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();

        match normalized.as_str() {
            "sha256" => Ok(Self::Sha256),
            "sha1" => Ok(Self::Sha1),
            "sha512" => Ok(Self::Sha512),
            "md5" => Ok(Self::Md5),
            _ => Err(DownloadError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

/// Outcome of checksum verification, persisted with the download record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    /// No usable checksum, or verification has not run yet.
    #[default]
    Unchecked,
    Passed,
    Failed,
}

/// An expected digest together with its algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    pub algorithm: ChecksumAlgorithm,
    pub expected: String,
}

impl Checksum {
    pub fn new(algorithm: ChecksumAlgorithm, expected: impl Into<String>) -> Self {
        Self {
            algorithm,
            expected: expected.into().trim().to_string(),
        }
    }

    /// Build from catalog fields. The algorithm defaults to sha256 when only
    /// a digest is given. Empty digests yield `None`.
    pub fn from_parts(
        expected: Option<&str>,
        algorithm: Option<&str>,
    ) -> DownloadResult<Option<Self>> {
        let Some(expected) = expected.map(str::trim).filter(|e| !e.is_empty()) else {
            return Ok(None);
        };
        let algorithm = match algorithm.map(str::trim).filter(|a| !a.is_empty()) {
            Some(name) => name.parse()?,
            None => ChecksumAlgorithm::Sha256,
        };
        Ok(Some(Self::new(algorithm, expected)))
    }

    /// Whether the digest is a catalog placeholder rather than a real value.
    pub fn is_placeholder(&self) -> bool {
        self.expected.starts_with(PLACEHOLDER_PREFIX)
    }

    /// Case-insensitive comparison against a computed digest.
    pub fn matches(&self, actual: &str) -> bool {
        self.expected.eq_ignore_ascii_case(actual)
    }

    /// Hash `path` and compare. Returns the computed digest on mismatch.
    pub fn verify_file(&self, path: &Path) -> DownloadResult<Result<(), String>> {
        let actual = calculate_file_checksum(path, self.algorithm)?;
        if self.matches(&actual) {
            Ok(Ok(()))
        } else {
            Ok(Err(actual))
        }
    }
}

/// Calculate the lowercase hexadecimal digest of a file.
///
/// # Errors
///
/// Returns [`DownloadError::ReadFailed`] if the file cannot be read.
pub fn calculate_file_checksum(path: &Path, algorithm: ChecksumAlgorithm) -> DownloadResult<String> {
    match algorithm {
        ChecksumAlgorithm::Sha256 => digest_file::<Sha256>(path),
        ChecksumAlgorithm::Sha1 => digest_file::<Sha1>(path),
        ChecksumAlgorithm::Sha512 => digest_file::<Sha512>(path),
        ChecksumAlgorithm::Md5 => digest_file::<Md5>(path),
    }
}

fn digest_file<D: Digest>(path: &Path) -> DownloadResult<String> {
    let read_failed = |source| DownloadError::ReadFailed {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(read_failed)?;
    let mut hasher = D::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer).map_err(read_failed)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher
        .finalize()
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect())
}
