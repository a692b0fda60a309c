//! Catalog entries as handed to the download service.
//!
//! The catalog itself (static lists, scrapers, admin overrides) lives outside
//! this crate. An entry is the resolved description of one image: where to
//! get it, how big it is, and how to check it.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::download::{Checksum, DownloadResult};

/// Operating system family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsCategory {
    Windows,
    Linux,
    Macos,
    Bsd,
    Other,
}

impl OsCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Windows => "windows",
            Self::Linux => "linux",
            Self::Macos => "macos",
            Self::Bsd => "bsd",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for OsCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CPU architecture of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    X64,
    X86,
    Arm64,
    Arm,
    Riscv64,
    Universal,
}

impl Architecture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::X64 => "x64",
            Self::X86 => "x86",
            Self::Arm64 => "arm64",
            Self::Arm => "arm",
            Self::Riscv64 => "riscv64",
            Self::Universal => "universal",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_language() -> String {
    "en-US".to_string()
}

/// A resolved catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub version: String,
    pub category: OsCategory,
    pub architecture: Architecture,
    #[serde(default = "default_language")]
    pub language: String,
    /// Primary source.
    pub url: String,
    /// Alternate sources, tried in order.
    #[serde(default)]
    pub mirrors: Vec<String>,
    /// Declared size in bytes.
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub checksum_type: Option<String>,
    /// Extra request headers some sources require (referer, cookies).
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl CatalogEntry {
    /// Output file name: `{category}-{name}-{version}-{arch}-{lang}.iso`.
    ///
    /// Name, version and language come from clients, so every character
    /// outside `[a-z0-9_]` becomes `-`. The result is a single path component.
    pub fn output_filename(&self) -> String {
        let name = filename_part(&self.name);
        let version = filename_part(&self.version);
        let language = filename_part(&self.language.replace('-', ""));
        format!(
            "{}-{}-{}-{}-{}.iso",
            self.category, name, version, self.architecture, language
        )
    }

    /// Declared checksum, if any.
    ///
    /// # Errors
    ///
    /// Fails when a checksum is given with an unsupported algorithm.
    pub fn checksum(&self) -> DownloadResult<Option<Checksum>> {
        Checksum::from_parts(self.checksum.as_deref(), self.checksum_type.as_deref())
    }

    pub fn header_pairs(&self) -> Vec<(String, String)> {
        self.headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

fn filename_part(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '_' => c,
            _ => '-',
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn entry(url: &str) -> CatalogEntry {
        CatalogEntry {
            name: "Ubuntu Server".to_string(),
            version: "24.04.1 LTS".to_string(),
            category: OsCategory::Linux,
            architecture: Architecture::X64,
            language: "en-US".to_string(),
            url: url.to_string(),
            mirrors: Vec::new(),
            size: None,
            checksum: None,
            checksum_type: None,
            headers: BTreeMap::new(),
        }
    }

    #[test]
    fn test_output_filename() {
        assert_eq!(
            entry("http://x").output_filename(),
            "linux-ubuntu-server-24-04-1-lts-x64-enus.iso"
        );
    }

    #[test]
    fn test_output_filename_cannot_leave_directory() {
        use std::path::{Component, Path};

        let mut e = entry("http://x");
        e.name = "x/../../../../tmp/pwned".to_string();
        e.version = "..".to_string();
        e.language = "..\\..".to_string();

        let filename = e.output_filename();
        assert!(!filename.contains('/'));
        assert!(!filename.contains('\\'));
        assert!(!filename.contains(".."));

        let components: Vec<_> = Path::new(&filename).components().collect();
        assert_eq!(components.len(), 1);
        assert!(matches!(components[0], Component::Normal(_)));
        assert_eq!(
            Path::new("/srv/isos").join(&filename).parent(),
            Some(Path::new("/srv/isos"))
        );
    }

    #[test]
    fn test_deserialize_minimal_entry() {
        let json = r#"{
            "name": "FreeBSD", "version": "14.1", "category": "bsd",
            "architecture": "arm64", "url": "http://example.org/fbsd.iso"
        }"#;
        let entry: CatalogEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.language, "en-US");
        assert!(entry.mirrors.is_empty());
        assert_eq!(entry.output_filename(), "bsd-freebsd-14-1-arm64-enus.iso");
    }

    #[test]
    fn test_unknown_category_rejected() {
        let json = r#"{"name":"x","version":"1","category":"plan9","architecture":"x64","url":"u"}"#;
        assert!(serde_json::from_str::<CatalogEntry>(json).is_err());
    }

    #[test]
    fn test_checksum_resolution() {
        let mut e = entry("http://x");
        assert!(e.checksum().unwrap().is_none());

        e.checksum = Some("ABCDEF".to_string());
        e.checksum_type = Some("sha1".to_string());
        let checksum = e.checksum().unwrap().unwrap();
        assert_eq!(checksum.algorithm.as_str(), "sha1");

        e.checksum_type = Some("blake3".to_string());
        assert!(e.checksum().is_err());
    }
}
