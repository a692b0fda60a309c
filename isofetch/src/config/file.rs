use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use crate::download::{EngineConfig, DEFAULT_PROGRESS_INTERVAL};
use crate::download::http::{DEFAULT_ATTEMPT_TIMEOUT_SECS, DEFAULT_CONNECT_TIMEOUT_SECS};
use crate::logging::LoggingConfig;
use crate::proxy::{ProxyConfig, DEFAULT_PROXY_CHUNK_SIZE, DEFAULT_PROXY_TIMEOUT_SECS};
use crate::service::{ServiceConfig, DEFAULT_PERSIST_STEP};

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while reading or writing the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },

    #[error("failed to write config {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid value {value:?} for [{section}] {key}")]
    InvalidValue {
        section: &'static str,
        key: &'static str,
        value: String,
    },
}

/// `[server]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerSettings {
    pub bind: SocketAddr,
}

/// `[downloads]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadsSettings {
    pub directory: PathBuf,
    pub state_dir: PathBuf,
    pub connect_timeout_secs: u64,
    pub attempt_timeout_secs: u64,
    pub persist_step: f64,
    pub progress_interval_ms: u64,
}

/// `[proxy]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxySettings {
    pub timeout_secs: u64,
    pub chunk_size: usize,
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
    /// Enables the rolling log file when set.
    pub directory: Option<PathBuf>,
}

/// Parsed configuration file.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    pub server: ServerSettings,
    pub downloads: DownloadsSettings,
    pub proxy: ProxySettings,
    pub logging: LoggingSettings,
}

/// `~/.isofetch`.
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".isofetch")
}

/// `~/.isofetch/config.ini`.
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                bind: SocketAddr::from(([127, 0, 0, 1], 8000)),
            },
            downloads: DownloadsSettings {
                directory: ServiceConfig::default().download_dir,
                state_dir: config_directory().join("state"),
                connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
                attempt_timeout_secs: DEFAULT_ATTEMPT_TIMEOUT_SECS,
                persist_step: DEFAULT_PERSIST_STEP,
                progress_interval_ms: DEFAULT_PROGRESS_INTERVAL.as_millis() as u64,
            },
            proxy: ProxySettings {
                timeout_secs: DEFAULT_PROXY_TIMEOUT_SECS,
                chunk_size: DEFAULT_PROXY_CHUNK_SIZE,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
                directory: None,
            },
        }
    }
}

impl ConfigFile {
    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ini(&ini)
    }

    /// Load from the default location.
    pub fn load_default() -> ConfigResult<Self> {
        Self::load(&config_file_path())
    }

    fn from_ini(ini: &Ini) -> ConfigResult<Self> {
        let mut config = Self::default();
        let get = |section: &str, key: &str| {
            ini.section(Some(section))
                .and_then(|s| s.get(key))
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = get("server", "bind") {
            config.server.bind = parse("server", "bind", v)?;
        }

        if let Some(v) = get("downloads", "directory") {
            config.downloads.directory = expand_tilde(v);
        }
        if let Some(v) = get("downloads", "state_dir") {
            config.downloads.state_dir = expand_tilde(v);
        }
        if let Some(v) = get("downloads", "connect_timeout") {
            config.downloads.connect_timeout_secs = parse("downloads", "connect_timeout", v)?;
        }
        if let Some(v) = get("downloads", "attempt_timeout") {
            config.downloads.attempt_timeout_secs = parse("downloads", "attempt_timeout", v)?;
        }
        if let Some(v) = get("downloads", "persist_step") {
            let step: f64 = parse("downloads", "persist_step", v)?;
            if !(step > 0.0 && step <= 100.0) {
                return Err(invalid("downloads", "persist_step", v));
            }
            config.downloads.persist_step = step;
        }
        if let Some(v) = get("downloads", "progress_interval_ms") {
            config.downloads.progress_interval_ms = parse("downloads", "progress_interval_ms", v)?;
        }

        if let Some(v) = get("proxy", "timeout") {
            config.proxy.timeout_secs = parse("proxy", "timeout", v)?;
        }
        if let Some(v) = get("proxy", "chunk_size") {
            config.proxy.chunk_size = parse("proxy", "chunk_size", v)?;
        }

        if let Some(v) = get("logging", "level") {
            config.logging.level = v.to_string();
        }
        if let Some(v) = get("logging", "directory") {
            config.logging.directory = Some(expand_tilde(v));
        }

        Ok(config)
    }

    /// Write every setting to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let write_failed = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_failed)?;
        }

        let mut ini = Ini::new();
        ini.with_section(Some("server"))
            .set("bind", self.server.bind.to_string());
        ini.with_section(Some("downloads"))
            .set("directory", self.downloads.directory.display().to_string())
            .set("state_dir", self.downloads.state_dir.display().to_string())
            .set("connect_timeout", self.downloads.connect_timeout_secs.to_string())
            .set("attempt_timeout", self.downloads.attempt_timeout_secs.to_string())
            .set("persist_step", self.downloads.persist_step.to_string())
            .set("progress_interval_ms", self.downloads.progress_interval_ms.to_string());
        ini.with_section(Some("proxy"))
            .set("timeout", self.proxy.timeout_secs.to_string())
            .set("chunk_size", self.proxy.chunk_size.to_string());
        ini.with_section(Some("logging"))
            .set("level", self.logging.level.clone());
        if let Some(dir) = &self.logging.directory {
            ini.with_section(Some("logging"))
                .set("directory", dir.display().to_string());
        }

        ini.write_to_file(path).map_err(write_failed)
    }

    // =========================================================================
    // Conversions into component configs
    // =========================================================================

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_connect_timeout(Duration::from_secs(self.downloads.connect_timeout_secs))
            .with_attempt_timeout(Duration::from_secs(self.downloads.attempt_timeout_secs))
            .with_progress_interval(Duration::from_millis(self.downloads.progress_interval_ms))
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig::new(self.downloads.directory.clone())
            .with_persist_step(self.downloads.persist_step)
            .with_engine(self.engine_config())
    }

    pub fn proxy_config(&self) -> ProxyConfig {
        ProxyConfig::default()
            .with_connect_timeout(Duration::from_secs(self.proxy.timeout_secs))
            .with_chunk_size(self.proxy.chunk_size)
    }

    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig {
            level: self.logging.level.clone(),
            directory: self.logging.directory.clone(),
            ..LoggingConfig::default()
        }
    }
}

fn invalid(section: &'static str, key: &'static str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        section,
        key,
        value: value.to_string(),
    }
}

fn parse<T: FromStr>(section: &'static str, key: &'static str, value: &str) -> ConfigResult<T> {
    value.parse().map_err(|_| invalid(section, key, value))
}

fn expand_tilde(value: &str) -> PathBuf {
    match value.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(value)),
        None => PathBuf::from(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let config = ConfigFile::load(&temp.path().join("absent.ini")).unwrap();
        assert_eq!(config, ConfigFile::default());
        assert_eq!(config.server.bind.port(), 8000);
        assert_eq!(config.downloads.persist_step, 10.0);
    }

    #[test]
    fn test_load_overrides() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");
        fs::write(
            &path,
            "[server]\nbind = 0.0.0.0:9000\n\n[downloads]\ndirectory = /srv/isos\npersist_step = 5\nunknown = 1\n\n[proxy]\nchunk_size = 4096\n",
        )
        .unwrap();

        let config = ConfigFile::load(&path).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(config.downloads.directory, PathBuf::from("/srv/isos"));
        assert_eq!(config.downloads.persist_step, 5.0);
        assert_eq!(config.proxy.chunk_size, 4096);
        assert_eq!(config.service_config().persist_step, 5.0);
    }

    #[test]
    fn test_invalid_value() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");
        fs::write(&path, "[downloads]\nconnect_timeout = soon\n").unwrap();

        match ConfigFile::load(&path) {
            Err(ConfigError::InvalidValue { section, key, value }) => {
                assert_eq!(section, "downloads");
                assert_eq!(key, "connect_timeout");
                assert_eq!(value, "soon");
            }
            other => panic!("expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_persist_step_range() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");
        fs::write(&path, "[downloads]\npersist_step = 0\n").unwrap();
        assert!(matches!(
            ConfigFile::load(&path),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_save_and_reload() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.ini");

        let mut config = ConfigFile::default();
        config.downloads.directory = PathBuf::from("/data/isos");
        config.logging.directory = Some(PathBuf::from("/var/log/isofetch"));
        config.save(&path).unwrap();

        assert_eq!(ConfigFile::load(&path).unwrap(), config);
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde("/abs"), PathBuf::from("/abs"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/isos"), home.join("isos"));
        }
    }
}
