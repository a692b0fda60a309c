//! Shared command setup: configuration loading and logging.

use std::path::{Path, PathBuf};

use isofetch::config::{config_file_path, ConfigFile};
use isofetch::logging::{init_logging, LoggingGuard};
use tracing::info;

use crate::error::CliError;

/// Loaded configuration plus the logging guard for one command invocation.
pub struct CliRunner {
    config: ConfigFile,
    config_path: PathBuf,
    _logging: LoggingGuard,
}

impl CliRunner {
    /// Load `config_path` (or the default location) and install logging.
    pub fn new(config_path: Option<&Path>) -> Result<Self, CliError> {
        let config_path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(config_file_path);
        let config = ConfigFile::load(&config_path)?;
        let logging = init_logging(&config.logging_config())?;

        Ok(Self {
            config,
            config_path,
            _logging: logging,
        })
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    pub fn log_startup(&self, command: &str) {
        info!(
            version = isofetch::VERSION,
            command,
            config = %self.config_path.display(),
            "isofetch starting"
        );
    }
}
