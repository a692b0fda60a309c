//! CLI error type.

use isofetch::config::ConfigError;
use isofetch::download::DownloadError;
use isofetch::logging::LoggingError;
use isofetch::proxy::ProxyError;
use isofetch::service::ServiceError;
use isofetch::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    ConfigFile(#[from] ConfigError),

    #[error("Failed to initialise logging: {0}")]
    Logging(#[from] LoggingError),

    #[error("Failed to open download state: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("Failed to create proxy client: {0}")]
    Proxy(#[from] ProxyError),

    #[error("Invalid download: {0}")]
    Download(#[from] DownloadError),

    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),

    #[error("Download {state}: {message}")]
    DownloadFailed { state: String, message: String },
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) | CliError::ConfigFile(_) => 2,
            CliError::DownloadFailed { .. } => 3,
            _ => 1,
        }
    }
}
