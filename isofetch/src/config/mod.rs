//! Configuration file handling.
//!
//! Settings live in `~/.isofetch/config.ini`:
//!
//! ```ini
//! [server]
//! bind = 127.0.0.1:8000
//!
//! [downloads]
//! directory = ~/Downloads/ISOs
//! state_dir = ~/.isofetch/state
//! connect_timeout = 30
//! attempt_timeout = 3600
//! persist_step = 10
//! progress_interval_ms = 500
//!
//! [proxy]
//! timeout = 300
//! chunk_size = 1048576
//!
//! [logging]
//! level = info
//! directory = ~/.isofetch/logs
//! ```
//!
//! A missing file yields defaults. Unknown keys are ignored.

mod file;

pub use file::{
    config_directory, config_file_path, ConfigError, ConfigFile, ConfigResult, DownloadsSettings,
    LoggingSettings, ProxySettings, ServerSettings,
};
