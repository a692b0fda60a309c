//! Async bridge between the server and the blocking download engine.

mod config;
mod download;
mod error;
mod pump;

pub use config::{ServiceConfig, DEFAULT_EVENT_CAPACITY, DEFAULT_PERSIST_STEP};
pub use download::{DownloadService, DownloadStats};
pub use error::{ServiceError, ServiceResult};
