//! isofetch - resumable, mirror-aware downloads of operating system images.
//!
//! The crate is organised around a blocking [`download::DownloadEngine`] that
//! runs one transfer per worker thread, and an async [`service::DownloadService`]
//! that owns the engine from inside a tokio runtime:
//!
//! ```text
//!   HTTP / WebSocket (server)
//!            │
//!            ▼
//!   DownloadService ──► CheckpointStore (durable records)
//!      │        ▲
//!      │        │ DownloadEvent (bounded mpsc)
//!      ▼        │
//!   worker thread: DownloadEngine ──► source / mirrors
//!            │
//!            ▼
//!   ProgressBroadcaster ──► subscribers
//! ```
//!
//! The [`proxy::ProxyGateway`] is an independent request path that re-streams
//! a source to external download managers with byte-range support.

pub mod broadcast;
pub mod catalog;
pub mod config;
pub mod download;
pub mod format;
pub mod logging;
pub mod proxy;
pub mod server;
pub mod service;
pub mod store;

/// Crate version, as reported by the health endpoint and the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
