//! Range-aware re-streaming of source resources.
//!
//! The gateway lets an external download manager fetch an image through
//! this server and resume it with its own `Range` requests. It shares the
//! range-forwarding approach of the engine but nothing else: no records,
//! no local files, no checksum.
//!
//! ```text
//!  client ──GET, Range: bytes=N-──► ProxyGateway ──GET, Range: bytes=N-──► source
//!  client ◄──206, 1MB chunks────── ProxyGateway ◄──206 body stream──────── source
//! ```

mod error;
mod gateway;

pub use error::ProxyError;
pub use gateway::{
    decode_source_url, filename_from_url, ProxyConfig, ProxyGateway, ProxySource,
    DEFAULT_PROXY_CHUNK_SIZE, DEFAULT_PROXY_TIMEOUT_SECS,
};
