//! Blocking HTTP access to download sources.
//!
//! [`SourceClient`] wraps two reqwest clients: one verifying certificates and
//! one that does not. A request that fails on a TLS error is retried once,
//! against the same URL, with verification disabled; some archival mirrors
//! still serve expired or self-signed certificates.
//!
//! Blocking reqwest clients must be created and dropped outside of an async
//! context, so a `SourceClient` is built on the worker thread that uses it.

use std::error::Error as StdError;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::StatusCode;
use tracing::{debug, warn};

use super::error::{DownloadError, DownloadResult};

/// Default connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default limit for one attempt against one source, in seconds.
pub const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 60 * 60;

const USER_AGENT: &str = concat!("isofetch/", env!("CARGO_PKG_VERSION"));

/// HTTP client for fetching a source, optionally from a byte offset.
#[derive(Debug)]
pub struct SourceClient {
    secure: Client,
    insecure: Client,
}

impl SourceClient {
    /// Build both clients.
    pub fn new(connect_timeout: Duration, attempt_timeout: Duration) -> DownloadResult<Self> {
        let build = |accept_invalid: bool| {
            Client::builder()
                .user_agent(USER_AGENT)
                .connect_timeout(connect_timeout)
                .timeout(attempt_timeout)
                .danger_accept_invalid_certs(accept_invalid)
                .build()
                .map_err(DownloadError::ClientBuild)
        };

        Ok(Self {
            secure: build(false)?,
            insecure: build(true)?,
        })
    }

    /// Request `url` from `offset` to the end.
    ///
    /// Returns the response whatever its status; status handling belongs to
    /// the caller. Only transport failures are errors here.
    pub fn open(
        &self,
        url: &str,
        offset: u64,
        headers: &[(String, String)],
    ) -> DownloadResult<SourceResponse> {
        let response = match self.send(&self.secure, url, offset, headers) {
            Err(err) if is_tls_error(&err) => {
                warn!(url = %url, error = %err, "TLS failure, retrying without certificate verification");
                self.send(&self.insecure, url, offset, headers)
            }
            other => other,
        }
        .map_err(|source| DownloadError::Request {
            url: url.to_string(),
            source,
        })?;

        debug!(url = %url, offset, status = response.status().as_u16(), "Source responded");
        Ok(SourceResponse { response })
    }

    fn send(
        &self,
        client: &Client,
        url: &str,
        offset: u64,
        headers: &[(String, String)],
    ) -> reqwest::Result<Response> {
        let mut request = client.get(url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={}-", offset));
        }
        request.send()
    }
}

/// A response from a source, with helpers for the range headers.
#[derive(Debug)]
pub struct SourceResponse {
    response: Response,
}

impl SourceResponse {
    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    /// `Content-Length` of this response body.
    pub fn content_length(&self) -> Option<u64> {
        self.response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse().ok())
    }

    /// Parsed `Content-Range` header.
    pub fn content_range(&self) -> Option<ContentRange> {
        self.response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(ContentRange::parse)
    }

    /// Complete resource size as far as the headers tell, given the offset
    /// that was requested.
    pub fn resource_size(&self, offset: u64) -> Option<u64> {
        match self.status() {
            StatusCode::PARTIAL_CONTENT => self
                .content_range()
                .and_then(|r| r.total)
                .or_else(|| self.content_length().map(|len| len + offset)),
            _ => self.content_length(),
        }
    }

    pub fn into_inner(self) -> Response {
        self.response
    }
}

/// The `start` and optional `total` of a `Content-Range: bytes a-b/total` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub total: Option<u64>,
}

impl ContentRange {
    pub fn parse(value: &str) -> Option<Self> {
        let spec = value.trim().strip_prefix("bytes")?.trim_start();
        let (range, total) = spec.split_once('/')?;
        let (start, _end) = range.trim().split_once('-')?;
        Some(Self {
            start: start.trim().parse().ok()?,
            total: total.trim().parse().ok(),
        })
    }
}

/// Whether an error, or anything in its source chain, comes from TLS or
/// certificate validation.
fn is_tls_error(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        let message = e.to_string().to_ascii_lowercase();
        if ["certificate", "tls", "ssl", "handshake"]
            .iter()
            .any(|needle| message.contains(needle))
        {
            return true;
        }
        current = e.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_content_range() {
        assert_eq!(
            ContentRange::parse("bytes 100-999/1000"),
            Some(ContentRange {
                start: 100,
                total: Some(1000)
            })
        );
        assert_eq!(
            ContentRange::parse("bytes 0-9/*"),
            Some(ContentRange {
                start: 0,
                total: None
            })
        );
        assert_eq!(ContentRange::parse("bytes */1000"), None);
        assert_eq!(ContentRange::parse("items 1-2/3"), None);
    }

    #[derive(Debug)]
    struct SendError(std::io::Error);

    impl std::fmt::Display for SendError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("error sending request for url (https://mirror.example/a.iso)")
        }
    }

    impl StdError for SendError {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.0)
        }
    }

    fn wrapped(kind: std::io::ErrorKind, message: &str) -> SendError {
        SendError(std::io::Error::new(kind, message.to_string()))
    }

    #[test]
    fn test_tls_errors_detected_through_source_chain() {
        assert!(is_tls_error(&wrapped(
            std::io::ErrorKind::InvalidData,
            "invalid peer certificate: Expired"
        )));
        assert!(is_tls_error(&wrapped(
            std::io::ErrorKind::Other,
            "SSL routines: handshake failure"
        )));
        assert!(is_tls_error(&std::io::Error::new(
            std::io::ErrorKind::Other,
            "TLS alert: unknown CA"
        )));
    }

    #[test]
    fn test_transport_errors_are_not_tls() {
        assert!(!is_tls_error(&wrapped(
            std::io::ErrorKind::ConnectionRefused,
            "tcp connect error: Connection refused (os error 111)"
        )));
        assert!(!is_tls_error(&wrapped(
            std::io::ErrorKind::TimedOut,
            "operation timed out"
        )));
    }

    #[test]
    fn test_refused_connection_is_not_retried_insecurely() {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        let err = client.get("http://127.0.0.1:1/a.iso").send().unwrap_err();
        assert!(!is_tls_error(&err));
    }

    #[test]
    fn test_client_builds_off_runtime() {
        let client = SourceClient::new(Duration::from_secs(1), Duration::from_secs(5));
        assert!(client.is_ok());
    }
}
