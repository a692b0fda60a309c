use std::io;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{
    ACCEPT_RANGES, CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE,
    RANGE,
};
use axum::http::{HeaderValue, StatusCode};
use axum::response::Response;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use futures::TryStreamExt;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, warn};

use super::error::ProxyError;

/// Default connect timeout for upstream requests, in seconds.
pub const DEFAULT_PROXY_TIMEOUT_SECS: u64 = 300;

/// Default size of chunks written to the client (1MB).
pub const DEFAULT_PROXY_CHUNK_SIZE: usize = 1024 * 1024;

/// Gateway settings.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub connect_timeout: Duration,
    pub chunk_size: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_PROXY_TIMEOUT_SECS),
            chunk_size: DEFAULT_PROXY_CHUNK_SIZE,
        }
    }
}

impl ProxyConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }
}

/// A resolved resource: where to fetch it and what to call it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySource {
    pub url: String,
    pub filename: String,
}

/// Streams upstream resources to clients.
#[derive(Debug, Clone)]
pub struct ProxyGateway {
    client: reqwest::Client,
    config: ProxyConfig,
}

impl ProxyGateway {
    pub fn new(config: ProxyConfig) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("isofetch/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(config.connect_timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(ProxyError::Client)?;
        Ok(Self { client, config })
    }

    /// Fetch `source`, forwarding `range` verbatim, and build the response.
    ///
    /// The status is 206 when the source honoured a range, 200 otherwise.
    /// A client that sent `Range` can therefore get a full `200` body when
    /// the source ignores ranges; it must check the status rather than
    /// assume its range was applied. `Content-Range` is echoed from the
    /// source only on 206. Upstream failures become [`ProxyError::Upstream`]; no body is ever
    /// produced for them.
    pub async fn stream(
        &self,
        source: &ProxySource,
        range: Option<&HeaderValue>,
    ) -> Result<Response, ProxyError> {
        let mut request = self.client.get(&source.url);
        if let Some(range) = range {
            request = request.header(RANGE, range.clone());
        }

        let upstream = request.send().await.map_err(|err| {
            warn!(url = %source.url, error = %err, "Upstream request failed");
            ProxyError::Upstream(err.to_string())
        })?;

        let status = upstream.status();
        if !status.is_success() {
            warn!(url = %source.url, status = status.as_u16(), "Upstream returned error status");
            return Err(ProxyError::Upstream(format!("upstream returned HTTP {}", status)));
        }

        let partial = status == StatusCode::PARTIAL_CONTENT;
        if range.is_some() && !partial {
            debug!(url = %source.url, "Upstream ignored range request, sending full body");
        }

        let mut builder = Response::builder()
            .status(if partial {
                StatusCode::PARTIAL_CONTENT
            } else {
                StatusCode::OK
            })
            .header(ACCEPT_RANGES, "bytes")
            .header(CACHE_CONTROL, "no-cache")
            .header(CONTENT_DISPOSITION, content_disposition(&source.filename));

        let headers = upstream.headers();
        builder = builder.header(
            CONTENT_TYPE,
            headers
                .get(CONTENT_TYPE)
                .cloned()
                .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream")),
        );
        if let Some(length) = headers.get(CONTENT_LENGTH) {
            builder = builder.header(CONTENT_LENGTH, length.clone());
        }
        if partial {
            if let Some(content_range) = headers.get(CONTENT_RANGE) {
                builder = builder.header(CONTENT_RANGE, content_range.clone());
            }
        }

        debug!(
            url = %source.url,
            filename = %source.filename,
            status = status.as_u16(),
            "Streaming upstream body"
        );

        let body = upstream.bytes_stream().map_err(io::Error::other);
        let chunks = ReaderStream::with_capacity(StreamReader::new(body), self.config.chunk_size);

        builder
            .body(Body::from_stream(chunks))
            .map_err(|err| ProxyError::Upstream(err.to_string()))
    }
}

/// `attachment; filename="..."` with characters unsafe in a quoted string replaced.
fn content_disposition(filename: &str) -> HeaderValue {
    let safe: String = filename
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    HeaderValue::from_str(&format!("attachment; filename=\"{}\"", safe))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment; filename=\"download.iso\""))
}

/// Decode a URL-safe base64 source reference (padding optional).
pub fn decode_source_url(encoded: &str) -> Result<String, ProxyError> {
    let bytes = URL_SAFE
        .decode(encoded)
        .or_else(|_| URL_SAFE_NO_PAD.decode(encoded))
        .map_err(|err| ProxyError::InvalidSource(err.to_string()))?;
    let url = String::from_utf8(bytes).map_err(|err| ProxyError::InvalidSource(err.to_string()))?;

    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ProxyError::InvalidSource(format!("not an http(s) URL: {}", url)));
    }
    Ok(url)
}

/// Last non-empty path segment of `url`, without query or fragment.
pub fn filename_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let path = path.split_once("://").map_or(path, |(_, rest)| rest);
    path.split('/')
        .skip(1)
        .filter(|segment| !segment.is_empty())
        .last()
        .map(str::to_string)
        .unwrap_or_else(|| "download.iso".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_disposition_sanitized() {
        assert_eq!(
            content_disposition("linux-debian-12.iso"),
            "attachment; filename=\"linux-debian-12.iso\""
        );
        assert_eq!(
            content_disposition("we\"ird\u{e9}.iso"),
            "attachment; filename=\"we_ird_.iso\""
        );
    }

    #[test]
    fn test_decode_source_url() {
        let encoded = URL_SAFE.encode("https://example.org/a.iso?x=1");
        assert_eq!(decode_source_url(&encoded).unwrap(), "https://example.org/a.iso?x=1");

        let unpadded = URL_SAFE_NO_PAD.encode("http://example.org/b.iso");
        assert_eq!(decode_source_url(&unpadded).unwrap(), "http://example.org/b.iso");

        assert!(decode_source_url("!!!").is_err());
        let ftp = URL_SAFE.encode("ftp://example.org/c.iso");
        assert!(matches!(decode_source_url(&ftp), Err(ProxyError::InvalidSource(_))));
    }

    #[test]
    fn test_filename_from_url() {
        assert_eq!(filename_from_url("https://example.org/isos/a.iso?sig=1"), "a.iso");
        assert_eq!(filename_from_url("https://example.org/isos/"), "isos");
        assert_eq!(filename_from_url("https://example.org"), "download.iso");
    }

    #[test]
    fn test_error_statuses() {
        assert_eq!(ProxyError::Upstream("x".into()).status(), StatusCode::BAD_GATEWAY);
        assert_eq!(ProxyError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ProxyError::Upstream("boom".into()).to_string(),
            "Failed to fetch from source: boom"
        );
    }
}
