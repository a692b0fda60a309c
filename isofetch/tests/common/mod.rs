//! Local HTTP fixture for integration tests.
//!
//! Routes:
//! - `/file.iso`    honours `Range: bytes=N-`
//! - `/plain.iso`   ignores `Range`, always a full `200`
//! - `/error.iso`   always `500`
//! - `/slow.iso`    a larger body trickled in small chunks, honours `Range`
//!
//! Anything else is a `404`.

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Size of the `/file.iso` and `/plain.iso` body.
pub const PAYLOAD_LEN: usize = 1000;

/// Size of the `/slow.iso` body.
pub const SLOW_PAYLOAD_LEN: usize = 1024 * 1024;

const SLOW_CHUNK: usize = 8 * 1024;
const SLOW_DELAY: Duration = Duration::from_millis(10);

/// Deterministic, non-repeating-per-256 test bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(31) + i / 256) as u8).collect()
}

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[derive(Clone)]
struct FixtureState {
    body: Arc<Vec<u8>>,
    slow: Arc<Vec<u8>>,
    requests: Arc<AtomicUsize>,
}

pub struct Fixture {
    addr: SocketAddr,
    state: FixtureState,
    shutdown: CancellationToken,
}

impl Fixture {
    pub async fn start() -> Self {
        let state = FixtureState {
            body: Arc::new(payload(PAYLOAD_LEN)),
            slow: Arc::new(payload(SLOW_PAYLOAD_LEN)),
            requests: Arc::new(AtomicUsize::new(0)),
        };

        let app = Router::new()
            .route("/file.iso", get(file))
            .route("/plain.iso", get(plain))
            .route("/error.iso", get(error))
            .route("/slow.iso", get(slow))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
                .unwrap();
        });

        Self {
            addr,
            state,
            shutdown,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn body(&self) -> &[u8] {
        &self.state.body
    }

    pub fn slow_body(&self) -> &[u8] {
        &self.state.slow
    }

    /// Requests served so far, all routes.
    pub fn requests(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn file(State(state): State<FixtureState>, headers: HeaderMap) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    ranged(&state.body, &headers, false)
}

async fn slow(State(state): State<FixtureState>, headers: HeaderMap) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    ranged(&state.slow, &headers, true)
}

async fn plain(State(state): State<FixtureState>) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    (
        [(CONTENT_LENGTH, state.body.len().to_string())],
        state.body.as_ref().clone(),
    )
        .into_response()
}

async fn error(State(state): State<FixtureState>) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded").into_response()
}

fn requested_offset(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RANGE)?
        .to_str()
        .ok()?
        .strip_prefix("bytes=")?
        .strip_suffix('-')?
        .parse()
        .ok()
}

fn ranged(data: &Arc<Vec<u8>>, headers: &HeaderMap, trickle: bool) -> Response {
    let total = data.len() as u64;
    let Some(start) = requested_offset(headers) else {
        return Response::builder()
            .status(StatusCode::OK)
            .header(ACCEPT_RANGES, "bytes")
            .header(CONTENT_LENGTH, total)
            .body(body_from(data, 0, trickle))
            .unwrap();
    };

    if start >= total {
        return (
            StatusCode::RANGE_NOT_SATISFIABLE,
            [(CONTENT_RANGE, format!("bytes */{}", total))],
        )
            .into_response();
    }

    Response::builder()
        .status(StatusCode::PARTIAL_CONTENT)
        .header(ACCEPT_RANGES, "bytes")
        .header(CONTENT_RANGE, format!("bytes {}-{}/{}", start, total - 1, total))
        .header(CONTENT_LENGTH, total - start)
        .body(body_from(data, start as usize, trickle))
        .unwrap()
}

fn body_from(data: &Arc<Vec<u8>>, start: usize, trickle: bool) -> Body {
    if !trickle {
        return Body::from(data[start..].to_vec());
    }
    let chunks: Vec<Bytes> = data[start..]
        .chunks(SLOW_CHUNK)
        .map(Bytes::copy_from_slice)
        .collect();
    let stream = futures::stream::iter(chunks).then(|chunk| async move {
        tokio::time::sleep(SLOW_DELAY).await;
        Ok::<_, io::Error>(chunk)
    });
    Body::from_stream(stream)
}
