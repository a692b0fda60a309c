//! HTTP API, proxy gateway and progress WebSocket over a real socket.
//!
//! Run with: `cargo test --test server_integration`

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use reqwest::header::{ACCEPT_RANGES, CONTENT_DISPOSITION, RANGE};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio_tungstenite::tungstenite::Message;

use common::{Fixture, PAYLOAD_LEN};
use isofetch::broadcast::ProgressBroadcaster;
use isofetch::proxy::{ProxyConfig, ProxyGateway};
use isofetch::server::{start_server, AppState, ServerHandle};
use isofetch::service::{DownloadService, ServiceConfig};
use isofetch::store::MemoryStore;

// ============================================================================
// Helpers
// ============================================================================

struct TestServer {
    handle: ServerHandle,
    client: reqwest::Client,
    _temp: TempDir,
}

impl TestServer {
    async fn start() -> Self {
        let temp = TempDir::new().unwrap();
        let service = Arc::new(DownloadService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ProgressBroadcaster::default()),
            ServiceConfig::new(temp.path().to_path_buf()),
        ));
        let gateway = Arc::new(ProxyGateway::new(ProxyConfig::default()).unwrap());
        let handle = start_server(
            "127.0.0.1:0".parse().unwrap(),
            AppState::new(service, gateway),
        )
        .await
        .unwrap();

        Self {
            handle,
            client: reqwest::Client::new(),
            _temp: temp,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.handle.local_addr(), path)
    }

    async fn get_json(&self, path: &str) -> (StatusCode, Value) {
        let response = self.client.get(self.url(path)).send().await.unwrap();
        let status = response.status();
        let text = response.text().await.unwrap();
        (status, serde_json::from_str(&text).unwrap_or(Value::Null))
    }

    async fn post_json(&self, path: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = self.client.post(self.url(path));
        if let Some(body) = body {
            request = request
                .header("content-type", "application/json")
                .body(body.to_string());
        }
        let response = request.send().await.unwrap();
        let status = response.status();
        let text = response.text().await.unwrap();
        (status, serde_json::from_str(&text).unwrap_or(Value::Null))
    }

    async fn wait_for_state(&self, id: u64, state: &str) -> Value {
        let deadline = Instant::now() + Duration::from_secs(15);
        loop {
            let (_, record) = self.get_json(&format!("/api/downloads/{}", id)).await;
            if record["state"] == state {
                return record;
            }
            assert!(Instant::now() < deadline, "download {} never reached {}", id, state);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

fn entry(name: &str, url: String) -> Value {
    json!({
        "name": name,
        "version": "1.0",
        "category": "linux",
        "architecture": "x64",
        "url": url,
    })
}

// ============================================================================
// REST
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_health() {
    let server = TestServer::start().await;
    let (status, body) = server.get_json("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], isofetch::VERSION);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_download_lifecycle_over_http() {
    let fixture = Fixture::start().await;
    let server = TestServer::start().await;

    let (status, created) = server
        .post_json("/api/downloads", Some(entry("Debian", fixture.url("/file.iso"))))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["state"], "pending");
    let id = created["id"].as_u64().unwrap();

    let record = server.wait_for_state(id, "completed").await;
    assert_eq!(record["downloaded_bytes"], PAYLOAD_LEN as u64);
    assert_eq!(record["progress"], 100.0);

    let (_, listed) = server.get_json("/api/downloads?state=completed").await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let (_, stats) = server.get_json("/api/downloads/stats").await;
    assert_eq!(stats["completed_downloads"], 1);

    // Cancel is always dismissible, even after completion.
    let (status, cancelled) = server
        .post_json(&format!("/api/downloads/{}/cancel", id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["state"], "cancelled");
    let (status, _) = server
        .post_json(&format!("/api/downloads/{}/cancel", id), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let response = server
        .client
        .delete(server.url("/api/downloads/completed"))
        .send()
        .await
        .unwrap();
    let cleared: Value = serde_json::from_str(&response.text().await.unwrap()).unwrap();
    assert_eq!(cleared["deleted"], 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_error_statuses() {
    let server = TestServer::start().await;

    let (status, body) = server.get_json("/api/downloads/42").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["detail"].is_string());

    let (status, _) = server.post_json("/api/downloads/42/cancel", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let mut bad = entry("Bad", "http://example.invalid/x.iso".to_string());
    bad["checksum"] = json!("abc");
    bad["checksum_type"] = json!("crc32");
    let (status, _) = server.post_json("/api/downloads", Some(bad)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ============================================================================
// Proxy
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_proxy_honours_range() {
    let fixture = Fixture::start().await;
    let server = TestServer::start().await;

    let (_, created) = server
        .post_json("/api/downloads", Some(entry("Fedora", fixture.url("/file.iso"))))
        .await;
    let id = created["id"].as_u64().unwrap();

    let response = server
        .client
        .get(server.url(&format!("/download/{}", id)))
        .header(RANGE, "bytes=100-")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[ACCEPT_RANGES], "bytes");
    let disposition = response.headers()[CONTENT_DISPOSITION].to_str().unwrap().to_string();
    assert!(disposition.starts_with("attachment"), "{}", disposition);
    assert!(disposition.contains("linux-fedora-1-0-x64-enus.iso"), "{}", disposition);

    let body = response.bytes().await.unwrap();
    assert_eq!(body.as_ref(), &fixture.body()[100..]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_proxy_encoded_url() {
    let fixture = Fixture::start().await;
    let server = TestServer::start().await;

    let encoded = URL_SAFE.encode(fixture.url("/plain.iso"));
    let response = server
        .client
        .get(server.url(&format!("/download/url/{}", encoded)))
        .header(RANGE, "bytes=100-")
        .send()
        .await
        .unwrap();

    // The upstream ignored the range, so neither do we claim it.
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.bytes().await.unwrap().as_ref(), fixture.body());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_proxy_upstream_failure_is_bad_gateway() {
    let fixture = Fixture::start().await;
    let server = TestServer::start().await;

    let encoded = URL_SAFE.encode(fixture.url("/error.iso"));
    let (status, body) = server
        .get_json(&format!("/download/url/{}", encoded))
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["detail"]
        .as_str()
        .unwrap()
        .starts_with("Failed to fetch from source:"));

    let (status, _) = server.get_json("/download/url/not-base64!").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = server.get_json("/download/77").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ============================================================================
// WebSocket
// ============================================================================

async fn next_json<S>(socket: &mut S) -> Value
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let message = tokio::time::timeout(Duration::from_secs(10), socket.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_websocket_protocol_and_progress() {
    let fixture = Fixture::start().await;
    let server = TestServer::start().await;

    let ws_url = format!("ws://{}/api/ws/downloads", server.handle.local_addr());
    let (mut socket, _) = tokio_tungstenite::connect_async(ws_url).await.unwrap();

    let connected = next_json(&mut socket).await;
    assert_eq!(connected["type"], "connected");
    assert!(connected["client_id"].as_str().unwrap().starts_with("client_"));

    socket
        .send(Message::Text(r#"{"type":"ping"}"#.to_string()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut socket).await["type"], "pong");

    socket
        .send(Message::Text("not json".to_string()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut socket).await["type"], "error");

    let (_, created) = server
        .post_json("/api/downloads", Some(entry("Arch", fixture.url("/file.iso"))))
        .await;
    let id = created["id"].as_u64().unwrap();

    socket
        .send(Message::Text(
            json!({"type": "subscribe", "download_id": id}).to_string(),
        ))
        .await
        .unwrap();

    // Until the subscribe lands the socket receives everything, so the
    // acknowledgement may arrive before or after the final progress.
    let mut saw_subscribed = false;
    let mut completed = false;
    let mut last_bytes = 0;
    while !(saw_subscribed && completed) {
        let message = next_json(&mut socket).await;
        match message["type"].as_str().unwrap() {
            "subscribed" => {
                assert_eq!(message["download_id"], id);
                saw_subscribed = true;
            }
            "download_progress" => {
                assert_eq!(message["download_id"], id);
                let bytes = message["data"]["downloaded_bytes"].as_u64().unwrap();
                assert!(bytes >= last_bytes);
                last_bytes = bytes;
                completed |= message["data"]["state"] == "completed";
            }
            other => panic!("unexpected message type {}", other),
        }
    }
    assert_eq!(last_bytes, PAYLOAD_LEN as u64);

    server.handle.shutdown();
}
