//! HTTP and WebSocket front end.
//!
//! | Method | Path                             | Handler                          |
//! |--------|----------------------------------|----------------------------------|
//! | GET    | `/health`                        | liveness                         |
//! | POST   | `/api/downloads`                 | start a download (CatalogEntry)  |
//! | GET    | `/api/downloads?state=`          | list, newest first               |
//! | GET    | `/api/downloads/stats`           | counters                         |
//! | DELETE | `/api/downloads/completed`       | clear finished records           |
//! | GET    | `/api/downloads/:id`             | one record                       |
//! | DELETE | `/api/downloads/:id`             | cancel and delete                |
//! | POST   | `/api/downloads/:id/pause`       | pause                            |
//! | POST   | `/api/downloads/:id/resume`      | resume                           |
//! | POST   | `/api/downloads/:id/cancel`      | cancel (always dismissible)      |
//! | GET    | `/api/ws/downloads`              | progress WebSocket               |
//! | GET    | `/download/:id`                  | proxy a stored download's source |
//! | GET    | `/download/url/:encoded`         | proxy a base64 URL               |

mod api;
mod error;
mod ws;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use error::ApiError;

use crate::proxy::ProxyGateway;
use crate::service::DownloadService;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<DownloadService>,
    pub gateway: Arc<ProxyGateway>,
    /// Cancelled when the server shuts down; long-lived sockets watch it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(service: Arc<DownloadService>, gateway: Arc<ProxyGateway>) -> Self {
        Self {
            service,
            gateway,
            shutdown: CancellationToken::new(),
        }
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route(
            "/api/downloads",
            post(api::start_download).get(api::list_downloads),
        )
        .route("/api/downloads/stats", get(api::stats))
        .route(
            "/api/downloads/completed",
            axum::routing::delete(api::clear_completed),
        )
        .route(
            "/api/downloads/:id",
            get(api::get_download).delete(api::delete_download),
        )
        .route("/api/downloads/:id/pause", post(api::pause_download))
        .route("/api/downloads/:id/resume", post(api::resume_download))
        .route("/api/downloads/:id/cancel", post(api::cancel_download))
        .route("/api/ws/downloads", get(ws::downloads_ws))
        .route("/download/:id", get(api::proxy_download))
        .route("/download/url/:encoded", get(api::proxy_url))
        .with_state(state)
}

/// A running server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    join_handle: JoinHandle<io::Result<()>>,
}

impl ServerHandle {
    /// The bound address (useful when binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Ask the server to stop accepting connections and close sockets.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait for the server task to finish.
    pub async fn wait(self) -> io::Result<()> {
        self.join_handle
            .await
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?
    }
}

/// Bind `addr` and serve in a background task until shutdown.
pub async fn start_server(addr: SocketAddr, state: AppState) -> io::Result<ServerHandle> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let shutdown = state.shutdown.clone();
    let app = router(state);

    let token = shutdown.clone();
    let join_handle = tokio::spawn(async move {
        info!(address = %local_addr, "HTTP server started");
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                token.cancelled().await;
                info!(address = %local_addr, "HTTP server received shutdown signal");
            })
            .await;
        info!(address = %local_addr, "HTTP server stopped");
        result
    });

    Ok(ServerHandle {
        local_addr,
        shutdown,
        join_handle,
    })
}
