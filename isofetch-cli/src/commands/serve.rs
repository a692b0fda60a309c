//! Serve command - run the download server until Ctrl+C.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use isofetch::broadcast::ProgressBroadcaster;
use isofetch::proxy::ProxyGateway;
use isofetch::server::{start_server, AppState};
use isofetch::service::DownloadService;
use isofetch::store::{CheckpointStore, JsonFileStore};
use tracing::{info, warn};

use crate::error::CliError;
use crate::runner::CliRunner;

pub struct ServeArgs {
    pub bind: Option<SocketAddr>,
    pub config_path: Option<PathBuf>,
}

pub fn run(args: ServeArgs) -> Result<(), CliError> {
    let runner = CliRunner::new(args.config_path.as_deref())?;
    runner.log_startup("serve");
    let config = runner.config();
    let bind = args.bind.unwrap_or(config.server.bind);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("isofetch-rt")
        .build()
        .map_err(CliError::Serve)?;

    runtime.block_on(async {
        let store: Arc<dyn CheckpointStore> =
            Arc::new(JsonFileStore::open(&config.downloads.state_dir)?);
        let service = Arc::new(DownloadService::new(
            store,
            Arc::new(ProgressBroadcaster::default()),
            config.service_config(),
        ));

        let orphaned = service.recover().await?;
        if orphaned > 0 {
            warn!(count = orphaned, "Found downloads interrupted by a previous run");
        }

        let gateway = Arc::new(ProxyGateway::new(config.proxy_config())?);
        let handle = start_server(bind, AppState::new(service, gateway))
            .await
            .map_err(CliError::Serve)?;

        println!("isofetch {} listening on http://{}", isofetch::VERSION, handle.local_addr());
        println!("Downloads: {}", config.downloads.directory.display());
        println!();
        println!("Press Ctrl+C to stop");

        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C, shutting down");
        }
        println!();
        println!("Received shutdown signal, stopping server...");
        info!("Shutdown requested");

        handle.shutdown();
        handle.wait().await.map_err(CliError::Serve)
    })
}
