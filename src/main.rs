use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use tensor_tier::config::{Cli, Config};
use tensor_tier::engine::PlacementEngine;
use tensor_tier::hardware::mount::SystemMounter;
use tensor_tier::runtime::HostBufferRuntime;
use tensor_tier::server::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "tensor_tier=debug,tower_http=debug"
    } else {
        "tensor_tier=info,tower_http=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("tensor-tier v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let config = Arc::new(Config::load(&cli.config)?);

    info!(
        queue_capacity = config.transfer.queue_capacity,
        workers = config.transfer.worker_tasks,
        monitor_interval_secs = config.monitor.interval_secs,
        nvme = ?config.hardware.nvme.path,
        ramdisk_enabled = config.hardware.ramdisk.enabled,
        "Configuration loaded"
    );

    // Probe hardware, provision tiers, and start workers.
    let mounter = Arc::new(SystemMounter::new(std::time::Duration::from_secs(
        config.hardware.ramdisk.mount_timeout_secs,
    )));
    let runtime = Arc::new(HostBufferRuntime::new());
    let engine = PlacementEngine::bootstrap(config, runtime, mounter).await?;

    // Build the HTTP router.
    let state = Arc::new(AppState {
        engine: Arc::clone(&engine),
    });
    let app = build_router(state);

    // Start the server.
    let listen_addr = cli.listen;
    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    // Drain transfers, stop the monitor, clean up the RAM-disk.
    engine.shutdown().await;

    Ok(())
}
