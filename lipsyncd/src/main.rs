use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use lipsyncd::adapters::{DryRunAdapters, DryRunConfig};
use lipsyncd::api::server::{ApiServer, ApiServerConfig, AppState};
use lipsyncd::config::AppConfig;
use lipsyncd::pipeline::PipelineExecutor;
use lipsyncd::progress::ProgressBroadcaster;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env_or_default();

    // Keep the file writer guard alive for the process lifetime
    let _log_guard = lipsyncd::logging::init_logging(config.log_dir.as_deref())?;

    info!(version = env!("CARGO_PKG_VERSION"), "starting lipsyncd");

    let adapters = if config.dry_run {
        info!("running with simulated stage adapters (LIPSYNCD_DRY_RUN)");
        DryRunAdapters::adapter_set(DryRunConfig::default())
    } else {
        anyhow::bail!(
            "no stage adapters configured; set LIPSYNCD_DRY_RUN=1 to run with simulated adapters"
        );
    };

    let shutdown = CancellationToken::new();

    let broadcaster = Arc::new(ProgressBroadcaster::new(config.broadcaster.clone()));
    broadcaster.start_background_tasks(shutdown.clone());

    let executor = Arc::new(PipelineExecutor::new(
        adapters,
        broadcaster.clone(),
        config.executor.clone(),
    ));

    let server = ApiServer::new(
        ApiServerConfig::from_env_or_default(),
        AppState::new(executor, broadcaster),
    );

    let server_cancel = server.cancel_token();
    let shutdown_on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            shutdown_on_signal.cancel();
            server_cancel.cancel();
        }
    });

    server.run().await?;
    shutdown.cancel();

    Ok(())
}
