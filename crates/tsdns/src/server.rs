use anyhow::{Context, Result};
use tracing::Dispatch;
use tsdns_service::config::Config;
use tsdns_service::server::ServerBuilder;

use crate::shutdown::create_shutdown_token;

/// Opens the configured repository and serves queries until a shutdown signal arrives.
pub fn run(config: Config, logger: Dispatch) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("tsdns")
        .enable_all()
        .build()?;

    runtime.block_on(serve(config, logger))
}

async fn serve(config: Config, logger: Dispatch) -> Result<()> {
    let repository = config
        .repository
        .open()
        .await
        .context("failed to open the record repository")?;

    let server = ServerBuilder::from_config(&config, repository)
        .with_logger(logger)
        .build()
        .context("failed to create the server")?;
    tracing::info!("Starting tsdns server on {}", server.address());

    let shutdown = create_shutdown_token();
    let served = tokio::select! {
        result = server.start() => result.context("failed to serve queries"),
        _ = shutdown.cancelled() => Ok(()),
    };

    let closed = server
        .close()
        .await
        .context("failed to close the record repository");
    served.and(closed)
}
