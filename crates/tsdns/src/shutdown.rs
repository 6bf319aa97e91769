use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Creates a token that is cancelled on the first SIGINT or SIGTERM.
///
/// Must be called from within a tokio runtime.
pub fn create_shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();

    tokio::spawn({
        let token = token.clone();
        async move {
            shutdown_signal().await;
            tracing::info!("received shutdown signal");
            token.cancel();
        }
    });

    token
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            let dynerr: &(dyn std::error::Error + Send + Sync) = &err;
            tracing::error!(error = dynerr, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(err) => {
                let dynerr: &(dyn std::error::Error + Send + Sync) = &err;
                tracing::error!(error = dynerr, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
