use callrelay_server::config::ServerConfig;
use callrelay_server::error::BootstrapError;
use callrelay_server::routes::router;
use callrelay_server::state::{AppState, select_backend};
use rootcause::prelude::Report;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env().expect("failed to load configuration");
    tracing::info!("Loaded configuration");

    if let Err(report) = run(config).await {
        tracing::error!(error = %report, "server stopped with an error");
        std::process::exit(1);
    }
}

async fn run(config: ServerConfig) -> Result<(), Report<BootstrapError>> {
    let backend = select_backend(&config).await;

    // In-memory entries are only dropped when read; sweep the rest.
    if let Some(memory) = backend.memory.clone() {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                let purged = memory.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "Purged expired entries");
                }
            }
        });
    }

    let state = Arc::new(AppState::build(&config, backend.store)?);
    let hub = state.hub.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .map_err(|e| BootstrapError::Bind {
            addr: config.listen_addr.clone(),
            details: e.to_string(),
        })?;

    tracing::info!("listening on http://{}", config.listen_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| BootstrapError::Serve {
            details: e.to_string(),
        })?;

    tracing::info!("Closing live conversations");
    if let Err(e) = hub.shutdown().await {
        tracing::warn!(error = %e, "relay hub already stopped");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
