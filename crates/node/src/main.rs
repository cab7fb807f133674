//! Node entry point.

use std::sync::Arc;

use node::{AppState, Config, NodeError, Runtime};
use saga::HttpProductCatalog;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    if config.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<(), NodeError> {
    let config = Config::from_env();
    init_tracing(&config);

    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| NodeError::Metrics(e.to_string()))?;

    if config.webhook_secret.is_empty() {
        tracing::warn!("PAYMENT_WEBHOOK_SECRET is empty, every payment webhook will be refused");
    }

    let catalog = Arc::new(HttpProductCatalog::new(
        config.product_service_url.clone(),
        config.product_service_timeout,
    )?);
    let runtime = Runtime::build(&config, catalog).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tasks = runtime.spawn(&shutdown_rx);

    let app = node::create_app(AppState::from(&runtime), metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, instance = %config.instance_id, "starting saga node");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "background task ended abnormally");
        }
    }

    tracing::info!(dead_letters = runtime.dead_letters.len().await, "node shut down gracefully");
    Ok(())
}
