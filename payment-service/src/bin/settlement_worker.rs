//! Standalone settlement worker: pulls pending payments from the shared
//! queue, settles them and runs the reconciliation sweep. Pairs with a
//! gateway started with `WORKER_EMBEDDED=false`.

use payment_service::config::{PaymentConfig, QueueConfig, StorageConfig};
use payment_service::services::metrics::init_metrics;
use payment_service::services::sweeper::ReconciliationSweeper;
use payment_service::services::worker::SettlementWorkerPool;
use payment_service::startup::{
    build_provider, build_queue, build_store, retry_policy, sweep_settings,
};
use service_core::observability::init_tracing;
use tokio::signal;
use tokio_util::sync::CancellationToken;

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = PaymentConfig::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    init_tracing(
        "settlement-worker",
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    // Memory backends are process-local; a standalone worker would never see
    // the gateway's records or queue entries.
    if matches!(config.storage, StorageConfig::Memory)
        || matches!(config.queue, QueueConfig::Memory)
    {
        tracing::error!("settlement-worker requires the postgres storage and redis queue backends");
        return Err(std::io::Error::other(
            "settlement-worker requires the postgres storage and redis queue backends",
        ));
    }

    init_metrics();

    let store = build_store(&config).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to initialize store");
        std::io::Error::other(format!("Store error: {}", e))
    })?;
    let queue = build_queue(&config).map_err(|e| {
        tracing::error!(error = %e, "Failed to initialize queue");
        std::io::Error::other(format!("Queue error: {}", e))
    })?;
    let provider = build_provider(&config).map_err(|e| {
        tracing::error!(error = %e, "Failed to initialize settlement provider");
        std::io::Error::other(format!("Provider error: {}", e))
    })?;

    let shutdown_token = CancellationToken::new();

    let pool = SettlementWorkerPool::new(
        store.clone(),
        queue.clone(),
        provider,
        config.worker.worker_count,
        retry_policy(&config.settlement),
        shutdown_token.clone(),
    );
    let workers = pool.start();

    let sweeper = ReconciliationSweeper::new(
        store,
        queue,
        sweep_settings(&config.sweep),
        shutdown_token.clone(),
    );
    let sweep_handle = sweeper.start();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        worker_count = config.worker.worker_count,
        "Settlement worker running"
    );

    shutdown_signal().await;
    shutdown_token.cancel();

    for handle in workers {
        handle.await.ok();
    }
    sweep_handle.await.ok();

    tracing::info!("Settlement worker shutdown complete");
    Ok(())
}
