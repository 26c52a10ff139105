//! Application startup and lifecycle management.

use axum::middleware::from_fn;
use axum::{
    routing::{get, post},
    Router,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::{PaymentConfig, QueueConfig, SettlementConfig, StorageConfig, SweepConfig};
use crate::handlers;
use crate::services::memory::{MemoryQueue, MemoryStore};
use crate::services::metrics::init_metrics;
use crate::services::queue::{RedisQueue, SettlementQueue};
use crate::services::repository::{PaymentStore, PostgresStore};
use crate::services::settlement::{
    HttpSettlementProvider, SettlementProvider, SimulatedSettlementProvider,
};
use crate::services::sweeper::{ReconciliationSweeper, SweepSettings};
use crate::services::worker::{RetryPolicy, SettlementWorkerPool};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: PaymentConfig,
    pub store: Arc<dyn PaymentStore>,
    pub queue: Arc<dyn SettlementQueue>,
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
    shutdown_token: CancellationToken,
}

impl Application {
    pub async fn build(config: PaymentConfig) -> Result<Self, AppError> {
        init_metrics();

        let store = build_store(&config).await?;
        let queue = build_queue(&config)?;

        let shutdown_token = CancellationToken::new();

        if config.worker.embedded {
            let provider = build_provider(&config)?;
            let pool = SettlementWorkerPool::new(
                store.clone(),
                queue.clone(),
                provider,
                config.worker.worker_count,
                retry_policy(&config.settlement),
                shutdown_token.clone(),
            );
            pool.start();

            let sweeper = ReconciliationSweeper::new(
                store.clone(),
                queue.clone(),
                sweep_settings(&config.sweep),
                shutdown_token.clone(),
            );
            sweeper.start();
        } else {
            tracing::info!(
                "Embedded settlement workers disabled, expecting a standalone settlement-worker"
            );
        }

        let state = AppState {
            config: config.clone(),
            store,
            queue,
        };

        let host: IpAddr = config.common.host.parse().map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!(
                "Invalid listen host '{}': {}",
                config.common.host,
                e
            ))
        })?;
        let addr = SocketAddr::new(host, config.common.port);
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        let router = Router::new()
            .route("/health", get(handlers::health_check))
            .route("/ready", get(handlers::readiness_check))
            .route("/metrics", get(handlers::metrics_handler))
            .route("/payments", post(handlers::payments::create_payment))
            .route("/payments/:id", get(handlers::payments::get_payment))
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .layer(from_fn(metrics_middleware))
            .layer(from_fn(request_id_middleware))
            .layer(
                TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                    let request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("-");

                    tracing::info_span!(
                        "http_request",
                        request_id = %request_id,
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                }),
            )
            .with_state(state);

        tracing::info!(port, "Payment service listener bound");

        Ok(Self {
            port,
            listener,
            router,
            shutdown_token,
        })
    }

    /// Port the HTTP listener is bound to.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Token that stops the embedded workers and sweeper.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        tracing::info!(port = self.port, "Payment service listening");
        axum::serve(self.listener, self.router).await
    }
}

pub async fn build_store(config: &PaymentConfig) -> Result<Arc<dyn PaymentStore>, AppError> {
    match &config.storage {
        StorageConfig::Memory => {
            tracing::info!("Using in-memory payment store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StorageConfig::Postgres(db) => {
            let store = PostgresStore::connect(
                db.url.expose_secret(),
                db.max_connections,
                db.min_connections,
            )
            .await?;
            if db.run_migrations {
                store.run_migrations().await?;
            }
            Ok(Arc::new(store))
        }
    }
}

pub fn build_queue(config: &PaymentConfig) -> Result<Arc<dyn SettlementQueue>, AppError> {
    match &config.queue {
        QueueConfig::Memory => {
            tracing::info!("Using in-memory settlement queue");
            Ok(Arc::new(MemoryQueue::new()))
        }
        QueueConfig::Redis(redis_config) => {
            let client = redis::Client::open(redis_config.url.expose_secret().as_str())?;
            tracing::info!(queue_key = %redis_config.queue_key, "Using redis settlement queue");
            Ok(Arc::new(RedisQueue::new(
                client,
                redis_config.queue_key.clone(),
            )))
        }
    }
}

pub fn build_provider(config: &PaymentConfig) -> Result<Arc<dyn SettlementProvider>, AppError> {
    match &config.settlement.endpoint {
        Some(endpoint) => {
            tracing::info!(endpoint = %endpoint, "Using HTTP settlement provider");
            Ok(Arc::new(HttpSettlementProvider::new(
                endpoint.clone(),
                config.settlement.request_timeout,
            )?))
        }
        None => {
            tracing::info!("Settlement endpoint not configured, using simulated provider");
            Ok(Arc::new(SimulatedSettlementProvider::new(
                config.settlement.simulated_decline_over,
                config.settlement.simulated_latency,
            )))
        }
    }
}

pub fn retry_policy(settlement: &SettlementConfig) -> RetryPolicy {
    RetryPolicy {
        max_attempts: settlement.max_attempts,
        initial_delay: settlement.retry_initial_delay,
        max_delay: settlement.retry_max_delay,
    }
}

pub fn sweep_settings(sweep: &SweepConfig) -> SweepSettings {
    SweepSettings {
        interval: sweep.interval,
        staleness: sweep.staleness,
        batch_limit: sweep.batch_limit,
    }
}
