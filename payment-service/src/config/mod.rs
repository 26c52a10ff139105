//! Configuration for the payment-service and settlement-worker binaries.

use rust_decimal::Decimal;
use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub storage: StorageConfig,
    pub queue: QueueConfig,
    pub settlement: SettlementConfig,
    pub worker: WorkerConfig,
    pub sweep: SweepConfig,
    pub currencies: CurrencyConfig,
}

/// Where payment records live. The memory backend is process-local and only
/// meaningful with embedded workers.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    Memory,
    Postgres(DatabaseConfig),
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub run_migrations: bool,
}

#[derive(Debug, Clone)]
pub enum QueueConfig {
    Memory,
    Redis(RedisConfig),
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: Secret<String>,
    pub queue_key: String,
}

#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Decision endpoint; when unset the simulated provider is used.
    pub endpoint: Option<String>,
    pub request_timeout: Duration,
    pub max_attempts: u32,
    pub retry_initial_delay: Duration,
    pub retry_max_delay: Duration,
    pub simulated_decline_over: Option<Decimal>,
    pub simulated_latency: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Run the settlement workers inside the gateway process.
    pub embedded: bool,
    pub worker_count: usize,
}

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub interval: Duration,
    /// How long a payment may sit in `PENDING` before the sweep requeues it.
    pub staleness: Duration,
    pub batch_limit: i64,
}

#[derive(Debug, Clone)]
pub struct CurrencyConfig {
    pub supported: Vec<String>,
}

impl CurrencyConfig {
    pub fn is_supported(&self, currency: &str) -> bool {
        self.supported.iter().any(|c| c == currency)
    }
}

impl PaymentConfig {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let common = core_config::Config::load()?;

        let storage = match env::var("PAYMENT_STORAGE")
            .unwrap_or_else(|_| "postgres".to_string())
            .to_lowercase()
            .as_str()
        {
            "memory" => StorageConfig::Memory,
            "postgres" => StorageConfig::Postgres(DatabaseConfig {
                url: Secret::new(env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!(
                        "DATABASE_URL is required for the postgres storage backend"
                    ))
                })?),
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 50),
                min_connections: env_parse("DATABASE_MIN_CONNECTIONS", 2),
                run_migrations: env_parse("DATABASE_RUN_MIGRATIONS", true),
            }),
            other => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "unknown storage backend: {}",
                    other
                )))
            }
        };

        let queue = match env::var("PAYMENT_QUEUE")
            .unwrap_or_else(|_| "redis".to_string())
            .to_lowercase()
            .as_str()
        {
            "memory" => QueueConfig::Memory,
            "redis" => QueueConfig::Redis(RedisConfig {
                url: Secret::new(
                    env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
                ),
                queue_key: env::var("PAYMENT_QUEUE_KEY")
                    .unwrap_or_else(|_| "payments:settlement".to_string()),
            }),
            other => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "unknown queue backend: {}",
                    other
                )))
            }
        };

        let settlement = SettlementConfig {
            endpoint: env::var("SETTLEMENT_ENDPOINT").ok().filter(|s| !s.is_empty()),
            request_timeout: Duration::from_millis(env_parse(
                "SETTLEMENT_REQUEST_TIMEOUT_MS",
                5_000,
            )),
            max_attempts: env_parse("SETTLEMENT_MAX_ATTEMPTS", 5),
            retry_initial_delay: Duration::from_millis(env_parse(
                "SETTLEMENT_RETRY_INITIAL_DELAY_MS",
                100,
            )),
            retry_max_delay: Duration::from_millis(env_parse(
                "SETTLEMENT_RETRY_MAX_DELAY_MS",
                5_000,
            )),
            simulated_decline_over: env::var("SETTLEMENT_SIMULATED_DECLINE_OVER")
                .ok()
                .and_then(|s| s.parse::<Decimal>().ok()),
            simulated_latency: env::var("SETTLEMENT_SIMULATED_LATENCY_MS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_millis),
        };

        let worker = WorkerConfig {
            embedded: env_parse("WORKER_EMBEDDED", true),
            worker_count: env_parse("WORKER_COUNT", 10),
        };

        let sweep = SweepConfig {
            interval: Duration::from_secs(env_parse("SWEEP_INTERVAL_SECS", 30)),
            staleness: Duration::from_secs(env_parse("SWEEP_STALENESS_SECS", 60)),
            batch_limit: env_parse("SWEEP_BATCH_LIMIT", 100),
        };

        let currencies = CurrencyConfig {
            supported: env::var("SUPPORTED_CURRENCIES")
                .unwrap_or_else(|_| "USD,ETB".to_string())
                .split(',')
                .map(|c| c.trim().to_uppercase())
                .filter(|c| !c.is_empty())
                .collect(),
        };

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "payment-service".to_string()),
            log_level: env::var("LOG_LEVEL")
                .unwrap_or_else(|_| "info,payment_service=debug".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            storage,
            queue,
            settlement,
            worker,
            sweep,
            currencies,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
