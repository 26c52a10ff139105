use std::time::Duration;

use payment_service::config::{
    CurrencyConfig, PaymentConfig, QueueConfig, SettlementConfig, StorageConfig, SweepConfig,
    WorkerConfig,
};
use payment_service::startup::Application;
use service_core::config as core_config;

/// Gateway wired to memory backends with embedded workers, listening on a
/// random local port.
pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
}

pub fn test_config() -> PaymentConfig {
    PaymentConfig {
        common: core_config::Config {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        service_name: "payment-service-test".to_string(),
        log_level: "info".to_string(),
        otlp_endpoint: None,
        storage: StorageConfig::Memory,
        queue: QueueConfig::Memory,
        settlement: SettlementConfig {
            endpoint: None,
            request_timeout: Duration::from_secs(1),
            max_attempts: 3,
            retry_initial_delay: Duration::from_millis(10),
            retry_max_delay: Duration::from_millis(50),
            simulated_decline_over: None,
            simulated_latency: None,
        },
        worker: WorkerConfig {
            embedded: true,
            worker_count: 2,
        },
        sweep: SweepConfig {
            interval: Duration::from_secs(3600),
            staleness: Duration::from_secs(60),
            batch_limit: 100,
        },
        currencies: CurrencyConfig {
            supported: vec!["USD".to_string(), "ETB".to_string()],
        },
    }
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(test_config()).await
    }

    pub async fn spawn_with(config: PaymentConfig) -> Self {
        let app = Application::build(config)
            .await
            .expect("Failed to build test application");
        let port = app.port();

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        let client = reqwest::Client::new();
        let address = format!("http://127.0.0.1:{}", port);

        // Wait for the server to accept connections.
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        TestApp { address, client }
    }

    pub async fn create_payment(&self, body: &serde_json::Value) -> reqwest::Response {
        self.client
            .post(format!("{}/payments", self.address))
            .json(body)
            .send()
            .await
            .expect("Failed to execute create request")
    }

    pub async fn get_payment(&self, id: &str) -> reqwest::Response {
        self.client
            .get(format!("{}/payments/{}", self.address, id))
            .send()
            .await
            .expect("Failed to execute get request")
    }

    /// Poll until the payment leaves `PENDING` or the deadline passes.
    pub async fn wait_for_settlement(&self, id: &str, deadline: Duration) -> serde_json::Value {
        let started = std::time::Instant::now();
        loop {
            let body: serde_json::Value = self
                .get_payment(id)
                .await
                .json()
                .await
                .expect("Get response was not JSON");
            if body["status"] != "PENDING" {
                return body;
            }
            assert!(
                started.elapsed() < deadline,
                "payment {} still PENDING after {:?}",
                id,
                deadline
            );
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}
