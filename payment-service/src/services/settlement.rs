//! Settlement decision providers.
//!
//! The worker treats the provider as an opaque authority: approve, decline,
//! or fail with an error classified as retryable or not.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use std::time::Duration;
use uuid::Uuid;

use crate::models::Payment;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementDecision {
    Approve,
    Decline { reason: String },
}

/// Provider failures, split by whether a retry can help.
#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("transient settlement error: {0}")]
    Transient(#[source] anyhow::Error),
    #[error("terminal settlement error: {0}")]
    Terminal(#[source] anyhow::Error),
}

#[async_trait]
pub trait SettlementProvider: Send + Sync {
    async fn evaluate(&self, payment: &Payment) -> Result<SettlementDecision, SettlementError>;
}

#[derive(Debug, Serialize)]
struct EvaluationRequest<'a> {
    payment_id: Uuid,
    reference: &'a str,
    amount: Decimal,
    currency: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
enum EvaluationResponse {
    Approve,
    Decline { reason: Option<String> },
}

/// Client for an external settlement-decision endpoint.
///
/// Transport failures and 5xx responses are transient; any other non-2xx
/// response means the provider will never accept this evaluation.
pub struct HttpSettlementProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSettlementProvider {
    pub fn new(endpoint: String, request_timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| {
                AppError::InternalError(anyhow::anyhow!(
                    "Failed to build settlement client: {}",
                    e
                ))
            })?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl SettlementProvider for HttpSettlementProvider {
    async fn evaluate(&self, payment: &Payment) -> Result<SettlementDecision, SettlementError> {
        let request = EvaluationRequest {
            payment_id: payment.id,
            reference: &payment.reference,
            amount: payment.amount,
            currency: &payment.currency,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                SettlementError::Transient(anyhow::anyhow!("Evaluation request failed: {}", e))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            SettlementError::Transient(anyhow::anyhow!("Evaluation response unreadable: {}", e))
        })?;

        tracing::debug!(
            payment_id = %payment.id,
            status = %status,
            body = %body,
            "Settlement provider response"
        );

        if status.is_server_error() {
            return Err(SettlementError::Transient(anyhow::anyhow!(
                "Provider returned {}",
                status
            )));
        }
        if !status.is_success() {
            return Err(SettlementError::Terminal(anyhow::anyhow!(
                "Provider rejected evaluation: {} - {}",
                status,
                body
            )));
        }

        let parsed: EvaluationResponse = serde_json::from_str(&body).map_err(|e| {
            SettlementError::Transient(anyhow::anyhow!("Malformed provider response: {}", e))
        })?;

        Ok(match parsed {
            EvaluationResponse::Approve => SettlementDecision::Approve,
            EvaluationResponse::Decline { reason } => SettlementDecision::Decline {
                reason: reason.unwrap_or_else(|| "declined by provider".to_string()),
            },
        })
    }
}

/// Local decision rule for development and tests: approves everything below
/// the optional decline threshold. The optional latency stands in for the
/// upstream round-trip.
pub struct SimulatedSettlementProvider {
    decline_over: Option<Decimal>,
    latency: Option<Duration>,
}

impl SimulatedSettlementProvider {
    pub fn new(decline_over: Option<Decimal>, latency: Option<Duration>) -> Self {
        Self {
            decline_over,
            latency,
        }
    }
}

#[async_trait]
impl SettlementProvider for SimulatedSettlementProvider {
    async fn evaluate(&self, payment: &Payment) -> Result<SettlementDecision, SettlementError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        match self.decline_over {
            Some(threshold) if payment.amount > threshold => Ok(SettlementDecision::Decline {
                reason: format!(
                    "amount {} exceeds approval threshold {}",
                    payment.amount, threshold
                ),
            }),
            _ => Ok(SettlementDecision::Approve),
        }
    }
}
