//! Settlement worker pool.
//!
//! Workers pull payment ids from the shared queue, ask the settlement
//! provider for a verdict, and commit exactly one terminal transition
//! through the store's compare-and-set. A redelivered payment that is
//! already terminal is acknowledged without side effects.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use service_core::error::AppError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::{FailureReason, Payment, PaymentStatus};
use crate::services::metrics;
use crate::services::queue::SettlementQueue;
use crate::services::repository::PaymentStore;
use crate::services::settlement::{SettlementDecision, SettlementError, SettlementProvider};

/// Pause after a queue error so a dead broker does not spin the loop.
const DEQUEUE_ERROR_PAUSE: Duration = Duration::from_secs(1);

/// Bounded retry budget for transient provider errors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_delay,
            max_interval: self.max_delay,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }
}

pub struct SettlementWorkerPool {
    store: Arc<dyn PaymentStore>,
    queue: Arc<dyn SettlementQueue>,
    provider: Arc<dyn SettlementProvider>,
    worker_count: usize,
    retry: RetryPolicy,
    shutdown_token: CancellationToken,
}

impl SettlementWorkerPool {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        queue: Arc<dyn SettlementQueue>,
        provider: Arc<dyn SettlementProvider>,
        worker_count: usize,
        retry: RetryPolicy,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            store,
            queue,
            provider,
            worker_count,
            retry,
            shutdown_token,
        }
    }

    /// Spawn the workers. Each handle resolves once the shutdown token fires.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        tracing::info!(worker_count = self.worker_count, "Starting settlement worker pool");

        (0..self.worker_count)
            .map(|worker_id| {
                let worker = SettlementWorker {
                    id: worker_id,
                    store: self.store.clone(),
                    queue: self.queue.clone(),
                    provider: self.provider.clone(),
                    retry: self.retry.clone(),
                    shutdown: self.shutdown_token.clone(),
                };
                tokio::spawn(async move { worker.run().await })
            })
            .collect()
    }

    pub fn shutdown(&self) {
        tracing::info!("Initiating settlement worker pool shutdown");
        self.shutdown_token.cancel();
    }
}

struct SettlementWorker {
    id: usize,
    store: Arc<dyn PaymentStore>,
    queue: Arc<dyn SettlementQueue>,
    provider: Arc<dyn SettlementProvider>,
    retry: RetryPolicy,
    shutdown: CancellationToken,
}

impl SettlementWorker {
    async fn run(&self) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!(worker_id = self.id, "Settlement worker shutting down");
                    break;
                }
                dequeued = self.queue.dequeue() => {
                    match dequeued {
                        Ok(Some(payment_id)) => {
                            if let Err(e) = self.settle(payment_id).await {
                                tracing::error!(
                                    worker_id = self.id,
                                    payment_id = %payment_id,
                                    error = %e,
                                    "Settlement attempt failed, payment stays pending for the sweep"
                                );
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            tracing::error!(worker_id = self.id, error = %e, "Queue dequeue failed");
                            tokio::time::sleep(DEQUEUE_ERROR_PAUSE).await;
                        }
                    }
                }
            }
        }
    }

    /// Process one delivery end to end.
    async fn settle(&self, payment_id: Uuid) -> Result<(), AppError> {
        let started = Instant::now();

        let Some(payment) = self.store.get(payment_id).await? else {
            tracing::warn!(payment_id = %payment_id, "Dequeued unknown payment, skipping");
            return Ok(());
        };
        if payment.status.is_terminal() {
            tracing::debug!(
                payment_id = %payment_id,
                status = %payment.status,
                "Payment already settled, skipping redelivery"
            );
            return Ok(());
        }

        let (target, failure_reason) = match self.evaluate_with_retry(&payment).await {
            Ok(SettlementDecision::Approve) => (PaymentStatus::Success, None),
            Ok(SettlementDecision::Decline { reason }) => {
                tracing::info!(payment_id = %payment_id, reason = %reason, "Settlement declined");
                (PaymentStatus::Failed, Some(FailureReason::Declined))
            }
            Err(SettlementError::Terminal(e)) => {
                tracing::warn!(payment_id = %payment_id, error = %e, "Provider rejected evaluation");
                (PaymentStatus::Failed, Some(FailureReason::ProviderRejected))
            }
            Err(SettlementError::Transient(e)) => {
                tracing::warn!(payment_id = %payment_id, error = %e, "Settlement retry budget exhausted");
                (PaymentStatus::Failed, Some(FailureReason::RetriesExhausted))
            }
        };

        let committed = self
            .store
            .compare_and_set_status(payment_id, PaymentStatus::Pending, target, failure_reason)
            .await?;

        if committed {
            metrics::record_settlement(target.as_str(), started.elapsed().as_secs_f64());
            tracing::info!(
                worker_id = self.id,
                payment_id = %payment_id,
                status = %target,
                "Settlement committed"
            );
        } else {
            tracing::debug!(
                payment_id = %payment_id,
                "Lost settlement race, another worker committed first"
            );
        }
        Ok(())
    }

    /// Ask the provider for a verdict, absorbing transient failures with
    /// jittered exponential backoff up to the attempt budget.
    async fn evaluate_with_retry(
        &self,
        payment: &Payment,
    ) -> Result<SettlementDecision, SettlementError> {
        let mut backoff = self.retry.backoff();
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.provider.evaluate(payment).await {
                Ok(decision) => return Ok(decision),
                Err(SettlementError::Terminal(e)) => return Err(SettlementError::Terminal(e)),
                Err(SettlementError::Transient(e)) => {
                    if attempt >= self.retry.max_attempts {
                        return Err(SettlementError::Transient(e));
                    }
                    let delay = backoff.next_backoff().unwrap_or(self.retry.max_delay);
                    tracing::warn!(
                        payment_id = %payment.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient settlement error, will retry"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewPayment;
    use crate::services::memory::{MemoryQueue, MemoryStore};
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    /// Plays back a scripted sequence of evaluation results, then approves.
    struct ScriptedProvider {
        script: Mutex<VecDeque<Result<SettlementDecision, SettlementError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<SettlementDecision, SettlementError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SettlementProvider for ScriptedProvider {
        async fn evaluate(
            &self,
            _payment: &Payment,
        ) -> Result<SettlementDecision, SettlementError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .await
                .pop_front()
                .unwrap_or(Ok(SettlementDecision::Approve))
        }
    }

    fn transient() -> Result<SettlementDecision, SettlementError> {
        Err(SettlementError::Transient(anyhow::anyhow!("provider down")))
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    async fn worker_with(
        provider: Arc<ScriptedProvider>,
        retry: RetryPolicy,
    ) -> (SettlementWorker, Arc<MemoryStore>, Payment) {
        let store = Arc::new(MemoryStore::new());
        let (payment, _) = store
            .insert_if_absent(NewPayment {
                reference: "order-1".to_string(),
                amount: Decimal::new(10_000, 2),
                currency: "USD".to_string(),
            })
            .await
            .unwrap();

        let worker = SettlementWorker {
            id: 0,
            store: store.clone(),
            queue: Arc::new(MemoryQueue::new()),
            provider,
            retry,
            shutdown: CancellationToken::new(),
        };
        (worker, store, payment)
    }

    #[tokio::test]
    async fn approval_commits_success() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(SettlementDecision::Approve)]));
        let (worker, store, payment) = worker_with(provider.clone(), fast_retry(3)).await;

        worker.settle(payment.id).await.unwrap();

        let stored = store.get(payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Success);
        assert_eq!(stored.failure_reason, None);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn decline_commits_failed_with_reason() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(SettlementDecision::Decline {
            reason: "insufficient funds".to_string(),
        })]));
        let (worker, store, payment) = worker_with(provider, fast_retry(3)).await;

        worker.settle(payment.id).await.unwrap();

        let stored = store.get(payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Failed);
        assert_eq!(stored.failure_reason, Some(FailureReason::Declined));
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            transient(),
            transient(),
            Ok(SettlementDecision::Approve),
        ]));
        let (worker, store, payment) = worker_with(provider.clone(), fast_retry(5)).await;

        worker.settle(payment.id).await.unwrap();

        let stored = store.get(payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Success);
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_commit_failed() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            transient(),
            transient(),
            transient(),
        ]));
        let (worker, store, payment) = worker_with(provider.clone(), fast_retry(3)).await;

        worker.settle(payment.id).await.unwrap();

        let stored = store.get(payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Failed);
        assert_eq!(stored.failure_reason, Some(FailureReason::RetriesExhausted));
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn terminal_provider_errors_fail_without_retry() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(SettlementError::Terminal(
            anyhow::anyhow!("unsupported payment shape"),
        ))]));
        let (worker, store, payment) = worker_with(provider.clone(), fast_retry(5)).await;

        worker.settle(payment.id).await.unwrap();

        let stored = store.get(payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Failed);
        assert_eq!(stored.failure_reason, Some(FailureReason::ProviderRejected));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn redelivery_of_settled_payment_is_a_noop() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(SettlementDecision::Approve)]));
        let (worker, store, payment) = worker_with(provider.clone(), fast_retry(3)).await;

        worker.settle(payment.id).await.unwrap();
        worker.settle(payment.id).await.unwrap();

        let stored = store.get(payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Success);
        // The second delivery never reached the provider.
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn unknown_payment_ids_are_skipped() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let (worker, _store, _payment) = worker_with(provider.clone(), fast_retry(3)).await;

        worker.settle(Uuid::new_v4()).await.unwrap();
        assert_eq!(provider.calls(), 0);
    }
}
