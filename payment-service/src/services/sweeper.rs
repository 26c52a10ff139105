//! Reconciliation sweep for payments stuck in `PENDING`.
//!
//! A settlement task can be lost between enqueue and commit (process crash,
//! dropped queue entry). The sweep guarantees forward progress: any payment
//! pending past the staleness window is requeued for another settlement
//! attempt. Requeuing touches `updated_at` first so one payment is not
//! requeued again before a worker reaches it.

use chrono::Utc;
use service_core::error::AppError;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::services::metrics;
use crate::services::queue::SettlementQueue;
use crate::services::repository::PaymentStore;

#[derive(Debug, Clone)]
pub struct SweepSettings {
    pub interval: Duration,
    pub staleness: Duration,
    pub batch_limit: i64,
}

pub struct ReconciliationSweeper {
    store: Arc<dyn PaymentStore>,
    queue: Arc<dyn SettlementQueue>,
    settings: SweepSettings,
    shutdown_token: CancellationToken,
}

impl ReconciliationSweeper {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        queue: Arc<dyn SettlementQueue>,
        settings: SweepSettings,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            store,
            queue,
            settings,
            shutdown_token,
        }
    }

    pub fn start(self) -> JoinHandle<()> {
        tracing::info!(
            interval_secs = self.settings.interval.as_secs(),
            staleness_secs = self.settings.staleness.as_secs(),
            "Starting reconciliation sweeper"
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.settings.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = self.shutdown_token.cancelled() => {
                        tracing::info!("Reconciliation sweeper shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        match self.sweep_once().await {
                            Ok(0) => {}
                            Ok(requeued) => {
                                tracing::info!(requeued, "Requeued stale pending payments");
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "Reconciliation sweep failed");
                            }
                        }
                    }
                }
            }
        })
    }

    async fn sweep_once(&self) -> Result<usize, AppError> {
        let staleness = chrono::Duration::from_std(self.settings.staleness)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Staleness out of range: {}", e)))?;
        let cutoff = Utc::now() - staleness;

        let stale = self
            .store
            .find_stale_pending(cutoff, self.settings.batch_limit)
            .await?;

        let mut requeued = 0;
        for payment in stale {
            // Skip payments a worker settled between scan and requeue.
            if self.store.touch_pending(payment.id).await? {
                self.queue.enqueue(payment.id).await?;
                metrics::record_sweep_requeue();
                requeued += 1;
            }
        }
        Ok(requeued)
    }
}
