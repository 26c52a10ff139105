//! In-memory store and queue backends.
//!
//! Same contracts as the Postgres/Redis pair, backed by process-local
//! structures. Selected by configuration for single-process development and
//! the hermetic test suite.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use service_core::error::AppError;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::models::{FailureReason, NewPayment, Payment, PaymentStatus};
use crate::services::queue::SettlementQueue;
use crate::services::repository::PaymentStore;

/// Process-local payment store. The reference index entry lock plays the
/// role of the unique constraint: concurrent creates for one reference
/// serialize on it, so exactly one wins.
#[derive(Default)]
pub struct MemoryStore {
    payments: DashMap<Uuid, Payment>,
    reference_index: DashMap<String, Uuid>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn insert_if_absent(&self, draft: NewPayment) -> Result<(Payment, bool), AppError> {
        match self.reference_index.entry(draft.reference.clone()) {
            Entry::Occupied(entry) => {
                let id = *entry.get();
                let existing = self.payments.get(&id).map(|p| p.clone()).ok_or_else(|| {
                    AppError::InternalError(anyhow::anyhow!(
                        "Reference index points at missing payment {}",
                        id
                    ))
                })?;
                Ok((existing, false))
            }
            Entry::Vacant(slot) => {
                let payment = Payment::pending(draft);
                self.payments.insert(payment.id, payment.clone());
                slot.insert(payment.id);
                Ok((payment, true))
            }
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Payment>, AppError> {
        Ok(self.payments.get(&id).map(|p| p.clone()))
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<Payment>, AppError> {
        let Some(id) = self.reference_index.get(reference).map(|e| *e) else {
            return Ok(None);
        };
        self.get(id).await
    }

    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: PaymentStatus,
        new_status: PaymentStatus,
        failure_reason: Option<FailureReason>,
    ) -> Result<bool, AppError> {
        let Some(mut payment) = self.payments.get_mut(&id) else {
            return Ok(false);
        };
        if payment.status != expected {
            return Ok(false);
        }
        payment.status = new_status;
        payment.failure_reason = failure_reason;
        payment.updated_at = Utc::now();
        Ok(true)
    }

    async fn find_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Payment>, AppError> {
        let mut stale: Vec<Payment> = self
            .payments
            .iter()
            .filter(|p| p.status == PaymentStatus::Pending && p.updated_at < cutoff)
            .map(|p| p.clone())
            .collect();
        stale.sort_by_key(|p| p.updated_at);
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }

    async fn touch_pending(&self, id: Uuid) -> Result<bool, AppError> {
        let Some(mut payment) = self.payments.get_mut(&id) else {
            return Ok(false);
        };
        if payment.status != PaymentStatus::Pending {
            return Ok(false);
        }
        payment.updated_at = Utc::now();
        Ok(true)
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}

/// How long a memory dequeue waits before reporting "no work".
const DEQUEUE_WAIT: Duration = Duration::from_millis(500);

/// Process-local queue over an unbounded channel. Workers take turns on the
/// receiver; each lock holder consumes at most one entry.
pub struct MemoryQueue {
    tx: mpsc::UnboundedSender<Uuid>,
    rx: Mutex<mpsc::UnboundedReceiver<Uuid>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SettlementQueue for MemoryQueue {
    async fn enqueue(&self, payment_id: Uuid) -> Result<(), AppError> {
        self.tx
            .send(payment_id)
            .map_err(|_| AppError::InternalError(anyhow::anyhow!("Settlement queue is closed")))
    }

    async fn dequeue(&self) -> Result<Option<Uuid>, AppError> {
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(DEQUEUE_WAIT, rx.recv()).await {
            Ok(received) => Ok(received),
            Err(_) => Ok(None),
        }
    }
}
