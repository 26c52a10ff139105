//! Settlement work queue.

use async_trait::async_trait;
use service_core::error::AppError;
use uuid::Uuid;

/// How long a `dequeue` waits before reporting "no work". Short enough that
/// workers notice shutdown promptly.
const DEQUEUE_WAIT_SECS: usize = 1;

/// Hand-off between the intake gateway and the settlement workers.
///
/// Delivery is at-least-once across the system: an entry lost after
/// `dequeue` is re-submitted by the reconciliation sweep, and duplicate
/// deliveries are neutralized by the store's compare-and-set.
#[async_trait]
pub trait SettlementQueue: Send + Sync {
    async fn enqueue(&self, payment_id: Uuid) -> Result<(), AppError>;

    /// Wait briefly for the next payment id. `None` means no work arrived
    /// within the wait window; callers loop and try again.
    async fn dequeue(&self) -> Result<Option<Uuid>, AppError>;
}

/// Redis-list-backed queue, shared by gateway and worker processes.
pub struct RedisQueue {
    client: redis::Client,
    queue_key: String,
}

impl RedisQueue {
    pub fn new(client: redis::Client, queue_key: impl Into<String>) -> Self {
        Self {
            client,
            queue_key: queue_key.into(),
        }
    }
}

#[async_trait]
impl SettlementQueue for RedisQueue {
    async fn enqueue(&self, payment_id: Uuid) -> Result<(), AppError> {
        let mut con = self.client.get_multiplexed_async_connection().await?;
        let _: () = redis::cmd("LPUSH")
            .arg(&self.queue_key)
            .arg(payment_id.to_string())
            .query_async(&mut con)
            .await?;
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Uuid>, AppError> {
        let mut con = self.client.get_multiplexed_async_connection().await?;
        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(&self.queue_key)
            .arg(DEQUEUE_WAIT_SECS)
            .query_async(&mut con)
            .await?;

        match popped {
            Some((_, raw)) => match Uuid::parse_str(&raw) {
                Ok(id) => Ok(Some(id)),
                Err(_) => {
                    tracing::warn!(payload = %raw, "Dropping malformed queue entry");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }
}
