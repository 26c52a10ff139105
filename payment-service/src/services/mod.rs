pub mod memory;
pub mod metrics;
pub mod queue;
pub mod repository;
pub mod settlement;
pub mod sweeper;
pub mod worker;

pub use memory::{MemoryQueue, MemoryStore};
pub use metrics::{get_metrics, init_metrics};
pub use queue::{RedisQueue, SettlementQueue};
pub use repository::{PaymentStore, PostgresStore};
pub use settlement::{HttpSettlementProvider, SettlementProvider, SimulatedSettlementProvider};
pub use sweeper::ReconciliationSweeper;
pub use worker::SettlementWorkerPool;
