//! The persistence port.

use thiserror::Error;
use types::execution::Execution;
use types::ids::OrderId;
use types::order::{Order, OrderStatus};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt journal record: {0}")]
    Corrupt(String),
}

/// Aggregate counters over everything persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreStats {
    pub total_orders: usize,
    pub filled_orders: usize,
    /// Sum of executed quantities.
    pub total_volume: u64,
}

/// Append-only sink for order states and executions, with query helpers.
///
/// `save_order` is idempotent per order id: saving the same id again
/// overwrites with the latest state. Implementations synchronize
/// internally; all methods take `&self`.
pub trait ExchangeStore: Send + Sync {
    fn save_order(&self, order: &Order) -> Result<(), StoreError>;
    fn save_execution(&self, execution: &Execution) -> Result<(), StoreError>;

    fn find_order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError>;
    fn orders_by_symbol(&self, symbol: &str) -> Result<Vec<Order>, StoreError>;
    fn orders_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, StoreError>;
    /// Most recent executions, newest first.
    fn recent_executions(&self, limit: usize) -> Result<Vec<Execution>, StoreError>;
    fn count_orders(&self) -> Result<usize, StoreError>;
    fn stats(&self) -> Result<StoreStats, StoreError>;
}
