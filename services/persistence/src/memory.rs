//! In-memory store.
//!
//! Indexes live behind RwLocks so sessions on different tasks can save
//! and query concurrently. Executions append to a vec in arrival order.

use std::collections::HashMap;
use std::sync::RwLock;

use types::execution::Execution;
use types::ids::OrderId;
use types::order::{Order, OrderStatus};

use crate::store::{ExchangeStore, StoreError, StoreStats};

#[derive(Debug, Default)]
pub struct MemoryStore {
    orders: RwLock<HashMap<OrderId, Order>>,
    executions: RwLock<Vec<Execution>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExchangeStore for MemoryStore {
    fn save_order(&self, order: &Order) -> Result<(), StoreError> {
        let mut orders = self.orders.write().unwrap_or_else(|e| e.into_inner());
        orders.insert(order.order_id, order.clone());
        Ok(())
    }

    fn save_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        let mut executions = self.executions.write().unwrap_or_else(|e| e.into_inner());
        executions.push(execution.clone());
        Ok(())
    }

    fn find_order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        let orders = self.orders.read().unwrap_or_else(|e| e.into_inner());
        Ok(orders.get(&order_id).cloned())
    }

    fn orders_by_symbol(&self, symbol: &str) -> Result<Vec<Order>, StoreError> {
        let orders = self.orders.read().unwrap_or_else(|e| e.into_inner());
        let mut found: Vec<Order> = orders
            .values()
            .filter(|o| o.symbol == symbol)
            .cloned()
            .collect();
        found.sort_by_key(|o| o.order_id);
        Ok(found)
    }

    fn orders_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, StoreError> {
        let orders = self.orders.read().unwrap_or_else(|e| e.into_inner());
        let mut found: Vec<Order> = orders
            .values()
            .filter(|o| o.status == status)
            .cloned()
            .collect();
        found.sort_by_key(|o| o.order_id);
        Ok(found)
    }

    fn recent_executions(&self, limit: usize) -> Result<Vec<Execution>, StoreError> {
        let executions = self.executions.read().unwrap_or_else(|e| e.into_inner());
        Ok(executions.iter().rev().take(limit).cloned().collect())
    }

    fn count_orders(&self) -> Result<usize, StoreError> {
        let orders = self.orders.read().unwrap_or_else(|e| e.into_inner());
        Ok(orders.len())
    }

    fn stats(&self) -> Result<StoreStats, StoreError> {
        let orders = self.orders.read().unwrap_or_else(|e| e.into_inner());
        let executions = self.executions.read().unwrap_or_else(|e| e.into_inner());
        Ok(StoreStats {
            total_orders: orders.len(),
            filled_orders: orders
                .values()
                .filter(|o| o.status == OrderStatus::Filled)
                .count(),
            total_volume: executions.iter().map(|e| e.last_qty).sum(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::ids::ExecId;
    use types::numeric::Price;
    use types::order::{OrdKind, Side};

    fn order(id: u64, symbol: &str, status: OrderStatus) -> Order {
        let mut o = Order::new(
            OrderId::new(id),
            format!("CL-{id}"),
            symbol,
            Side::Buy,
            OrdKind::Limit,
            100,
            Some(Price::from_u64(150)),
            id,
            0,
        );
        o.status = status;
        o
    }

    fn execution(id: u64, qty: u64) -> Execution {
        Execution::new(
            ExecId::new(id),
            OrderId::new(1),
            OrderId::new(2),
            "AAPL",
            qty,
            Price::from_u64(150),
            id as i64,
        )
    }

    #[test]
    fn save_order_is_idempotent_per_id() {
        let store = MemoryStore::new();
        store.save_order(&order(1, "AAPL", OrderStatus::New)).unwrap();
        store
            .save_order(&order(1, "AAPL", OrderStatus::Filled))
            .unwrap();

        assert_eq!(store.count_orders().unwrap(), 1);
        let found = store.find_order(OrderId::new(1)).unwrap().unwrap();
        assert_eq!(found.status, OrderStatus::Filled);
    }

    #[test]
    fn queries_filter_and_sort() {
        let store = MemoryStore::new();
        store.save_order(&order(2, "AAPL", OrderStatus::New)).unwrap();
        store.save_order(&order(1, "AAPL", OrderStatus::Filled)).unwrap();
        store.save_order(&order(3, "TSLA", OrderStatus::New)).unwrap();

        let aapl = store.orders_by_symbol("AAPL").unwrap();
        assert_eq!(aapl.len(), 2);
        assert!(aapl[0].order_id < aapl[1].order_id);

        let open = store.orders_by_status(OrderStatus::New).unwrap();
        assert_eq!(open.len(), 2);
        assert!(store.orders_by_symbol("MSFT").unwrap().is_empty());
    }

    #[test]
    fn recent_executions_newest_first() {
        let store = MemoryStore::new();
        for i in 1..=5 {
            store.save_execution(&execution(i, 10)).unwrap();
        }
        let recent = store.recent_executions(3).unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].exec_id, ExecId::new(5));
        assert_eq!(recent[2].exec_id, ExecId::new(3));
    }

    #[test]
    fn stats_aggregate() {
        let store = MemoryStore::new();
        store.save_order(&order(1, "AAPL", OrderStatus::Filled)).unwrap();
        store.save_order(&order(2, "AAPL", OrderStatus::New)).unwrap();
        store.save_execution(&execution(1, 60)).unwrap();
        store.save_execution(&execution(2, 40)).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_orders, 2);
        assert_eq!(stats.filled_orders, 1);
        assert_eq!(stats.total_volume, 100);
    }
}
