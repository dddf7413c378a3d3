//! Shared gateway state: engine, store, bus, and reply routing.

use matching_engine::events::{EventMessage, ExchangeEvent};
use matching_engine::MatchingEngine;
use persistence::{ExchangeStore, JournalStore, MemoryStore, StoreError};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tracing::{info, warn};
use types::execution::Execution;
use types::order::{Order, Side};

use crate::bus::EventBus;
use crate::config::GatewayConfig;
use crate::router::ReplyRouter;

pub struct Gateway {
    pub config: GatewayConfig,
    pub engine: MatchingEngine,
    pub store: Arc<dyn ExchangeStore>,
    pub bus: EventBus,
    pub router: ReplyRouter,
}

impl Gateway {
    /// Build the gateway, picking the store from the configuration.
    pub fn new(config: GatewayConfig) -> Result<Self, StoreError> {
        let store: Arc<dyn ExchangeStore> = match &config.journal_dir {
            Some(dir) => {
                let store = JournalStore::open(dir)?;
                info!(
                    dir = %dir.display(),
                    replayed = store.replayed_records(),
                    "journal store opened"
                );
                Arc::new(store)
            }
            None => Arc::new(MemoryStore::new()),
        };
        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: GatewayConfig, store: Arc<dyn ExchangeStore>) -> Self {
        let bus = EventBus::new(config.bus_capacity);
        Self {
            config,
            engine: MatchingEngine::new(),
            store,
            bus,
            router: ReplyRouter::new(),
        }
    }

    /// Subscribe to the event stream.
    ///
    /// New subscribers get a snapshot of the current book and recent
    /// executions first, then live events from this instant on.
    pub fn attach(&self) -> (EventMessage, broadcast::Receiver<EventMessage>) {
        let rx = self.bus.subscribe();
        let snapshot = EventMessage::new(self.snapshot_event(), now_nanos());
        (snapshot, rx)
    }

    fn snapshot_event(&self) -> ExchangeEvent {
        let mut buy_orders: BTreeMap<String, Vec<Order>> = BTreeMap::new();
        let mut sell_orders: BTreeMap<String, Vec<Order>> = BTreeMap::new();
        for (symbol, orders) in self.engine.live_orders_by_symbol() {
            for order in orders {
                let side = match order.side {
                    Side::Buy => &mut buy_orders,
                    Side::Sell => &mut sell_orders,
                };
                side.entry(symbol.clone()).or_default().push(order);
            }
        }

        let recent_executions = self
            .store
            .recent_executions(self.config.snapshot_executions)
            .unwrap_or_else(|err| {
                warn!(%err, "snapshot could not read recent executions");
                Vec::new()
            });

        ExchangeEvent::Snapshot {
            buy_orders,
            sell_orders,
            recent_executions,
        }
    }

    /// Persist an order state. Store failures are logged, never fatal:
    /// the matching path has already committed.
    pub fn persist_order(&self, order: &Order) {
        if let Err(err) = self.store.save_order(order) {
            warn!(order = %order.order_id, %err, "order persistence failed");
        }
    }

    pub fn persist_execution(&self, execution: &Execution) {
        if let Err(err) = self.store.save_execution(execution) {
            warn!(exec = %execution.exec_id, %err, "execution persistence failed");
        }
    }
}

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use matching_engine::NewOrderRequest;
    use rust_decimal::Decimal;
    use types::order::OrdKind;

    fn gateway() -> Gateway {
        Gateway::with_store(GatewayConfig::default(), Arc::new(MemoryStore::new()))
    }

    fn limit(cl: &str, side: Side, qty: u64, px: u64) -> NewOrderRequest {
        NewOrderRequest {
            client_order_id: cl.to_string(),
            symbol: "AAPL".to_string(),
            side,
            kind: OrdKind::Limit,
            qty,
            price: Some(Decimal::from(px)),
        }
    }

    #[test]
    fn snapshot_groups_live_orders_by_side() {
        let gw = gateway();
        gw.engine.submit(limit("B", Side::Buy, 100, 150)).unwrap();
        gw.engine.submit(limit("S", Side::Sell, 50, 155)).unwrap();

        let (snapshot, _rx) = gw.attach();
        match snapshot.event {
            ExchangeEvent::Snapshot {
                buy_orders,
                sell_orders,
                ..
            } => {
                assert_eq!(buy_orders["AAPL"].len(), 1);
                assert_eq!(sell_orders["AAPL"].len(), 1);
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
    }

    #[test]
    fn persist_failures_do_not_panic() {
        struct FailingStore;
        impl ExchangeStore for FailingStore {
            fn save_order(&self, _: &Order) -> Result<(), StoreError> {
                Err(StoreError::Serialization("down".into()))
            }
            fn save_execution(&self, _: &Execution) -> Result<(), StoreError> {
                Err(StoreError::Serialization("down".into()))
            }
            fn find_order(
                &self,
                _: types::ids::OrderId,
            ) -> Result<Option<Order>, StoreError> {
                Ok(None)
            }
            fn orders_by_symbol(&self, _: &str) -> Result<Vec<Order>, StoreError> {
                Ok(Vec::new())
            }
            fn orders_by_status(
                &self,
                _: types::order::OrderStatus,
            ) -> Result<Vec<Order>, StoreError> {
                Ok(Vec::new())
            }
            fn recent_executions(&self, _: usize) -> Result<Vec<Execution>, StoreError> {
                Err(StoreError::Serialization("down".into()))
            }
            fn count_orders(&self) -> Result<usize, StoreError> {
                Ok(0)
            }
            fn stats(&self) -> Result<persistence::StoreStats, StoreError> {
                Ok(persistence::StoreStats::default())
            }
        }

        let gw = Gateway::with_store(GatewayConfig::default(), Arc::new(FailingStore));
        let outcome = gw.engine.submit(limit("B", Side::Buy, 10, 150)).unwrap();
        gw.persist_order(&outcome.order);

        // Snapshot still forms even when the store is failing.
        let (snapshot, _rx) = gw.attach();
        assert!(matches!(snapshot.event, ExchangeEvent::Snapshot { .. }));
    }
}
