//! Events fanned out to subscribers after engine operations commit.
//!
//! The JSON envelope is `{type, data, timestamp, event_id}` with
//! snake_case type labels, so dashboards and push feeds can route on
//! `type` without knowing the payload shape. Statuses and sides inside
//! the payloads are domain values; converting them to display strings is
//! the consumer's job.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use types::execution::Execution;
use types::ids::OrderId;
use types::numeric::Price;
use types::order::{Order, OrderStatus};
use uuid::Uuid;

/// Aggregated depth entry carried by snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthLevel {
    pub price: Price,
    pub qty: u64,
}

/// Event payloads, tagged for the wire envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ExchangeEvent {
    /// Sent once per subscriber on attach: live orders grouped per symbol
    /// and side, plus the most recent executions.
    Snapshot {
        buy_orders: BTreeMap<String, Vec<Order>>,
        sell_orders: BTreeMap<String, Vec<Order>>,
        recent_executions: Vec<Execution>,
    },
    NewOrder {
        order: Order,
    },
    CancelOrder {
        order_id: OrderId,
        status: OrderStatus,
    },
    Execution {
        execution: Execution,
        order_states: Vec<Order>,
    },
}

impl ExchangeEvent {
    pub fn label(&self) -> &'static str {
        match self {
            ExchangeEvent::Snapshot { .. } => "snapshot",
            ExchangeEvent::NewOrder { .. } => "new_order",
            ExchangeEvent::CancelOrder { .. } => "cancel_order",
            ExchangeEvent::Execution { .. } => "execution",
        }
    }
}

/// A published event with its envelope metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    #[serde(flatten)]
    pub event: ExchangeEvent,
    /// Unix nanoseconds at publish time.
    pub timestamp: i64,
    pub event_id: Uuid,
}

impl EventMessage {
    pub fn new(event: ExchangeEvent, timestamp: i64) -> Self {
        Self {
            event,
            timestamp,
            event_id: Uuid::now_v7(),
        }
    }
}
