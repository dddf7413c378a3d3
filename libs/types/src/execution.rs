//! Execution records.
//!
//! One record per cross between a buy and a sell order. Executions are
//! immutable once minted by the matching engine.

use crate::ids::{ExecId, OrderId};
use crate::numeric::Price;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub exec_id: ExecId,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub symbol: String,
    pub last_qty: u64,
    pub last_px: Price,
    /// Unix nanoseconds at match time.
    pub executed_at: i64,
}

impl Execution {
    pub fn new(
        exec_id: ExecId,
        buy_order_id: OrderId,
        sell_order_id: OrderId,
        symbol: impl Into<String>,
        last_qty: u64,
        last_px: Price,
        executed_at: i64,
    ) -> Self {
        Self {
            exec_id,
            buy_order_id,
            sell_order_id,
            symbol: symbol.into(),
            last_qty,
            last_px,
            executed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialization_roundtrip() {
        let exec = Execution::new(
            ExecId::new(1),
            OrderId::new(10),
            OrderId::new(11),
            "TSLA",
            100,
            Price::parse("250.00").unwrap(),
            1_708_123_456_789_000_000,
        );
        let json = serde_json::to_string(&exec).unwrap();
        let back: Execution = serde_json::from_str(&json).unwrap();
        assert_eq!(back, exec);
    }
}
