//! Order lifecycle model.
//!
//! Side, kind, and status enums map one-to-one onto their FIX codes
//! (tags 54, 40, 39). Storage and events carry the codes; rendering
//! "Buy"/"Filled" strings is left to presentation layers.

use crate::ids::OrderId;
use crate::numeric::Price;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side (tag 54).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_fix(&self) -> char {
        match self {
            Side::Buy => '1',
            Side::Sell => '2',
        }
    }

    pub fn from_fix(code: &str) -> Option<Self> {
        match code {
            "1" => Some(Side::Buy),
            "2" => Some(Side::Sell),
            _ => None,
        }
    }
}

/// Order type (tag 40). Only Market and Limit are supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrdKind {
    Market,
    Limit,
}

impl OrdKind {
    pub fn as_fix(&self) -> char {
        match self {
            OrdKind::Market => '1',
            OrdKind::Limit => '2',
        }
    }

    pub fn from_fix(code: &str) -> Option<Self> {
        match code {
            "1" => Some(OrdKind::Market),
            "2" => Some(OrdKind::Limit),
            _ => None,
        }
    }
}

/// Order status (tag 39).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
}

impl OrderStatus {
    /// Terminal orders never re-enter the book.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected
        )
    }

    pub fn as_fix(&self) -> char {
        match self {
            OrderStatus::New => '0',
            OrderStatus::PartiallyFilled => '1',
            OrderStatus::Filled => '2',
            OrderStatus::Canceled => '4',
            OrderStatus::Rejected => '8',
        }
    }

    pub fn from_fix(code: &str) -> Option<Self> {
        match code {
            "0" => Some(OrderStatus::New),
            "1" => Some(OrderStatus::PartiallyFilled),
            "2" => Some(OrderStatus::Filled),
            "4" => Some(OrderStatus::Canceled),
            "8" => Some(OrderStatus::Rejected),
            _ => None,
        }
    }
}

/// A single order as tracked by the book.
///
/// `arrival_seq` is assigned at book insertion and breaks ties inside a
/// price level (earlier arrival trades first). `cum_notional` accumulates
/// `fill qty × fill px` so execution reports can carry a true average
/// price (tag 6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub kind: OrdKind,
    pub qty: u64,
    pub filled_qty: u64,
    pub price: Option<Price>,
    pub status: OrderStatus,
    pub arrival_seq: u64,
    pub created_at: i64,
    pub cum_notional: Decimal,
}

impl Order {
    pub fn new(
        order_id: OrderId,
        client_order_id: impl Into<String>,
        symbol: impl Into<String>,
        side: Side,
        kind: OrdKind,
        qty: u64,
        price: Option<Price>,
        arrival_seq: u64,
        created_at: i64,
    ) -> Self {
        Self {
            order_id,
            client_order_id: client_order_id.into(),
            symbol: symbol.into(),
            side,
            kind,
            qty,
            filled_qty: 0,
            price,
            status: OrderStatus::New,
            arrival_seq,
            created_at,
            cum_notional: Decimal::ZERO,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.qty - self.filled_qty
    }

    pub fn is_complete(&self) -> bool {
        self.filled_qty >= self.qty
    }

    /// Apply a fill and advance the status.
    ///
    /// # Panics
    /// Panics if the fill would exceed the order quantity; the matcher
    /// always clamps fills to `min(remaining)` so this is unreachable from
    /// the public surface.
    pub fn add_fill(&mut self, fill_qty: u64, fill_px: Price) {
        assert!(
            self.filled_qty + fill_qty <= self.qty,
            "fill would exceed order quantity"
        );
        self.filled_qty += fill_qty;
        self.cum_notional += fill_px.notional(fill_qty);
        self.status = if self.is_complete() {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
    }

    /// Mark the order canceled. Returns false if it was already terminal.
    pub fn mark_canceled(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = OrderStatus::Canceled;
        true
    }

    /// Average fill price, zero while nothing has filled.
    pub fn avg_px(&self) -> Decimal {
        if self.filled_qty == 0 {
            Decimal::ZERO
        } else {
            self.cum_notional / Decimal::from(self.filled_qty)
        }
    }
}
