//! Per-symbol limit order book with price-time priority matching.

pub mod ask_book;
pub mod bid_book;
pub mod price_level;

pub use ask_book::AskBook;
pub use bid_book::BidBook;
pub use price_level::PriceLevel;

use rust_decimal::Decimal;
use std::collections::HashMap;
use types::ids::OrderId;
use types::numeric::Price;
use types::order::{OrdKind, Order, Side};

/// One cross between the current best bid and best ask.
///
/// Carries full after-fill snapshots of both orders so callers can build
/// execution reports without re-entering the book.
#[derive(Debug, Clone)]
pub struct Fill {
    pub qty: u64,
    pub price: Price,
    pub buy: Order,
    pub sell: Order,
}

/// Two-sided book for a single symbol.
///
/// The book exclusively owns its resting orders; completed and canceled
/// orders are removed immediately, so `orders` only ever holds live ones.
#[derive(Debug, Default)]
pub struct OrderBook {
    symbol: String,
    bids: BidBook,
    asks: AskBook,
    orders: HashMap<OrderId, Order>,
    arrival_seq: u64,
}

impl OrderBook {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ..Self::default()
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Accept an order into the book, assigning its arrival sequence.
    ///
    /// Returns the accepted snapshot (status New).
    pub fn insert(&mut self, mut order: Order) -> Order {
        self.arrival_seq += 1;
        order.arrival_seq = self.arrival_seq;

        match order.side {
            Side::Buy => self.bids.insert(order.order_id, order.price, order.remaining()),
            Side::Sell => self.asks.insert(order.order_id, order.price, order.remaining()),
        }
        self.orders.insert(order.order_id, order.clone());
        order
    }

    /// Cancel a live order. Returns the canceled snapshot, or `None` when
    /// the order is unknown (terminal orders leave the book immediately,
    /// so unknown covers both "never existed" and "already done").
    pub fn cancel(&mut self, order_id: OrderId) -> Option<Order> {
        let (side, price, remaining) = {
            let order = self.orders.get(&order_id)?;
            (order.side, order.price, order.remaining())
        };
        let mut order = self.orders.remove(&order_id)?;
        order.mark_canceled();
        match side {
            Side::Buy => self.bids.remove(order_id, price, remaining),
            Side::Sell => self.asks.remove(order_id, price, remaining),
        };
        Some(order)
    }

    /// Cross the top of book until no further match is possible.
    ///
    /// Matching walks both heads: a cross requires a market order on
    /// either side or `bid ≥ ask`. The trade prints at the resting
    /// (earlier-arrival) side's limit price; a market order never sets the
    /// price. Completed orders are popped and emptied levels dropped as
    /// the sweep advances.
    pub fn match_orders(&mut self) -> Vec<Fill> {
        let mut fills = Vec::new();

        loop {
            let Some(buy_id) = self.live_head(Side::Buy) else {
                break;
            };
            let Some(sell_id) = self.live_head(Side::Sell) else {
                break;
            };

            let Some((buy_kind, buy_px, buy_arrival, buy_rem)) = self.order_brief(buy_id) else {
                break;
            };
            let Some((sell_kind, sell_px, sell_arrival, sell_rem)) = self.order_brief(sell_id)
            else {
                break;
            };

            let crosses = buy_kind == OrdKind::Market
                || sell_kind == OrdKind::Market
                || matches!((buy_px, sell_px), (Some(b), Some(s)) if b >= s);
            if !crosses {
                break;
            }

            let price = if buy_arrival <= sell_arrival {
                buy_px.or(sell_px)
            } else {
                sell_px.or(buy_px)
            };
            let Some(price) = price else {
                // Both heads are market orders: no price is discoverable.
                break;
            };

            let qty = buy_rem.min(sell_rem);

            let buy_after = match self.orders.get_mut(&buy_id) {
                Some(order) => {
                    order.add_fill(qty, price);
                    order.clone()
                }
                None => break,
            };
            let sell_after = match self.orders.get_mut(&sell_id) {
                Some(order) => {
                    order.add_fill(qty, price);
                    order.clone()
                }
                None => break,
            };

            self.bids.reduce_head(buy_px, qty);
            self.asks.reduce_head(sell_px, qty);

            if buy_after.is_complete() {
                self.bids.pop_head(0);
                self.orders.remove(&buy_id);
            }
            if sell_after.is_complete() {
                self.asks.pop_head(0);
                self.orders.remove(&sell_id);
            }

            fills.push(Fill {
                qty,
                price,
                buy: buy_after,
                sell: sell_after,
            });
        }

        fills
    }

    /// Head order id on a side, popping any stale entries on the way.
    fn live_head(&mut self, side: Side) -> Option<OrderId> {
        loop {
            let head = match side {
                Side::Buy => self.bids.head(),
                Side::Sell => self.asks.head(),
            }?;
            match self.orders.get(&head) {
                Some(order) if !order.status.is_terminal() => return Some(head),
                Some(order) => {
                    let remaining = order.remaining();
                    match side {
                        Side::Buy => self.bids.pop_head(remaining),
                        Side::Sell => self.asks.pop_head(remaining),
                    }
                    self.orders.remove(&head);
                }
                None => match side {
                    Side::Buy => self.bids.pop_head(0),
                    Side::Sell => self.asks.pop_head(0),
                },
            }
        }
    }

    fn order_brief(&self, order_id: OrderId) -> Option<(OrdKind, Option<Price>, u64, u64)> {
        self.orders
            .get(&order_id)
            .map(|o| (o.kind, o.price, o.arrival_seq, o.remaining()))
    }

    pub fn get_order(&self, order_id: OrderId) -> Option<&Order> {
        self.orders.get(&order_id)
    }

    pub fn open_orders(&self) -> usize {
        self.orders.len()
    }

    /// Live orders in arrival order (snapshot fan-out).
    pub fn live_orders(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self.orders.values().cloned().collect();
        orders.sort_by_key(|o| o.arrival_seq);
        orders
    }

    pub fn best_bid(&self) -> Option<Price> {
        self.bids.best_price()
    }

    pub fn best_ask(&self) -> Option<Price> {
        self.asks.best_price()
    }

    /// Best-ask minus best-bid, when both sides are populated.
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.as_decimal() - bid.as_decimal()),
            _ => None,
        }
    }

    /// Aggregated depth per side, best prices first.
    pub fn depth(&self, levels: usize) -> (Vec<(Price, u64)>, Vec<(Price, u64)>) {
        (self.bids.depth(levels), self.asks.depth(levels))
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::order::OrderStatus;

    fn order(id: u64, side: Side, kind: OrdKind, qty: u64, px: Option<&str>) -> Order {
        Order::new(
            OrderId::new(id),
            format!("CL-{id}"),
            "AAPL",
            side,
            kind,
            qty,
            px.map(|p| Price::parse(p).unwrap()),
            0,
            1_708_123_456_789_000_000,
        )
    }

    fn limit(id: u64, side: Side, qty: u64, px: &str) -> Order {
        order(id, side, OrdKind::Limit, qty, Some(px))
    }

    #[test]
    fn full_fill_at_resting_price() {
        let mut book = OrderBook::new("TSLA");
        book.insert(limit(1, Side::Sell, 100, "250.00"));
        book.insert(limit(2, Side::Buy, 100, "250.00"));

        let fills = book.match_orders();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].qty, 100);
        assert_eq!(fills[0].price, Price::parse("250.00").unwrap());
        assert_eq!(fills[0].buy.status, OrderStatus::Filled);
        assert_eq!(fills[0].sell.status, OrderStatus::Filled);
        assert!(book.is_empty());
        assert_eq!(book.open_orders(), 0);
    }

    #[test]
    fn partial_fill_prints_resting_price() {
        let mut book = OrderBook::new("AAPL");
        book.insert(limit(1, Side::Buy, 100, "180.00"));
        book.insert(limit(2, Side::Sell, 50, "175.00"));

        let fills = book.match_orders();
        assert_eq!(fills.len(), 1);
        // Resting buy arrived first, so the trade prints at 180.00.
        assert_eq!(fills[0].price, Price::parse("180.00").unwrap());
        assert_eq!(fills[0].qty, 50);
        assert_eq!(fills[0].sell.status, OrderStatus::Filled);
        assert_eq!(fills[0].buy.status, OrderStatus::PartiallyFilled);
        assert_eq!(fills[0].buy.filled_qty, 50);

        // Buy residual still resting at 180.00.
        let resting = book.get_order(OrderId::new(1)).unwrap();
        assert_eq!(resting.remaining(), 50);
        assert_eq!(book.best_bid(), Some(Price::parse("180.00").unwrap()));
        assert!(book.best_ask().is_none());
    }

    #[test]
    fn market_order_takes_resting_limit() {
        let mut book = OrderBook::new("GOOGL");
        book.insert(limit(1, Side::Sell, 100, "150.00"));
        book.insert(order(2, Side::Buy, OrdKind::Market, 100, None));

        let fills = book.match_orders();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].price, Price::parse("150.00").unwrap());
        assert_eq!(fills[0].buy.status, OrderStatus::Filled);
        assert_eq!(fills[0].sell.status, OrderStatus::Filled);
        assert!(book.is_empty());
    }

    #[test]
    fn fifo_within_price_level() {
        let mut book = OrderBook::new("AAPL");
        book.insert(limit(1, Side::Buy, 100, "150.00"));
        book.insert(limit(2, Side::Buy, 100, "150.00"));
        book.insert(limit(3, Side::Sell, 100, "150.00"));

        let fills = book.match_orders();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].buy.order_id, OrderId::new(1));

        // The second bid is untouched and still resting.
        let b = book.get_order(OrderId::new(2)).unwrap();
        assert_eq!(b.filled_qty, 0);
        assert_eq!(b.status, OrderStatus::New);
    }

    #[test]
    fn price_priority_across_levels() {
        let mut book = OrderBook::new("MSFT");
        book.insert(limit(1, Side::Sell, 10, "351.00"));
        book.insert(limit(2, Side::Sell, 10, "350.00"));
        book.insert(limit(3, Side::Buy, 10, "351.00"));

        let fills = book.match_orders();
        assert_eq!(fills.len(), 1);
        // Better-priced ask trades first even though it arrived later.
        assert_eq!(fills[0].sell.order_id, OrderId::new(2));
        assert_eq!(fills[0].price, Price::parse("350.00").unwrap());
    }

    #[test]
    fn sweep_crosses_multiple_levels() {
        let mut book = OrderBook::new("AMZN");
        book.insert(limit(1, Side::Sell, 30, "100.00"));
        book.insert(limit(2, Side::Sell, 30, "101.00"));
        book.insert(limit(3, Side::Buy, 50, "101.00"));

        let fills = book.match_orders();
        assert_eq!(fills.len(), 2);
        assert_eq!(fills[0].price, Price::parse("100.00").unwrap());
        assert_eq!(fills[0].qty, 30);
        assert_eq!(fills[1].price, Price::parse("101.00").unwrap());
        assert_eq!(fills[1].qty, 20);

        // Conservation: fills sum to the taker's filled quantity.
        let total: u64 = fills.iter().map(|f| f.qty).sum();
        assert_eq!(total, 50);
        assert_eq!(fills[1].buy.filled_qty, 50);
        assert_eq!(fills[1].buy.status, OrderStatus::Filled);

        // Second ask keeps its residual 10.
        assert_eq!(book.get_order(OrderId::new(2)).unwrap().remaining(), 10);
    }

    #[test]
    fn no_cross_no_fill() {
        let mut book = OrderBook::new("AAPL");
        book.insert(limit(1, Side::Buy, 100, "149.00"));
        book.insert(limit(2, Side::Sell, 100, "151.00"));

        assert!(book.match_orders().is_empty());
        assert_eq!(book.open_orders(), 2);
        assert_eq!(book.spread(), Some(Decimal::from(2)));
    }

    #[test]
    fn cancel_removes_resting_order() {
        let mut book = OrderBook::new("MSFT");
        book.insert(limit(1, Side::Buy, 100, "350.00"));

        let canceled = book.cancel(OrderId::new(1)).unwrap();
        assert_eq!(canceled.status, OrderStatus::Canceled);
        assert!(book.is_empty());
        assert!(book.cancel(OrderId::new(1)).is_none());
    }

    #[test]
    fn canceled_order_never_trades() {
        let mut book = OrderBook::new("AAPL");
        book.insert(limit(1, Side::Buy, 100, "150.00"));
        book.insert(limit(2, Side::Buy, 100, "150.00"));
        book.cancel(OrderId::new(1));
        book.insert(limit(3, Side::Sell, 100, "150.00"));

        let fills = book.match_orders();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].buy.order_id, OrderId::new(2));
    }

    #[test]
    fn unfilled_market_order_rests_until_caller_cancels() {
        let mut book = OrderBook::new("TSLA");
        book.insert(order(1, Side::Buy, OrdKind::Market, 100, None));

        assert!(book.match_orders().is_empty());
        // The engine cancels market residuals right after the sweep.
        let canceled = book.cancel(OrderId::new(1)).unwrap();
        assert_eq!(canceled.status, OrderStatus::Canceled);
        assert!(book.is_empty());
    }
}
