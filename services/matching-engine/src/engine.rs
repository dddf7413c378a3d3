//! Matching engine: symbol → order book registry and submit/cancel entry
//! points.
//!
//! Books are created lazily on first use. The registry allows concurrent
//! readers; each book serializes its own operations behind a mutex, so
//! submissions to the same symbol run one at a time while different
//! symbols match in parallel. No lock is held across an await point and
//! no event publication happens under a book lock.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;
use types::errors::ValidationError;
use types::execution::Execution;
use types::ids::{ExecId, OrderId};
use types::numeric::Price;
use types::order::{OrdKind, Order};

use crate::book::OrderBook;
use crate::validate::{effective_price, validate_new_order, NewOrderRequest};

/// One execution plus the after-fill states of both sides.
#[derive(Debug, Clone)]
pub struct MatchEvent {
    pub execution: Execution,
    pub buy: Order,
    pub sell: Order,
}

/// Result of a successful submission.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    /// Snapshot at acceptance (status New), before any matching.
    pub accepted: Order,
    /// Final state of the submitted order after the sweep (and after a
    /// market residual cancel, when one applies).
    pub order: Order,
    pub matches: Vec<MatchEvent>,
}

/// Result of a cancel request.
#[derive(Debug, Clone)]
pub enum CancelOutcome {
    Canceled(Order),
    NotFound,
}

/// Aggregated per-side depth for one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct BookSnapshot {
    pub symbol: String,
    pub bids: Vec<(Price, u64)>,
    pub asks: Vec<(Price, u64)>,
}

#[derive(Debug, Default)]
pub struct MatchingEngine {
    books: DashMap<String, Arc<Mutex<OrderBook>>>,
    order_seq: AtomicU64,
    exec_seq: AtomicU64,
}

impl MatchingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next order id. Rejected submissions consume ids too, so the
    /// gateway can stamp reject reports with a real OrderID.
    pub fn mint_order_id(&self) -> OrderId {
        OrderId::new(self.order_seq.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Next execution id; every execution report carries a fresh one.
    pub fn mint_exec_id(&self) -> ExecId {
        ExecId::new(self.exec_seq.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Validate, accept, and match an order.
    ///
    /// On success the order was inserted and the sweep has run; market
    /// residuals are already canceled. On validation failure nothing was
    /// inserted and the caller owes the client a Rejected report.
    pub fn submit(&self, req: NewOrderRequest) -> Result<SubmitOutcome, ValidationError> {
        validate_new_order(&req)?;

        let order_id = self.mint_order_id();
        let order = Order::new(
            order_id,
            req.client_order_id.clone(),
            req.symbol.clone(),
            req.side,
            req.kind,
            req.qty,
            effective_price(&req),
            0,
            now_nanos(),
        );

        let book = self.book(&req.symbol);
        let mut book = lock(&book);

        let accepted = book.insert(order);
        let fills = book.match_orders();

        let mut matches = Vec::with_capacity(fills.len());
        let mut submitted_state = accepted.clone();
        for fill in fills {
            if fill.buy.order_id == order_id {
                submitted_state = fill.buy.clone();
            }
            if fill.sell.order_id == order_id {
                submitted_state = fill.sell.clone();
            }
            let exec_id = self.mint_exec_id();
            matches.push(MatchEvent {
                execution: Execution::new(
                    exec_id,
                    fill.buy.order_id,
                    fill.sell.order_id,
                    accepted.symbol.clone(),
                    fill.qty,
                    fill.price,
                    now_nanos(),
                ),
                buy: fill.buy,
                sell: fill.sell,
            });
        }

        // Market orders never rest: cancel whatever the sweep left.
        if accepted.kind == OrdKind::Market && !submitted_state.status.is_terminal() {
            if let Some(canceled) = book.cancel(order_id) {
                submitted_state = canceled;
            }
        }

        debug!(
            symbol = %accepted.symbol,
            order = %order_id,
            fills = matches.len(),
            status = ?submitted_state.status,
            "order submitted"
        );

        Ok(SubmitOutcome {
            accepted,
            order: submitted_state,
            matches,
        })
    }

    /// Cancel an order in `symbol`'s book.
    pub fn cancel(&self, symbol: &str, order_id: OrderId) -> CancelOutcome {
        let Some(book) = self.books.get(symbol).map(|b| Arc::clone(&b)) else {
            return CancelOutcome::NotFound;
        };
        let mut book = lock(&book);
        match book.cancel(order_id) {
            Some(order) => {
                debug!(symbol, order = %order_id, "order canceled");
                CancelOutcome::Canceled(order)
            }
            None => CancelOutcome::NotFound,
        }
    }

    /// Current state of a live order, if it is still resting.
    pub fn live_order(&self, symbol: &str, order_id: OrderId) -> Option<Order> {
        let book = self.books.get(symbol).map(|b| Arc::clone(&b))?;
        let book = lock(&book);
        book.get_order(order_id).cloned()
    }

    /// Aggregated depth for one symbol.
    pub fn snapshot(&self, symbol: &str, levels: usize) -> Option<BookSnapshot> {
        let book = self.books.get(symbol).map(|b| Arc::clone(&b))?;
        let book = lock(&book);
        let (bids, asks) = book.depth(levels);
        Some(BookSnapshot {
            symbol: symbol.to_string(),
            bids,
            asks,
        })
    }

    /// All live orders grouped by symbol, each in arrival order.
    pub fn live_orders_by_symbol(&self) -> Vec<(String, Vec<Order>)> {
        let mut out: Vec<(String, Vec<Order>)> = self
            .books
            .iter()
            .map(|entry| {
                let book = lock(entry.value());
                (entry.key().clone(), book.live_orders())
            })
            .filter(|(_, orders)| !orders.is_empty())
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn best_bid(&self, symbol: &str) -> Option<Price> {
        let book = self.books.get(symbol).map(|b| Arc::clone(&b))?;
        let book = lock(&book);
        book.best_bid()
    }

    pub fn best_ask(&self, symbol: &str) -> Option<Price> {
        let book = self.books.get(symbol).map(|b| Arc::clone(&b))?;
        let book = lock(&book);
        book.best_ask()
    }

    pub fn open_order_count(&self, symbol: &str) -> usize {
        self.books
            .get(symbol)
            .map(|book| lock(book.value()).open_orders())
            .unwrap_or(0)
    }

    fn book(&self, symbol: &str) -> Arc<Mutex<OrderBook>> {
        self.books
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(OrderBook::new(symbol))))
            .clone()
    }
}

/// Lock a book, recovering from a poisoned mutex: the book data is kept
/// consistent by construction even if a panic unwound mid-operation
/// elsewhere, and halting the whole engine would be worse.
fn lock(book: &Mutex<OrderBook>) -> MutexGuard<'_, OrderBook> {
    book.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
