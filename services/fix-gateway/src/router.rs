//! Per-order reply routing.
//!
//! Executions touch two orders that usually belong to different
//! sessions. Each session registers a reply channel for every order it
//! submits; whichever session triggers a match hands the counterparty's
//! report to the router instead of holding any reference to the other
//! session. Routes for closed sessions are reaped lazily on send failure.

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;
use types::ids::OrderId;

use crate::session::OutboundMessage;

pub type ReportSender = mpsc::UnboundedSender<OutboundMessage>;

#[derive(Debug, Default)]
pub struct ReplyRouter {
    routes: DashMap<OrderId, ReportSender>,
}

impl ReplyRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, order_id: OrderId, sender: ReportSender) {
        self.routes.insert(order_id, sender);
    }

    pub fn unregister(&self, order_id: OrderId) {
        self.routes.remove(&order_id);
    }

    /// Deliver a report to the session owning `order_id`.
    ///
    /// Returns false when no live route exists (unknown order, or the
    /// owning session is gone — the order's reports simply stop).
    pub fn route(&self, order_id: OrderId, message: OutboundMessage) -> bool {
        let Some(sender) = self.routes.get(&order_id).map(|s| s.clone()) else {
            return false;
        };
        if sender.send(message).is_err() {
            debug!(order = %order_id, "dropping route to closed session");
            self.routes.remove(&order_id);
            return false;
        }
        true
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }
}
