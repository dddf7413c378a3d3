//! Ask (sell-side) book.
//!
//! Limit orders sit in price levels sorted ascending (best ask first).
//! Market sells queue ahead of every level, mirroring the bid side.

use std::collections::{BTreeMap, VecDeque};
use types::ids::OrderId;
use types::numeric::Price;

use super::price_level::PriceLevel;

#[derive(Debug, Clone, Default)]
pub struct AskBook {
    market: VecDeque<OrderId>,
    levels: BTreeMap<Price, PriceLevel>,
}

impl AskBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, order_id: OrderId, price: Option<Price>, qty: u64) {
        match price {
            Some(px) => self.levels.entry(px).or_default().push(order_id, qty),
            None => self.market.push_back(order_id),
        }
    }

    /// Head of the side: pending market order first, then best limit.
    pub fn head(&self) -> Option<OrderId> {
        self.market
            .front()
            .copied()
            .or_else(|| self.levels.iter().next().and_then(|(_, l)| l.front()))
    }

    /// Remove the head order, dropping its level if emptied.
    pub fn pop_head(&mut self, remaining_qty: u64) {
        if self.market.pop_front().is_some() {
            return;
        }
        if let Some((price, level)) = self.levels.iter_mut().next() {
            let price = *price;
            level.pop_front(remaining_qty);
            if level.is_empty() {
                self.levels.remove(&price);
            }
        }
    }

    /// Reduce the best level's aggregate after a partial fill of its head.
    pub fn reduce_head(&mut self, price: Option<Price>, qty: u64) {
        if let Some(level) = price.and_then(|px| self.levels.get_mut(&px)) {
            level.reduce(qty);
        }
    }

    /// Remove an arbitrary order. Returns true if it was present.
    pub fn remove(&mut self, order_id: OrderId, price: Option<Price>, remaining_qty: u64) -> bool {
        match price {
            Some(px) => {
                if let Some(level) = self.levels.get_mut(&px) {
                    let removed = level.remove(order_id, remaining_qty);
                    if removed && level.is_empty() {
                        self.levels.remove(&px);
                    }
                    removed
                } else {
                    false
                }
            }
            None => {
                let before = self.market.len();
                self.market.retain(|id| *id != order_id);
                self.market.len() < before
            }
        }
    }

    /// Lowest resting limit price.
    pub fn best_price(&self) -> Option<Price> {
        self.levels.keys().next().copied()
    }

    /// Aggregated depth, best price first.
    pub fn depth(&self, levels: usize) -> Vec<(Price, u64)> {
        self.levels
            .iter()
            .take(levels)
            .map(|(price, level)| (*price, level.resting_qty()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.market.is_empty() && self.levels.is_empty()
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }
}
