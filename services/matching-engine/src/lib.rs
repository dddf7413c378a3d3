//! Order matching engine.
//!
//! Price-time priority matching over per-symbol books:
//! - strict price priority; FIFO inside a price level
//! - partial fills; market orders take liquidity but never rest
//! - trades print at the resting side's price
//! - quantity is conserved: fills never exceed either order's size
//!
//! The engine guards its registry; each book guards itself, so distinct
//! symbols match in parallel while one symbol's submissions serialize.

pub mod book;
pub mod engine;
pub mod events;
pub mod validate;

pub use engine::{BookSnapshot, CancelOutcome, MatchEvent, MatchingEngine, SubmitOutcome};
pub use validate::{validate_new_order, NewOrderRequest};
