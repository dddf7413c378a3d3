//! FIX 4.2 gateway: TCP acceptor and per-connection sessions.
//!
//! Each accepted connection runs its own task and session state machine.
//! Sessions decode frames, route orders into the matching engine, persist
//! the results, publish events on the bus, and send execution reports
//! back to whichever session owns each touched order.

pub mod acceptor;
pub mod bus;
pub mod config;
pub mod error;
pub mod router;
pub mod session;
pub mod state;

pub use acceptor::Acceptor;
pub use bus::EventBus;
pub use config::GatewayConfig;
pub use state::Gateway;
