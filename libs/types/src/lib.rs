//! Shared domain types for the exchange core.
//!
//! Everything that crosses a crate boundary lives here: identifiers,
//! the price newtype, the order lifecycle model, execution records,
//! the listed-symbol table, and the validation error taxonomy.
//!
//! Sides, order kinds, and statuses carry their FIX wire codes; anything
//! human-readable is a presentation concern downstream.

pub mod errors;
pub mod execution;
pub mod ids;
pub mod numeric;
pub mod order;
pub mod symbol;
