//! Validation error taxonomy.
//!
//! Every variant maps to a reject text carried back to the client in an
//! execution report (tag 58). The messages deliberately match what the
//! exchange has always sent, so downstream certification suites keep
//! passing.

use thiserror::Error;

/// Pre-trade validation failures for New Order Single.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Missing required field: {0}")]
    MissingField(u32),

    #[error("Duplicate ClOrdID: {0}")]
    DuplicateClOrdId(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_texts() {
        assert_eq!(
            ValidationError::InvalidSymbol("INVALID".into()).to_string(),
            "Invalid symbol: INVALID"
        );
        assert_eq!(
            ValidationError::InvalidQuantity("0".into()).to_string(),
            "Invalid quantity: 0"
        );
        assert_eq!(
            ValidationError::InvalidPrice("-10.00".into()).to_string(),
            "Invalid price: -10.00"
        );
        assert_eq!(
            ValidationError::MissingField(55).to_string(),
            "Missing required field: 55"
        );
        assert_eq!(
            ValidationError::DuplicateClOrdId("CL-1".into()).to_string(),
            "Duplicate ClOrdID: CL-1"
        );
    }
}
