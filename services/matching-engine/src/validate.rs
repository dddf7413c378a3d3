//! Pre-trade validation.
//!
//! Stateless checks applied to every New Order Single before it touches a
//! book. The first failing check wins; a failed order is rejected and
//! never inserted.

use rust_decimal::Decimal;
use types::errors::ValidationError;
use types::numeric::Price;
use types::order::{OrdKind, Side};
use types::symbol;

/// A decoded, not-yet-validated order submission.
#[derive(Debug, Clone)]
pub struct NewOrderRequest {
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub kind: OrdKind,
    pub qty: u64,
    /// Raw decimal from tag 44; may be non-positive until validated.
    pub price: Option<Decimal>,
}

/// Validate an order submission.
///
/// Checks performed (in order):
/// 1. symbol is listed
/// 2. quantity is positive
/// 3. limit orders carry a positive price
pub fn validate_new_order(req: &NewOrderRequest) -> Result<(), ValidationError> {
    if !symbol::is_listed(&req.symbol) {
        return Err(ValidationError::InvalidSymbol(req.symbol.clone()));
    }

    if req.qty == 0 {
        return Err(ValidationError::InvalidQuantity(req.qty.to_string()));
    }

    if req.kind == OrdKind::Limit {
        let px = req
            .price
            .ok_or(ValidationError::MissingField(44))?;
        if px <= Decimal::ZERO {
            return Err(ValidationError::InvalidPrice(px.to_string()));
        }
    }

    Ok(())
}

/// Wire price for a validated request: limit price, or none for market.
pub fn effective_price(req: &NewOrderRequest) -> Option<Price> {
    match req.kind {
        OrdKind::Market => None,
        OrdKind::Limit => req.price.and_then(Price::try_new),
    }
}
