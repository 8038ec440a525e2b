//! Trade request validation.
//!
//! Only the request *shape* is checked here; seller capacity is the
//! execution engine's concern because it can change between validation and
//! execution.

use serde::Deserialize;

use crate::error::EngineError;
use crate::registry::household::Priority;

/// A request to buy energy from a specific seller.
#[derive(Debug, Clone, Deserialize)]
pub struct TradeRequest {
    pub buyer: String,
    pub seller: String,
    /// Energy to transfer (kWh, > 0).
    pub amount_kwh: f64,
    /// Highest unit price the buyer accepts.
    pub max_price_per_kwh: f64,
    #[serde(default)]
    pub priority: Priority,
}

/// Checks request shape and returns a normalized copy (ids trimmed).
///
/// # Errors
///
/// Returns [`EngineError::Validation`] with a specific reason for a missing
/// id, a self-trade, or a non-positive amount or price.
pub fn validate(request: &TradeRequest) -> Result<TradeRequest, EngineError> {
    let buyer = request.buyer.trim();
    let seller = request.seller.trim();

    if buyer.is_empty() {
        return Err(EngineError::validation("buyer id is required"));
    }
    if seller.is_empty() {
        return Err(EngineError::validation("seller id is required"));
    }
    if buyer == seller {
        return Err(EngineError::validation(
            "buyer and seller must be different households",
        ));
    }
    if !request.amount_kwh.is_finite() || request.amount_kwh <= 0.0 {
        return Err(EngineError::validation("energy amount must be > 0"));
    }
    if !request.max_price_per_kwh.is_finite() || request.max_price_per_kwh <= 0.0 {
        return Err(EngineError::validation("max price must be > 0"));
    }

    Ok(TradeRequest {
        buyer: buyer.to_string(),
        seller: seller.to_string(),
        amount_kwh: request.amount_kwh,
        max_price_per_kwh: request.max_price_per_kwh,
        priority: request.priority,
    })
}
