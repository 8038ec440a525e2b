//! Typed error taxonomy shared across the engine.

use std::fmt;

use thiserror::Error;

/// Resource category used in [`EngineError::NotFound`] messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Household,
    Device,
    Trade,
    Simulation,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::Household => "household",
            ResourceKind::Device => "device",
            ResourceKind::Trade => "trade",
            ResourceKind::Simulation => "simulation",
        };
        f.write_str(s)
    }
}

/// Every failure an engine operation can return.
///
/// Validation and lookup failures never mutate state. Execution failures are
/// additionally recorded on the trade itself before being returned, so the
/// audit trail in the history log is complete even when the caller drops the
/// error.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    /// Bad request shape: missing ids, self-trade, non-positive amounts,
    /// policy violations. Rejected synchronously.
    #[error("invalid request: {reason}")]
    Validation { reason: String },

    /// Seller cannot cover the requested amount at submission time.
    #[error("seller {seller} cannot cover {requested_kwh} kWh (available {available_kwh} kWh)")]
    InsufficientEnergy {
        seller: String,
        requested_kwh: f64,
        available_kwh: f64,
    },

    /// Mutation failed after a trade was accepted. The trade is marked
    /// `Failed` and removed from the active set before this is returned.
    #[error("execution failed: {reason}")]
    Execution { reason: String },

    /// Unknown household/device/trade/simulation id.
    #[error("{kind} {id} not found")]
    NotFound { kind: ResourceKind, id: String },

    /// Actor lacks rights over a resource they do not own.
    #[error("{actor} is not allowed to {action}")]
    Forbidden { actor: String, action: String },
}

impl EngineError {
    /// Shorthand for a [`EngineError::Validation`] with the given reason.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`EngineError::NotFound`] for the given resource.
    pub fn not_found(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Shorthand for a [`EngineError::Execution`] with the given reason.
    pub fn execution(reason: impl Into<String>) -> Self {
        Self::Execution {
            reason: reason.into(),
        }
    }
}
