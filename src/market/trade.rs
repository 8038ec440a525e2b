//! Trade records and the trade status state machine.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::EngineError;
use crate::registry::household::{HouseholdId, Priority};

/// Trade lifecycle states. Transitions only move forward; terminal states
/// are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    Failed,
    Expired,
}

impl TradeStatus {
    /// Position in the forward-only ordering. All terminal states share the
    /// final rank so none can follow another.
    fn rank(self) -> u8 {
        match self {
            TradeStatus::Pending => 0,
            TradeStatus::Confirmed => 1,
            TradeStatus::InProgress => 2,
            TradeStatus::Completed
            | TradeStatus::Cancelled
            | TradeStatus::Failed
            | TradeStatus::Expired => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 3
    }
}

/// Execution metadata recorded when a trade completes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionRecord {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub delivered_kwh: f64,
    pub paid_total: f64,
}

/// Who cancelled a trade, when, and why.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cancellation {
    pub actor: HouseholdId,
    pub at: DateTime<Utc>,
    pub reason: String,
}

/// An agreed transfer of energy between two households.
#[derive(Debug, Clone, Serialize)]
pub struct Trade {
    pub id: Uuid,
    pub buyer: HouseholdId,
    pub seller: HouseholdId,
    /// Energy to transfer (kWh, > 0).
    pub amount_kwh: f64,
    /// Agreed unit price.
    pub price_per_kwh: f64,
    /// Always `amount_kwh * price_per_kwh`; recomputed on pre-execution
    /// amount or price changes.
    pub total_price: f64,
    pub status: TradeStatus,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    /// End of the validity window; the expiry sweeper evicts past this.
    pub valid_until: DateTime<Utc>,
    pub execution: Option<ExecutionRecord>,
    pub cancellation: Option<Cancellation>,
    /// Recorded execution error, set when `status` is `Failed`.
    pub failure: Option<String>,
}

impl Trade {
    /// Creates a pending trade with a fresh id.
    pub fn new(
        buyer: HouseholdId,
        seller: HouseholdId,
        amount_kwh: f64,
        price_per_kwh: f64,
        priority: Priority,
        created_at: DateTime<Utc>,
        valid_until: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            buyer,
            seller,
            amount_kwh,
            price_per_kwh,
            total_price: amount_kwh * price_per_kwh,
            status: TradeStatus::Pending,
            priority,
            created_at,
            valid_until,
            execution: None,
            cancellation: None,
            failure: None,
        }
    }

    /// Moves the trade to `next`, enforcing forward-only transitions.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Execution`] when `next` does not advance the
    /// status or the trade is already terminal.
    pub fn transition(&mut self, next: TradeStatus) -> Result<(), EngineError> {
        if self.status.is_terminal() || next.rank() <= self.status.rank() {
            return Err(EngineError::execution(format!(
                "trade {} cannot move from {:?} to {next:?}",
                self.id, self.status
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Changes the energy amount before execution, keeping the total price
    /// invariant.
    ///
    /// # Errors
    ///
    /// Rejects non-positive amounts and any change once execution started.
    pub fn set_amount(&mut self, amount_kwh: f64) -> Result<(), EngineError> {
        if self.status.rank() >= TradeStatus::InProgress.rank() {
            return Err(EngineError::execution(format!(
                "trade {} amount is frozen after execution starts",
                self.id
            )));
        }
        if !amount_kwh.is_finite() || amount_kwh <= 0.0 {
            return Err(EngineError::validation("energy amount must be > 0"));
        }
        self.amount_kwh = amount_kwh;
        self.total_price = self.amount_kwh * self.price_per_kwh;
        Ok(())
    }

    /// Changes the unit price before execution, keeping the total price
    /// invariant.
    ///
    /// # Errors
    ///
    /// Rejects non-positive prices and any change once execution started.
    pub fn set_price(&mut self, price_per_kwh: f64) -> Result<(), EngineError> {
        if self.status.rank() >= TradeStatus::InProgress.rank() {
            return Err(EngineError::execution(format!(
                "trade {} price is frozen after execution starts",
                self.id
            )));
        }
        if !price_per_kwh.is_finite() || price_per_kwh <= 0.0 {
            return Err(EngineError::validation("price must be > 0"));
        }
        self.price_per_kwh = price_per_kwh;
        self.total_price = self.amount_kwh * self.price_per_kwh;
        Ok(())
    }

    /// True when the sweeper should expire this trade at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, TradeStatus::Pending | TradeStatus::Confirmed)
            && now > self.valid_until
    }
}
