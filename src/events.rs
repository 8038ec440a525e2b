//! Engine notifications for external broadcast collaborators.
//!
//! The engine publishes on a `tokio::sync::broadcast` channel; a messaging
//! layer subscribes and fans the events out however it likes. Publishing
//! never blocks and a missing subscriber is not an error.

use serde::Serialize;
use uuid::Uuid;

use crate::registry::device::DeviceStatus;
use crate::registry::household::HouseholdId;

/// Events emitted by the engine as state changes commit.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    TradeCompleted {
        trade_id: Uuid,
        buyer: HouseholdId,
        seller: HouseholdId,
        amount_kwh: f64,
        total_price: f64,
    },
    TradeFailed {
        trade_id: Uuid,
        reason: String,
    },
    TradeCancelled {
        trade_id: Uuid,
        actor: HouseholdId,
    },
    TradeExpired {
        trade_id: Uuid,
    },
    DeviceUpdated {
        device_id: String,
        status: DeviceStatus,
        power_kw: f64,
    },
    SheddingApplied {
        affected: Vec<HouseholdId>,
        reduction_factor: f64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let event = EngineEvent::TradeExpired {
            trade_id: Uuid::nil(),
        };
        let json = serde_json::to_value(&event).expect("should serialize");
        assert_eq!(json["type"], "trade_expired");
    }

    #[test]
    fn broadcast_delivery() {
        let (tx, mut rx) = tokio::sync::broadcast::channel(8);
        tx.send(EngineEvent::SheddingApplied {
            affected: vec!["h1".to_string()],
            reduction_factor: 0.7,
        })
        .expect("send should succeed with a live receiver");

        let received = rx.try_recv().expect("event should be queued");
        assert!(matches!(received, EngineEvent::SheddingApplied { .. }));
    }
}
