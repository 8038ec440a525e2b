//! Events detected during simulation steps.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::registry::device::DeviceId;

/// A threshold crossing detected while stepping a simulation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SimEvent {
    /// Sampled grid load exceeded the scenario ceiling.
    GridWarning {
        step: u64,
        load_kw: f64,
        at: DateTime<Utc>,
    },
    /// An active device sampled below the failure threshold.
    DeviceFailure {
        step: u64,
        device_id: DeviceId,
        power_kw: f64,
        at: DateTime<Utc>,
    },
}

impl SimEvent {
    /// Stable kind label used for stats aggregation.
    pub fn kind(&self) -> &'static str {
        match self {
            SimEvent::GridWarning { .. } => "grid_warning",
            SimEvent::DeviceFailure { .. } => "device_failure",
        }
    }
}
