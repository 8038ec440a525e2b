//! Device records, typed parameters, and control commands.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EngineError, ResourceKind};

/// Caller-provided device identifier.
pub type DeviceId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    SolarPanel,
    Battery,
    Inverter,
    SmartMeter,
    LoadController,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Active,
    Inactive,
    Maintenance,
    Error,
}

/// Per-kind typed parameters.
///
/// Each device kind carries the handful of fields its controllers actually
/// read; anything beyond that goes in the open extension map on the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceParams {
    SolarPanel { tilt_deg: f64, azimuth_deg: f64 },
    Battery { max_charge_kw: f64, max_discharge_kw: f64 },
    Inverter { phases: u8 },
    SmartMeter { report_interval_secs: u64 },
    LoadController { channels: u8 },
}

impl DeviceParams {
    /// Default parameter set for a device kind.
    pub fn defaults_for(kind: DeviceKind) -> Self {
        match kind {
            DeviceKind::SolarPanel => DeviceParams::SolarPanel {
                tilt_deg: 30.0,
                azimuth_deg: 180.0,
            },
            DeviceKind::Battery => DeviceParams::Battery {
                max_charge_kw: 5.0,
                max_discharge_kw: 5.0,
            },
            DeviceKind::Inverter => DeviceParams::Inverter { phases: 1 },
            DeviceKind::SmartMeter => DeviceParams::SmartMeter {
                report_interval_secs: 60,
            },
            DeviceKind::LoadController => DeviceParams::LoadController { channels: 4 },
        }
    }
}

/// A physical device attached to the microgrid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    pub id: DeviceId,
    pub kind: DeviceKind,
    /// Rated power (kW); 0 for metering/control devices.
    pub capacity_kw: f64,
    /// Conversion efficiency, in `(0, 1]`.
    pub efficiency: f64,
    pub status: DeviceStatus,
    /// Live power (kW), within `[0, capacity_kw]`.
    pub power_kw: f64,
    pub params: DeviceParams,
    /// Open extension bag for installer-specific metadata.
    pub ext: Map<String, Value>,
    pub updated_at: DateTime<Utc>,
}

impl Device {
    /// Creates an active device with default parameters for its kind.
    ///
    /// # Panics
    ///
    /// Panics if `capacity_kw` is negative or `efficiency` is outside `(0, 1]`.
    pub fn new(
        id: impl Into<DeviceId>,
        kind: DeviceKind,
        capacity_kw: f64,
        efficiency: f64,
        created_at: DateTime<Utc>,
    ) -> Self {
        assert!(capacity_kw >= 0.0, "capacity_kw must be >= 0");
        assert!(
            efficiency > 0.0 && efficiency <= 1.0,
            "efficiency must be in (0, 1]"
        );
        Self {
            id: id.into(),
            kind,
            capacity_kw,
            efficiency,
            status: DeviceStatus::Active,
            power_kw: 0.0,
            params: DeviceParams::defaults_for(kind),
            ext: Map::new(),
            updated_at: created_at,
        }
    }
}

/// Control commands accepted by [`DeviceRegistry::control`].
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DeviceAction {
    Start,
    Stop,
    SetPower { kw: f64 },
    SetParameters { parameters: Map<String, Value> },
}

/// Shared store of device records.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    inner: RwLock<HashMap<DeviceId, Device>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, device: Device) {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(device.id.clone(), device);
    }

    pub fn get(&self, id: &str) -> Option<Device> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.get(id).cloned()
    }

    /// Returns all devices, sorted by id for deterministic output.
    pub fn all(&self) -> Vec<Device> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut devices: Vec<Device> = map.values().cloned().collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    pub fn len(&self) -> usize {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Applies a control command and returns the updated record.
    ///
    /// `Start` requires the device not be in `Maintenance` or `Error`;
    /// `SetPower` requires `Active` status and clamps to capacity; `Stop`
    /// zeroes live power; `SetParameters` merges into the extension map.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown id and
    /// [`EngineError::Validation`] for a command the device's state rejects.
    pub fn control(
        &self,
        id: &str,
        action: DeviceAction,
        now: DateTime<Utc>,
    ) -> Result<Device, EngineError> {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let device = map
            .get_mut(id)
            .ok_or_else(|| EngineError::not_found(ResourceKind::Device, id))?;

        match action {
            DeviceAction::Start => {
                if matches!(
                    device.status,
                    DeviceStatus::Maintenance | DeviceStatus::Error
                ) {
                    return Err(EngineError::validation(format!(
                        "device {id} cannot start while in {:?} status",
                        device.status
                    )));
                }
                device.status = DeviceStatus::Active;
            }
            DeviceAction::Stop => {
                device.status = DeviceStatus::Inactive;
                device.power_kw = 0.0;
            }
            DeviceAction::SetPower { kw } => {
                if device.status != DeviceStatus::Active {
                    return Err(EngineError::validation(format!(
                        "device {id} must be active to set power"
                    )));
                }
                if kw < 0.0 || !kw.is_finite() {
                    return Err(EngineError::validation("power must be finite and >= 0"));
                }
                device.power_kw = kw.min(device.capacity_kw);
            }
            DeviceAction::SetParameters { parameters } => {
                for (key, value) in parameters {
                    device.ext.insert(key, value);
                }
            }
        }
        device.updated_at = now;

        Ok(device.clone())
    }

    /// Writes a sampled live power value (simulation stepper path).
    pub(crate) fn record_power(&self, id: &str, power_kw: f64, now: DateTime<Utc>) {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(device) = map.get_mut(id) {
            device.power_kw = power_kw.clamp(0.0, device.capacity_kw);
            device.updated_at = now;
        }
    }
}
