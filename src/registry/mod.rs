//! Leaf data stores for household and device records.

pub mod device;
pub mod household;

pub use device::{Device, DeviceAction, DeviceKind, DeviceParams, DeviceRegistry, DeviceStatus};
pub use household::{
    Household, HouseholdPatch, HouseholdRegistry, Priority, TradingPolicy,
};
