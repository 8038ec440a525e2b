//! Household records and their registry.
//!
//! The registry is the single shared store of live household energy state.
//! All multi-step read-modify-write sequences (trade execution, shedding,
//! aggregate computation) run inside one lock section via [`HouseholdRegistry::with_map`]
//! or [`HouseholdRegistry::with_map_mut`], which is what keeps concurrent
//! trade submissions from double-spending a seller's energy.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, ResourceKind};

/// Caller-provided household identifier (provisioning owns the namespace).
pub type HouseholdId = String;

/// Criticality tier governing trade pricing premiums and shedding exemption.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// Shedding order: lower ranks are shed first, `Critical` is exempt.
    pub(crate) fn shed_rank(self) -> u8 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
            Priority::Critical => u8::MAX,
        }
    }
}

/// Per-household trading preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TradingPolicy {
    /// When false, accepted trades stay `Pending` until explicitly executed.
    pub auto_trade: bool,
    /// Lowest unit price this household sells at.
    pub min_price_per_kwh: f64,
    /// Highest unit price this household buys at.
    pub max_price_per_kwh: f64,
    /// Hours of day `[start, end)` during which this household trades.
    /// `start == end` means always active; a window may wrap midnight.
    pub active_hours: (u32, u32),
}

impl Default for TradingPolicy {
    fn default() -> Self {
        Self {
            auto_trade: true,
            min_price_per_kwh: 0.05,
            max_price_per_kwh: 1.0,
            active_hours: (0, 24),
        }
    }
}

impl TradingPolicy {
    /// Returns true when `hour` falls inside the active-hours window.
    pub fn is_active_hour(&self, hour: u32) -> bool {
        let (start, end) = self.active_hours;
        if start == end {
            return true;
        }
        if start < end {
            hour >= start && hour < end
        } else {
            // window wraps midnight
            hour >= start || hour < end
        }
    }
}

/// A microgrid participant with generation, consumption, and storage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Household {
    pub id: HouseholdId,
    pub name: String,
    /// Installed solar capacity (kW).
    pub solar_capacity_kw: f64,
    /// Installed battery capacity (kWh).
    pub battery_capacity_kwh: f64,
    /// Current generation (kW, >= 0).
    pub generation_kw: f64,
    /// Current consumption (kW, >= 0).
    pub consumption_kw: f64,
    /// Stored energy (kWh, within `[0, battery_capacity_kwh]`).
    pub stored_kwh: f64,
    /// Offline households do not contribute to grid aggregates.
    pub online: bool,
    pub priority: Priority,
    pub policy: TradingPolicy,
}

impl Household {
    /// Creates an online, normal-priority household with zeroed live state.
    pub fn new(
        id: impl Into<HouseholdId>,
        name: impl Into<String>,
        solar_capacity_kw: f64,
        battery_capacity_kwh: f64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            solar_capacity_kw: solar_capacity_kw.max(0.0),
            battery_capacity_kwh: battery_capacity_kwh.max(0.0),
            generation_kw: 0.0,
            consumption_kw: 0.0,
            stored_kwh: 0.0,
            online: true,
            priority: Priority::Normal,
            policy: TradingPolicy::default(),
        }
    }

    /// Energy this household can sell right now: live generation plus the
    /// configured fraction of stored energy.
    pub fn available_energy_kwh(&self, storage_discharge_fraction: f64) -> f64 {
        self.generation_kw + self.stored_kwh * storage_discharge_fraction
    }
}

/// Partial update applied through [`HouseholdRegistry::update`].
///
/// `None` fields are left untouched. `stored_kwh` is clamped to the battery
/// capacity after the patch is applied.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HouseholdPatch {
    pub name: Option<String>,
    pub generation_kw: Option<f64>,
    pub consumption_kw: Option<f64>,
    pub stored_kwh: Option<f64>,
    pub online: Option<bool>,
    pub priority: Option<Priority>,
    pub policy: Option<TradingPolicy>,
}

/// Shared store of household records, guarded by a single registry lock.
#[derive(Debug, Default)]
pub struct HouseholdRegistry {
    inner: RwLock<HashMap<HouseholdId, Household>>,
}

impl HouseholdRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a household record.
    pub fn insert(&self, household: Household) {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(household.id.clone(), household);
    }

    /// Returns a copy of the household, if registered.
    pub fn get(&self, id: &str) -> Option<Household> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.get(id).cloned()
    }

    /// Applies a partial update and returns the new record.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown id and
    /// [`EngineError::Validation`] for negative energy figures.
    pub fn update(&self, id: &str, patch: HouseholdPatch) -> Result<Household, EngineError> {
        for (field, value) in [
            ("generation_kw", patch.generation_kw),
            ("consumption_kw", patch.consumption_kw),
            ("stored_kwh", patch.stored_kwh),
        ] {
            if let Some(v) = value {
                if v < 0.0 || !v.is_finite() {
                    return Err(EngineError::validation(format!(
                        "{field} must be finite and >= 0"
                    )));
                }
            }
        }

        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let h = map
            .get_mut(id)
            .ok_or_else(|| EngineError::not_found(ResourceKind::Household, id))?;

        if let Some(name) = patch.name {
            h.name = name;
        }
        if let Some(v) = patch.generation_kw {
            h.generation_kw = v;
        }
        if let Some(v) = patch.consumption_kw {
            h.consumption_kw = v;
        }
        if let Some(v) = patch.stored_kwh {
            h.stored_kwh = v;
        }
        if let Some(v) = patch.online {
            h.online = v;
        }
        if let Some(v) = patch.priority {
            h.priority = v;
        }
        if let Some(v) = patch.policy {
            h.policy = v;
        }
        h.stored_kwh = h.stored_kwh.min(h.battery_capacity_kwh);

        Ok(h.clone())
    }

    /// Returns all households, sorted by id for deterministic output.
    pub fn all(&self) -> Vec<Household> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut households: Vec<Household> = map.values().cloned().collect();
        households.sort_by(|a, b| a.id.cmp(&b.id));
        households
    }

    pub fn len(&self) -> usize {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Aggregate load and supply across online households.
    ///
    /// Supply counts live generation plus `storage_fraction` of stored
    /// energy; offline households contribute nothing.
    pub fn online_aggregates(&self, storage_fraction: f64) -> (f64, f64) {
        self.with_map(|map| {
            let mut load = 0.0;
            let mut supply = 0.0;
            for h in map.values().filter(|h| h.online) {
                load += h.consumption_kw;
                supply += h.generation_kw + h.stored_kwh * storage_fraction;
            }
            (load, supply)
        })
    }

    /// Runs `f` under the registry read lock.
    pub(crate) fn with_map<R>(&self, f: impl FnOnce(&HashMap<HouseholdId, Household>) -> R) -> R {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&map)
    }

    /// Runs `f` under the registry write lock.
    ///
    /// The whole closure is one critical section; trade execution uses this
    /// to make its availability check and mutation indivisible.
    pub(crate) fn with_map_mut<R>(
        &self,
        f: impl FnOnce(&mut HashMap<HouseholdId, Household>) -> R,
    ) -> R {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(households: Vec<Household>) -> HouseholdRegistry {
        let registry = HouseholdRegistry::new();
        for h in households {
            registry.insert(h);
        }
        registry
    }

    #[test]
    fn insert_and_get() {
        let registry = registry_with(vec![Household::new("h1", "Alpha", 5.0, 10.0)]);
        let h = registry.get("h1");
        assert!(h.is_some());
        assert_eq!(h.as_ref().map(|h| h.name.as_str()), Some("Alpha"));
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn update_patches_only_given_fields() {
        let registry = registry_with(vec![Household::new("h1", "Alpha", 5.0, 10.0)]);
        let patch = HouseholdPatch {
            consumption_kw: Some(2.5),
            ..HouseholdPatch::default()
        };
        let updated = registry.update("h1", patch).expect("update should succeed");
        assert_eq!(updated.consumption_kw, 2.5);
        assert_eq!(updated.name, "Alpha");
        assert!(updated.online);
    }

    #[test]
    fn update_clamps_stored_to_capacity() {
        let registry = registry_with(vec![Household::new("h1", "Alpha", 5.0, 10.0)]);
        let patch = HouseholdPatch {
            stored_kwh: Some(25.0),
            ..HouseholdPatch::default()
        };
        let updated = registry.update("h1", patch).expect("update should succeed");
        assert_eq!(updated.stored_kwh, 10.0);
    }

    #[test]
    fn update_rejects_negative_energy() {
        let registry = registry_with(vec![Household::new("h1", "Alpha", 5.0, 10.0)]);
        let patch = HouseholdPatch {
            generation_kw: Some(-1.0),
            ..HouseholdPatch::default()
        };
        let err = registry.update("h1", patch);
        assert!(matches!(err, Err(EngineError::Validation { .. })));
    }

    #[test]
    fn update_unknown_household_is_not_found() {
        let registry = HouseholdRegistry::new();
        let err = registry.update("ghost", HouseholdPatch::default());
        assert!(matches!(err, Err(EngineError::NotFound { .. })));
    }

    #[test]
    fn available_energy_counts_storage_fraction() {
        let mut h = Household::new("h1", "Alpha", 5.0, 30.0);
        h.generation_kw = 3.0;
        h.stored_kwh = 20.0;
        assert!((h.available_energy_kwh(0.1) - 5.0).abs() < 1e-9);
        assert!((h.available_energy_kwh(0.0) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn aggregates_skip_offline_households() {
        let mut a = Household::new("h1", "Alpha", 5.0, 10.0);
        a.consumption_kw = 2.0;
        a.generation_kw = 1.0;
        a.stored_kwh = 10.0;
        let mut b = Household::new("h2", "Beta", 5.0, 10.0);
        b.consumption_kw = 4.0;
        b.generation_kw = 3.0;
        b.online = false;

        let registry = registry_with(vec![a, b]);
        let (load, supply) = registry.online_aggregates(0.1);
        assert!((load - 2.0).abs() < 1e-9);
        assert!((supply - 2.0).abs() < 1e-9); // 1.0 gen + 10.0 * 0.1 storage
    }

    #[test]
    fn all_is_sorted_by_id() {
        let registry = registry_with(vec![
            Household::new("h3", "Gamma", 0.0, 0.0),
            Household::new("h1", "Alpha", 0.0, 0.0),
            Household::new("h2", "Beta", 0.0, 0.0),
        ]);
        let ids: Vec<String> = registry.all().into_iter().map(|h| h.id).collect();
        assert_eq!(ids, vec!["h1", "h2", "h3"]);
    }

    #[test]
    fn active_hours_window() {
        let mut policy = TradingPolicy::default();
        policy.active_hours = (8, 20);
        assert!(!policy.is_active_hour(7));
        assert!(policy.is_active_hour(8));
        assert!(policy.is_active_hour(19));
        assert!(!policy.is_active_hour(20));
    }

    #[test]
    fn active_hours_wrapping_midnight() {
        let mut policy = TradingPolicy::default();
        policy.active_hours = (22, 6);
        assert!(policy.is_active_hour(23));
        assert!(policy.is_active_hour(3));
        assert!(!policy.is_active_hour(12));
    }

    #[test]
    fn active_hours_equal_bounds_means_always() {
        let mut policy = TradingPolicy::default();
        policy.active_hours = (0, 0);
        for hour in 0..24 {
            assert!(policy.is_active_hour(hour));
        }
    }

    #[test]
    fn shed_rank_orders_low_before_normal_before_high() {
        assert!(Priority::Low.shed_rank() < Priority::Normal.shed_rank());
        assert!(Priority::Normal.shed_rank() < Priority::High.shed_rank());
        assert!(Priority::High.shed_rank() < Priority::Critical.shed_rank());
    }
}
