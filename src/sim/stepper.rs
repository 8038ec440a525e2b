//! The simulation stepper: advances running simulations over discrete time.
//!
//! Each step samples synthetic device power, household telemetry, and
//! grid-level figures from the simulation's own seeded random source.
//! Device live power is written back to the device registry; household
//! records are read-only here, their telemetry goes only into the
//! simulation's time series, decoupled from live trading state.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::TimeSource;
use crate::config::SimTimingConfig;
use crate::error::{EngineError, ResourceKind};
use crate::registry::device::{DeviceRegistry, DeviceStatus};
use crate::registry::household::{HouseholdId, HouseholdRegistry};

use super::event::SimEvent;
use super::scenario::Scenario;

/// Simulation lifecycle states. `Completed` and `Stopped` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SimStatus {
    Running,
    Completed,
    Stopped,
}

/// One device's sampled power for a step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSample {
    pub device_id: String,
    pub power_kw: f64,
}

/// One household's sampled telemetry for a step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HouseholdSample {
    pub household_id: HouseholdId,
    pub load_kw: f64,
    pub generation_kw: f64,
    pub stored_kwh: f64,
}

/// Grid-level synthetic figures for a step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridSample {
    pub load_kw: f64,
    pub frequency_hz: f64,
    pub voltage_v: f64,
    /// Set when `load_kw` exceeds the scenario ceiling.
    pub warning: bool,
}

/// Complete snapshot of one simulation step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimStep {
    pub step: u64,
    pub at: DateTime<Utc>,
    pub devices: Vec<DeviceSample>,
    pub households: Vec<HouseholdSample>,
    pub grid: GridSample,
}

/// An independent, time-stepped generator of synthetic telemetry and events.
#[derive(Debug, Clone, Serialize)]
pub struct Simulation {
    pub id: Uuid,
    pub scenario: Scenario,
    pub household_ids: Vec<HouseholdId>,
    pub status: SimStatus,
    pub started_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    /// Number of steps taken so far.
    pub steps: u64,
    pub series: Vec<SimStep>,
    pub events: Vec<SimEvent>,
    #[serde(skip)]
    rng: StdRng,
}

/// Owns all simulations and advances the running ones each tick.
pub struct Simulator {
    timing: SimTimingConfig,
    households: Arc<HouseholdRegistry>,
    devices: Arc<DeviceRegistry>,
    time: Arc<dyn TimeSource>,
    sims: RwLock<HashMap<Uuid, Simulation>>,
}

impl Simulator {
    pub fn new(
        timing: SimTimingConfig,
        households: Arc<HouseholdRegistry>,
        devices: Arc<DeviceRegistry>,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            timing,
            households,
            devices,
            time,
            sims: RwLock::new(HashMap::new()),
        }
    }

    /// Starts a simulation of a preset scenario over the given households.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] for an unknown scenario id and
    /// [`EngineError::NotFound`] for an unregistered participant household.
    pub fn start(
        &self,
        scenario_id: &str,
        household_ids: Vec<HouseholdId>,
    ) -> Result<Uuid, EngineError> {
        let scenario = Scenario::from_preset(scenario_id)
            .map_err(|e| EngineError::validation(e.to_string()))?;
        for id in &household_ids {
            if self.households.get(id).is_none() {
                return Err(EngineError::not_found(ResourceKind::Household, id));
            }
        }

        let now = self.time.now();
        let simulation = Simulation {
            id: Uuid::new_v4(),
            rng: StdRng::seed_from_u64(scenario.seed),
            household_ids,
            status: SimStatus::Running,
            started_at: now,
            ends_at: now + Duration::hours(scenario.duration_hours as i64),
            steps: 0,
            series: Vec::new(),
            events: Vec::new(),
            scenario,
        };
        let id = simulation.id;

        info!(simulation_id = %id, scenario = %simulation.scenario.id, "simulation started");
        let mut sims = self.sims.write().unwrap_or_else(PoisonError::into_inner);
        sims.insert(id, simulation);
        Ok(id)
    }

    /// Stops a running simulation. Already-appended steps and events are
    /// kept.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown id and
    /// [`EngineError::Validation`] when the simulation is already terminal.
    pub fn stop(&self, id: Uuid) -> Result<Simulation, EngineError> {
        let mut sims = self.sims.write().unwrap_or_else(PoisonError::into_inner);
        let sim = sims
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found(ResourceKind::Simulation, id.to_string()))?;
        if sim.status != SimStatus::Running {
            return Err(EngineError::validation(format!(
                "simulation {id} is already {:?}",
                sim.status
            )));
        }
        sim.status = SimStatus::Stopped;
        info!(simulation_id = %id, steps = sim.steps, "simulation stopped");
        Ok(sim.clone())
    }

    /// Returns a copy of the simulation.
    pub fn get(&self, id: Uuid) -> Result<Simulation, EngineError> {
        let sims = self.sims.read().unwrap_or_else(PoisonError::into_inner);
        sims.get(&id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(ResourceKind::Simulation, id.to_string()))
    }

    /// Number of simulations currently running.
    pub fn running_count(&self) -> usize {
        let sims = self.sims.read().unwrap_or_else(PoisonError::into_inner);
        sims.values()
            .filter(|s| s.status == SimStatus::Running)
            .count()
    }

    /// Advances every running simulation by one step; simulations past
    /// their end time or step budget complete instead. Returns the number
    /// of simulations stepped.
    pub fn step_all(&self) -> usize {
        let now = self.time.now();
        let mut stepped = 0;

        let mut sims = self.sims.write().unwrap_or_else(PoisonError::into_inner);
        for sim in sims.values_mut() {
            if sim.status != SimStatus::Running {
                continue;
            }
            if now >= sim.ends_at || sim.steps >= self.max_steps(&sim.scenario) {
                sim.status = SimStatus::Completed;
                debug!(simulation_id = %sim.id, steps = sim.steps, "simulation completed");
                continue;
            }
            self.step_one(sim, now);
            stepped += 1;
        }
        stepped
    }

    /// Step budget: enough steps to cover the scenario duration at the
    /// configured interval.
    fn max_steps(&self, scenario: &Scenario) -> u64 {
        scenario.duration_hours.saturating_mul(3600) / self.timing.step_secs.max(1)
    }

    fn step_one(&self, sim: &mut Simulation, now: DateTime<Utc>) {
        let scenario = sim.scenario.clone();

        // 1. Device sampling; live power is written back to the registry.
        let devices = self.devices.all();
        let mut device_samples = Vec::with_capacity(devices.len());
        for device in &devices {
            let power_kw = if device.capacity_kw > 0.0 {
                let variation =
                    sim.rng.random_range(-0.5..=0.5) * scenario.load_variation;
                (device.capacity_kw * 0.5 * (1.0 + variation)).max(0.0)
            } else {
                0.0
            };
            self.devices.record_power(&device.id, power_kw, now);
            device_samples.push(DeviceSample {
                device_id: device.id.clone(),
                power_kw,
            });
        }

        // 2. Household telemetry; the registry is read, never mutated.
        let mut household_samples = Vec::with_capacity(sim.household_ids.len());
        for id in &sim.household_ids {
            if let Some(h) = self.households.get(id) {
                let load_kw = (h.consumption_kw
                    * (1.0 + sim.rng.random_range(-0.5..=0.5) * scenario.load_variation))
                    .max(0.0);
                let generation_kw = (h.generation_kw
                    * (1.0 + sim.rng.random_range(-0.5..=0.5) * scenario.generation_variation))
                    .max(0.0);
                let stored_kwh = (h.stored_kwh
                    * (1.0 + sim.rng.random_range(-0.5..=0.5) * scenario.storage_variation))
                    .clamp(0.0, h.battery_capacity_kwh);
                household_samples.push(HouseholdSample {
                    household_id: id.clone(),
                    load_kw,
                    generation_kw,
                    stored_kwh,
                });
            }
        }

        // 3. Grid-level sample and threshold flag.
        let load_kw: f64 = household_samples.iter().map(|s| s.load_kw).sum();
        let frequency_hz =
            50.0 + sim.rng.random_range(-1.0..=1.0) * scenario.frequency_noise_hz;
        let voltage_v = 230.0 + sim.rng.random_range(-1.0..=1.0) * scenario.voltage_noise_v;
        let warning = load_kw > scenario.grid_load_ceiling_kw;

        // 4. Event detection.
        if warning {
            sim.events.push(SimEvent::GridWarning {
                step: sim.steps,
                load_kw,
                at: now,
            });
        }
        for (sample, device) in device_samples.iter().zip(&devices) {
            if device.status == DeviceStatus::Active
                && device.capacity_kw > 0.0
                && sample.power_kw < 0.1
            {
                sim.events.push(SimEvent::DeviceFailure {
                    step: sim.steps,
                    device_id: sample.device_id.clone(),
                    power_kw: sample.power_kw,
                    at: now,
                });
            }
        }

        // 5. Append the snapshot and advance the counter.
        sim.series.push(SimStep {
            step: sim.steps,
            at: now,
            devices: device_samples,
            households: household_samples,
            grid: GridSample {
                load_kw,
                frequency_hz,
                voltage_v,
                warning,
            },
        });
        sim.steps += 1;
    }
}
