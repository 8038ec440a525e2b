//! The engine facade: one explicitly constructed instance owning its
//! registries, market engine, and simulator.
//!
//! Transport layers hold an `Arc<Microgrid>` and call the operations below;
//! there is no process-global state. Background ticking is the scheduler's
//! job (see [`crate::sched`]); every tick body here is a plain synchronous
//! method so tests can drive ticks deterministically.

use std::sync::Arc;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::clock::{TimeSource, WallClock};
use crate::config::EngineConfig;
use crate::error::{EngineError, ResourceKind};
use crate::events::EngineEvent;
use crate::market::engine::{MarketEngine, MarketSnapshot};
use crate::market::trade::Trade;
use crate::market::validate::TradeRequest;
use crate::registry::device::{Device, DeviceAction, DeviceRegistry};
use crate::registry::household::{Household, HouseholdPatch, HouseholdRegistry};
use crate::sim::stats::SimStats;
use crate::sim::stepper::{Simulation, Simulator};

/// A complete microgrid engine instance.
pub struct Microgrid {
    config: EngineConfig,
    households: Arc<HouseholdRegistry>,
    devices: Arc<DeviceRegistry>,
    market: MarketEngine,
    simulator: Simulator,
    events: broadcast::Sender<EngineEvent>,
    time: Arc<dyn TimeSource>,
}

impl Microgrid {
    /// Creates an engine on the system clock.
    ///
    /// # Panics
    ///
    /// Panics if `config` fails validation.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_time_source(config, Arc::new(WallClock))
    }

    /// Creates an engine on an injected time source (deterministic tests).
    ///
    /// # Panics
    ///
    /// Panics if `config` fails validation.
    pub fn with_time_source(config: EngineConfig, time: Arc<dyn TimeSource>) -> Self {
        let errors = config.validate();
        assert!(errors.is_empty(), "invalid engine config: {errors:?}");

        let (events, _) = broadcast::channel(config.market.event_channel_capacity);
        let households = Arc::new(HouseholdRegistry::new());
        let devices = Arc::new(DeviceRegistry::new());
        let market = MarketEngine::new(
            config.market.clone(),
            config.shedding.clone(),
            households.clone(),
            time.clone(),
            events.clone(),
        );
        let simulator = Simulator::new(
            config.simulation.clone(),
            households.clone(),
            devices.clone(),
            time.clone(),
        );

        Self {
            config,
            households,
            devices,
            market,
            simulator,
            events,
            time,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Household registry handle, used by the provisioning collaborator to
    /// seed records at bootstrap.
    pub fn households(&self) -> &HouseholdRegistry {
        &self.households
    }

    /// Device registry handle for bootstrap seeding.
    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    /// Subscribes to engine notifications (trade outcomes, device updates,
    /// shedding).
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    // --- market surface ---

    /// See [`MarketEngine::submit_trade`].
    pub fn submit_trade(&self, request: &TradeRequest) -> Result<Trade, EngineError> {
        self.market.submit_trade(request)
    }

    /// See [`MarketEngine::execute_trade`].
    pub fn execute_trade(&self, id: Uuid) -> Result<Trade, EngineError> {
        self.market.execute_trade(id)
    }

    /// See [`MarketEngine::confirm_trade`].
    pub fn confirm_trade(&self, id: Uuid, actor: &str) -> Result<Trade, EngineError> {
        self.market.confirm_trade(id, actor)
    }

    /// See [`MarketEngine::cancel_trade`].
    pub fn cancel_trade(&self, id: Uuid, actor: &str, reason: &str) -> Result<Trade, EngineError> {
        self.market.cancel_trade(id, actor, reason)
    }

    /// Point-in-time market view: grid status, pricing, open trades, recent
    /// history, and households.
    pub fn market_snapshot(&self) -> MarketSnapshot {
        self.market.snapshot()
    }

    /// Sheds load from non-critical households while stability is critical.
    pub fn trigger_emergency_shedding(&self) -> Vec<Household> {
        self.market.trigger_emergency_shedding()
    }

    /// Market tick body: aggregates, stability, peak load, expiry sweep.
    pub fn market_tick(&self) {
        self.market.market_tick();
    }

    /// Pricing tick body: current price recomputation.
    pub fn pricing_tick(&self) {
        self.market.pricing_tick();
    }

    // --- household surface ---

    pub fn get_household(&self, id: &str) -> Result<Household, EngineError> {
        self.households
            .get(id)
            .ok_or_else(|| EngineError::not_found(ResourceKind::Household, id))
    }

    pub fn update_household(
        &self,
        id: &str,
        patch: HouseholdPatch,
    ) -> Result<Household, EngineError> {
        self.households.update(id, patch)
    }

    // --- device surface ---

    /// Applies a control command to a device and publishes the update.
    pub fn control_device(&self, id: &str, action: DeviceAction) -> Result<Device, EngineError> {
        let device = self.devices.control(id, action, self.time.now())?;
        let _ = self.events.send(EngineEvent::DeviceUpdated {
            device_id: device.id.clone(),
            status: device.status,
            power_kw: device.power_kw,
        });
        Ok(device)
    }

    // --- simulation surface ---

    /// See [`Simulator::start`].
    pub fn start_simulation(
        &self,
        scenario_id: &str,
        household_ids: Vec<String>,
    ) -> Result<Uuid, EngineError> {
        self.simulator.start(scenario_id, household_ids)
    }

    /// See [`Simulator::stop`].
    pub fn stop_simulation(&self, id: Uuid) -> Result<Simulation, EngineError> {
        self.simulator.stop(id)
    }

    /// See [`Simulator::get`].
    pub fn get_simulation(&self, id: Uuid) -> Result<Simulation, EngineError> {
        self.simulator.get(id)
    }

    /// Aggregated event counts, average device power, and elapsed duration.
    pub fn simulation_stats(&self, id: Uuid) -> Result<SimStats, EngineError> {
        let sim = self.simulator.get(id)?;
        Ok(SimStats::from_simulation(&sim))
    }

    /// Simulation tick body: advance every running simulation one step.
    pub fn simulation_tick(&self) -> usize {
        self.simulator.step_all()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use crate::clock::ManualClock;
    use crate::registry::device::DeviceKind;

    use super::*;

    fn grid() -> Microgrid {
        let clock = Arc::new(ManualClock::starting_at(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        ));
        let grid = Microgrid::with_time_source(EngineConfig::default(), clock);
        let mut seller = Household::new("h1", "Seller", 8.0, 30.0);
        seller.generation_kw = 5.0;
        grid.households().insert(seller);
        let mut buyer = Household::new("h2", "Buyer", 0.0, 50.0);
        buyer.consumption_kw = 3.0;
        grid.households().insert(buyer);
        grid.devices().insert(Device::new(
            "d1",
            DeviceKind::SolarPanel,
            4.0,
            0.95,
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        ));
        grid
    }

    #[test]
    #[should_panic(expected = "invalid engine config")]
    fn invalid_config_panics() {
        let mut config = EngineConfig::default();
        config.market.base_price = -1.0;
        Microgrid::new(config);
    }

    #[test]
    fn end_to_end_trade_emits_event() {
        let grid = grid();
        let mut events = grid.subscribe();

        let request = TradeRequest {
            buyer: "h2".to_string(),
            seller: "h1".to_string(),
            amount_kwh: 2.0,
            max_price_per_kwh: 1.0,
            priority: Default::default(),
        };
        let trade = grid.submit_trade(&request).expect("trade should complete");

        let event = events.try_recv().expect("event should be queued");
        assert!(
            matches!(event, EngineEvent::TradeCompleted { trade_id, .. } if trade_id == trade.id)
        );
    }

    #[test]
    fn get_household_not_found() {
        let grid = grid();
        assert!(matches!(
            grid.get_household("ghost"),
            Err(EngineError::NotFound { .. })
        ));
    }

    #[test]
    fn control_device_publishes_update() {
        let grid = grid();
        let mut events = grid.subscribe();
        let device = grid
            .control_device("d1", DeviceAction::SetPower { kw: 2.0 })
            .expect("control should succeed");
        assert_eq!(device.power_kw, 2.0);

        let event = events.try_recv().expect("event should be queued");
        assert!(matches!(event, EngineEvent::DeviceUpdated { device_id, .. } if device_id == "d1"));
    }

    #[test]
    fn simulation_lifecycle_through_facade() {
        let grid = grid();
        let id = grid
            .start_simulation("baseline", vec!["h1".to_string(), "h2".to_string()])
            .expect("start should succeed");

        assert_eq!(grid.simulation_tick(), 1);
        assert_eq!(grid.simulation_tick(), 1);

        let stats = grid.simulation_stats(id).expect("stats should succeed");
        assert_eq!(stats.steps, 2);

        let stopped = grid.stop_simulation(id).expect("stop should succeed");
        assert_eq!(stopped.series.len(), 2);
        assert_eq!(grid.simulation_tick(), 0);
    }

    #[test]
    fn snapshot_reflects_seeded_households() {
        let grid = grid();
        grid.market_tick();
        let snapshot = grid.market_snapshot();
        assert_eq!(snapshot.households.len(), 2);
        assert!((snapshot.grid.total_load_kw - 3.0).abs() < 1e-9);
    }
}
