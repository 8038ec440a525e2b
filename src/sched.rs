//! Background scheduler driving the market clock and simulation stepper.
//!
//! Two tokio tasks: the market-clock task owns both the market tick
//! (aggregates, stability, expiry sweep) and the pricing tick, so those
//! three concerns are serialized with respect to each other; the simulation
//! task steps running simulations independently. Tick bodies are the
//! synchronous engine methods, so everything the loops do can also be driven
//! directly in tests without wall-clock delays. Shutdown is a watch-channel
//! broadcast awaited by every task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::config::EngineConfig;
use crate::microgrid::Microgrid;

/// Tick periods for the scheduler tasks.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerPeriods {
    pub market: Duration,
    pub pricing: Duration,
    pub simulation: Duration,
}

impl SchedulerPeriods {
    /// Periods from the engine configuration.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            market: Duration::from_secs(config.market.market_tick_secs),
            pricing: Duration::from_secs(config.market.pricing_tick_secs),
            simulation: Duration::from_secs(config.simulation.step_secs),
        }
    }
}

/// Handle over the spawned tasks. [`SchedulerHandle::shutdown`] stops and
/// joins them; dropping the handle also stops them, without joining.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Signals every task to stop and waits for them to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}

/// Spawns the scheduler tasks for an engine.
pub struct Scheduler;

impl Scheduler {
    /// Spawns with periods taken from the engine configuration.
    pub fn spawn(grid: Arc<Microgrid>) -> SchedulerHandle {
        let periods = SchedulerPeriods::from_config(grid.config());
        Self::spawn_with(grid, periods)
    }

    /// Spawns with explicit periods.
    pub fn spawn_with(grid: Arc<Microgrid>, periods: SchedulerPeriods) -> SchedulerHandle {
        let (shutdown, _) = watch::channel(false);

        let tasks = vec![
            spawn_market_clock(grid.clone(), periods, shutdown.subscribe()),
            spawn_simulation_loop(grid, periods.simulation, shutdown.subscribe()),
        ];

        SchedulerHandle { shutdown, tasks }
    }
}

/// One task owns the market tick and the pricing tick, so aggregation,
/// expiry sweeping, and price recomputation never interleave.
fn spawn_market_clock(
    grid: Arc<Microgrid>,
    periods: SchedulerPeriods,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut market = tokio::time::interval(periods.market);
        market.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut pricing = tokio::time::interval(periods.pricing);
        pricing.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = market.tick() => grid.market_tick(),
                _ = pricing.tick() => grid.pricing_tick(),
                _ = shutdown.changed() => {
                    debug!("market clock stopped");
                    break;
                }
            }
        }
    })
}

fn spawn_simulation_loop(
    grid: Arc<Microgrid>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    grid.simulation_tick();
                }
                _ = shutdown.changed() => {
                    debug!("simulation loop stopped");
                    break;
                }
            }
        }
    })
}
