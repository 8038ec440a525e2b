//! Simulation stepper: synthetic telemetry and event detection over
//! discrete time, decoupled from live trading state.

pub mod event;
pub mod scenario;
pub mod stats;
pub mod stepper;

pub use event::SimEvent;
pub use scenario::Scenario;
pub use stats::SimStats;
pub use stepper::{SimStatus, Simulation, Simulator};
