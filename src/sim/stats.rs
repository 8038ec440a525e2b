//! Post-hoc statistics over a simulation's time series.

use std::collections::BTreeMap;

use serde::Serialize;
use uuid::Uuid;

use super::stepper::{SimStatus, Simulation};

/// Aggregate figures derived from a simulation's series and event log.
///
/// Computed on demand from the recorded steps so reported numbers always
/// match the stored series.
#[derive(Debug, Clone, Serialize)]
pub struct SimStats {
    pub simulation_id: Uuid,
    pub status: SimStatus,
    /// Steps taken so far.
    pub steps: u64,
    /// Event counts keyed by event kind.
    pub event_counts: BTreeMap<String, usize>,
    /// Mean sampled device power across all steps (kW).
    pub avg_device_power_kw: f64,
    /// Seconds between the simulation start and its latest step.
    pub elapsed_secs: i64,
}

impl SimStats {
    /// Computes all statistics from the recorded series and event log.
    pub fn from_simulation(sim: &Simulation) -> Self {
        let mut event_counts: BTreeMap<String, usize> = BTreeMap::new();
        for event in &sim.events {
            *event_counts.entry(event.kind().to_string()).or_insert(0) += 1;
        }

        let mut power_sum = 0.0;
        let mut power_samples = 0usize;
        for step in &sim.series {
            for device in &step.devices {
                power_sum += device.power_kw;
                power_samples += 1;
            }
        }
        let avg_device_power_kw = if power_samples > 0 {
            power_sum / power_samples as f64
        } else {
            0.0
        };

        let elapsed_secs = sim
            .series
            .last()
            .map(|step| (step.at - sim.started_at).num_seconds())
            .unwrap_or(0);

        Self {
            simulation_id: sim.id,
            status: sim.status,
            steps: sim.steps,
            event_counts,
            avg_device_power_kw,
            elapsed_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};

    use crate::clock::{ManualClock, TimeSource};
    use crate::config::SimTimingConfig;
    use crate::registry::device::{Device, DeviceKind, DeviceRegistry};
    use crate::registry::household::HouseholdRegistry;
    use crate::sim::stepper::Simulator;

    use super::*;

    fn simulator() -> (Simulator, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_at(
            Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap(),
        ));
        let devices = Arc::new(DeviceRegistry::new());
        devices.insert(Device::new(
            "weak",
            DeviceKind::SolarPanel,
            0.1,
            0.9,
            clock.now(),
        ));
        devices.insert(Device::new(
            "panel",
            DeviceKind::SolarPanel,
            4.0,
            0.95,
            clock.now(),
        ));
        let simulator = Simulator::new(
            SimTimingConfig::default(),
            Arc::new(HouseholdRegistry::new()),
            devices,
            clock.clone(),
        );
        (simulator, clock)
    }

    #[test]
    fn stats_count_events_by_kind() {
        let (simulator, clock) = simulator();
        let id = simulator.start("baseline", vec![]).expect("start ok");
        for _ in 0..4 {
            simulator.step_all();
            clock.advance(Duration::seconds(60));
        }

        let sim = simulator.get(id).expect("simulation exists");
        let stats = SimStats::from_simulation(&sim);
        // the 0.1 kW panel fails every step
        assert_eq!(stats.event_counts.get("device_failure"), Some(&4));
        assert_eq!(stats.steps, 4);
        assert_eq!(stats.elapsed_secs, 180);
    }

    #[test]
    fn stats_average_device_power() {
        let (simulator, _) = simulator();
        let id = simulator.start("baseline", vec![]).expect("start ok");
        simulator.step_all();

        let sim = simulator.get(id).expect("simulation exists");
        let stats = SimStats::from_simulation(&sim);
        // two devices: ~0.05 and ~2.0 kW, so the mean sits near 1.0
        assert!(
            stats.avg_device_power_kw > 0.8 && stats.avg_device_power_kw < 1.3,
            "got {}",
            stats.avg_device_power_kw
        );
    }

    #[test]
    fn stats_on_fresh_simulation_are_zeroed() {
        let (simulator, _) = simulator();
        let id = simulator.start("baseline", vec![]).expect("start ok");
        let sim = simulator.get(id).expect("simulation exists");
        let stats = SimStats::from_simulation(&sim);
        assert_eq!(stats.steps, 0);
        assert_eq!(stats.avg_device_power_kw, 0.0);
        assert_eq!(stats.elapsed_secs, 0);
        assert!(stats.event_counts.is_empty());
    }
}
