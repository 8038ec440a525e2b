//! Dynamic energy pricing.
//!
//! The price model is a pure function of the current hour and the latest
//! grid aggregates; the market clock feeds it and stores the result in
//! [`PricingState`]. Keeping the function free of hidden state is what makes
//! the pricing tick independently testable.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Time-of-day multiplier.
///
/// Morning ramp (06–09) and evening peak (17–21) mark up the base price;
/// night hours (22–05) discount it.
pub fn time_multiplier(hour: u32) -> f64 {
    match hour {
        6..=9 => 1.3,
        17..=21 => 1.5,
        h if h >= 22 || h <= 5 => 0.7,
        _ => 1.0,
    }
}

/// Load multiplier: grows linearly with aggregate load, capped at 2.0.
pub fn load_multiplier(load_kw: f64) -> f64 {
    (1.0 + load_kw / 100.0).min(2.0)
}

/// Supply multiplier: scarcity raises the price, abundance lowers it,
/// floored at 0.5.
pub fn supply_multiplier(supply_kw: f64, demand_kw: f64) -> f64 {
    (2.0 - supply_kw / demand_kw.max(1.0)).max(0.5)
}

/// Price per kWh for the given hour and grid aggregates.
pub fn unit_price(base_price: f64, hour: u32, load_kw: f64, demand_kw: f64, supply_kw: f64) -> f64 {
    base_price * time_multiplier(hour) * load_multiplier(load_kw) * supply_multiplier(supply_kw, demand_kw)
}

/// Latest pricing figures, recomputed each pricing tick.
#[derive(Debug, Clone, Serialize)]
pub struct PricingState {
    /// Configured base price per kWh.
    pub base_price: f64,
    /// Current dynamic price per kWh.
    pub current_price: f64,
    /// Reference price during peak hours.
    pub peak_price: f64,
    /// Reference price during off-peak hours.
    pub off_peak_price: f64,
    pub updated_at: DateTime<Utc>,
}

impl PricingState {
    /// Initial state: the current price starts at the base price.
    pub fn new(base_price: f64, peak_price: f64, off_peak_price: f64, at: DateTime<Utc>) -> Self {
        Self {
            base_price,
            current_price: base_price,
            peak_price,
            off_peak_price,
            updated_at: at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_multiplier_bands() {
        assert_eq!(time_multiplier(6), 1.3);
        assert_eq!(time_multiplier(9), 1.3);
        assert_eq!(time_multiplier(17), 1.5);
        assert_eq!(time_multiplier(21), 1.5);
        assert_eq!(time_multiplier(22), 0.7);
        assert_eq!(time_multiplier(23), 0.7);
        assert_eq!(time_multiplier(0), 0.7);
        assert_eq!(time_multiplier(5), 0.7);
        assert_eq!(time_multiplier(10), 1.0);
        assert_eq!(time_multiplier(16), 1.0);
    }

    #[test]
    fn load_multiplier_caps_at_two() {
        assert!((load_multiplier(0.0) - 1.0).abs() < 1e-12);
        assert!((load_multiplier(50.0) - 1.5).abs() < 1e-12);
        assert!((load_multiplier(80.0) - 1.8).abs() < 1e-12);
        assert_eq!(load_multiplier(100.0), 2.0);
        assert_eq!(load_multiplier(500.0), 2.0);
    }

    #[test]
    fn supply_multiplier_floors_at_half() {
        // balanced supply and demand
        assert!((supply_multiplier(80.0, 80.0) - 1.0).abs() < 1e-12);
        // scarcity
        assert!((supply_multiplier(60.0, 80.0) - 1.25).abs() < 1e-12);
        // glut floors at 0.5
        assert_eq!(supply_multiplier(300.0, 80.0), 0.5);
        // zero demand guards the division
        assert!((supply_multiplier(0.5, 0.0) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn evening_peak_price_scenario() {
        // base 0.12, hour 18 (x1.5), load 80 (x1.8), supply 60 / demand 80 (x1.25)
        let price = unit_price(0.12, 18, 80.0, 80.0, 60.0);
        assert!((price - 0.405).abs() < 1e-9, "got {price}");
    }

    #[test]
    fn night_glut_hits_both_floors() {
        // hour 2 (x0.7), no load (x1.0), oversupply (x0.5)
        let price = unit_price(0.10, 2, 0.0, 10.0, 100.0);
        assert!((price - 0.035).abs() < 1e-9);
    }

    #[test]
    fn pricing_state_starts_at_base() {
        use chrono::TimeZone;
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let state = PricingState::new(0.12, 0.18, 0.084, at);
        assert_eq!(state.current_price, 0.12);
        assert_eq!(state.updated_at, at);
    }
}
