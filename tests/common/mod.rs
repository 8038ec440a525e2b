//! Shared test fixtures for integration tests.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use microgrid_engine::clock::ManualClock;
use microgrid_engine::market::TradeRequest;
use microgrid_engine::registry::Household;
use microgrid_engine::{EngineConfig, Microgrid};

/// Noon on a fixed test day (flat time-of-day price multiplier).
pub fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

/// Engine on a manual clock starting at `start`.
pub fn grid_at(start: DateTime<Utc>) -> (Arc<Microgrid>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::starting_at(start));
    let grid = Microgrid::with_time_source(EngineConfig::default(), clock.clone());
    (Arc::new(grid), clock)
}

/// Seller with live generation and stored energy (40 kWh battery).
pub fn seller(id: &str, generation_kw: f64, stored_kwh: f64) -> Household {
    let mut h = Household::new(id, format!("Seller {id}"), 8.0, 40.0);
    h.generation_kw = generation_kw;
    h.stored_kwh = stored_kwh;
    h
}

/// Buyer with live consumption (100 kWh battery).
pub fn buyer(id: &str, consumption_kw: f64) -> Household {
    let mut h = Household::new(id, format!("Buyer {id}"), 0.0, 100.0);
    h.consumption_kw = consumption_kw;
    h
}

/// Normal-priority trade request.
pub fn request(buyer: &str, seller: &str, amount_kwh: f64, max_price: f64) -> TradeRequest {
    TradeRequest {
        buyer: buyer.to_string(),
        seller: seller.to_string(),
        amount_kwh,
        max_price_per_kwh: max_price,
        priority: Default::default(),
    }
}
