//! Export helpers for simulation series.

pub mod export;
