//! Grid stability classification and the derived grid status record.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Coarse classification of grid health from the supply/load ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stability {
    Excellent,
    Stable,
    Warning,
    Critical,
}

impl Stability {
    /// Classifies `supply / max(load, 1)`.
    pub fn classify(load_kw: f64, supply_kw: f64) -> Self {
        let ratio = supply_kw / load_kw.max(1.0);
        if ratio >= 1.2 {
            Stability::Excellent
        } else if ratio >= 1.0 {
            Stability::Stable
        } else if ratio >= 0.8 {
            Stability::Warning
        } else {
            Stability::Critical
        }
    }
}

impl fmt::Display for Stability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stability::Excellent => "excellent",
            Stability::Stable => "stable",
            Stability::Warning => "warning",
            Stability::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Aggregate grid figures, recomputed each market tick.
#[derive(Debug, Clone, Serialize)]
pub struct GridStatus {
    /// Total consumption across online households (kW).
    pub total_load_kw: f64,
    /// Total generation plus the sellable storage fraction (kW).
    pub total_supply_kw: f64,
    /// High-water mark of `total_load_kw`; never decreases in-process.
    pub peak_load_kw: f64,
    pub stability: Stability,
    pub updated_at: DateTime<Utc>,
}

impl GridStatus {
    /// Empty-grid status at engine construction.
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            total_load_kw: 0.0,
            total_supply_kw: 0.0,
            peak_load_kw: 0.0,
            stability: Stability::classify(0.0, 0.0),
            updated_at: at,
        }
    }
}
