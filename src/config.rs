//! TOML-based engine configuration.
//!
//! Every tunable the market engine, shedding controller, and simulation
//! stepper reference lives here, with defaults matching the baseline
//! deployment. Load from TOML with [`EngineConfig::from_toml_file`] or use
//! [`EngineConfig::default`].

use std::fmt;
use std::fs;
use std::path::Path;

use serde::Deserialize;

/// Top-level engine configuration parsed from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Pricing, trade, and market clock parameters.
    pub market: MarketConfig,
    /// Emergency load-shedding parameters.
    pub shedding: SheddingConfig,
    /// Simulation stepper timing parameters.
    pub simulation: SimTimingConfig,
}

/// Pricing, trade, and market clock parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MarketConfig {
    /// Base price per kWh fed into the pricing model.
    pub base_price: f64,
    /// Reference price during peak hours (reporting only).
    pub peak_price: f64,
    /// Reference price during off-peak hours (reporting only).
    pub off_peak_price: f64,
    /// Fraction of a household's stored energy counted as sellable per cycle.
    pub storage_discharge_fraction: f64,
    /// Storage units consumed or gained per kWh traded.
    pub storage_unit_factor: f64,
    /// Seconds a submitted trade stays valid before the sweeper expires it.
    pub trade_validity_secs: u64,
    /// Seconds between market ticks (aggregates, stability, expiry sweep).
    pub market_tick_secs: u64,
    /// Seconds between pricing ticks (current price recomputation).
    pub pricing_tick_secs: u64,
    /// Price multiplier for critical-priority trades.
    pub priority_premium_critical: f64,
    /// Price multiplier for high-priority trades.
    pub priority_premium_high: f64,
    /// Trades above this energy amount receive the volume discount.
    pub volume_discount_threshold_kwh: f64,
    /// Multiplier applied above the volume threshold.
    pub volume_discount_factor: f64,
    /// Number of completed trades returned in a market snapshot.
    pub snapshot_history_len: usize,
    /// Capacity of the engine event broadcast channel.
    pub event_channel_capacity: usize,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            base_price: 0.12,
            peak_price: 0.18,
            off_peak_price: 0.084,
            storage_discharge_fraction: 0.1,
            storage_unit_factor: 10.0,
            trade_validity_secs: 300,
            market_tick_secs: 30,
            pricing_tick_secs: 300,
            priority_premium_critical: 1.5,
            priority_premium_high: 1.2,
            volume_discount_threshold_kwh: 5.0,
            volume_discount_factor: 0.95,
            snapshot_history_len: 20,
            event_channel_capacity: 64,
        }
    }
}

/// Emergency load-shedding parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SheddingConfig {
    /// Factor applied to a shed household's consumption (0.7 = 30% cut).
    pub reduction_factor: f64,
}

impl Default for SheddingConfig {
    fn default() -> Self {
        Self {
            reduction_factor: 0.7,
        }
    }
}

/// Simulation stepper timing parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimTimingConfig {
    /// Seconds between simulation steps.
    pub step_secs: u64,
}

impl Default for SimTimingConfig {
    fn default() -> Self {
        Self { step_secs: 60 }
    }
}

/// Configuration error with field path and constraint description.
#[derive(Debug)]
pub struct ConfigError {
    /// Dotted field path (e.g., `"market.base_price"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {} — {}", self.field, self.message)
    }
}

impl EngineConfig {
    /// Parses an engine configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError {
            field: "config".to_string(),
            message: format!("cannot read \"{}\": {e}", path.display()),
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses an engine configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError {
            field: "toml".to_string(),
            message: e.to_string(),
        })
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let m = &self.market;

        if m.base_price <= 0.0 {
            errors.push(ConfigError {
                field: "market.base_price".into(),
                message: "must be > 0".into(),
            });
        }
        if !(0.0..=1.0).contains(&m.storage_discharge_fraction) {
            errors.push(ConfigError {
                field: "market.storage_discharge_fraction".into(),
                message: "must be in [0.0, 1.0]".into(),
            });
        }
        if m.storage_unit_factor <= 0.0 {
            errors.push(ConfigError {
                field: "market.storage_unit_factor".into(),
                message: "must be > 0".into(),
            });
        }
        if m.trade_validity_secs == 0 {
            errors.push(ConfigError {
                field: "market.trade_validity_secs".into(),
                message: "must be > 0".into(),
            });
        }
        if m.market_tick_secs == 0 {
            errors.push(ConfigError {
                field: "market.market_tick_secs".into(),
                message: "must be > 0".into(),
            });
        }
        if m.pricing_tick_secs == 0 {
            errors.push(ConfigError {
                field: "market.pricing_tick_secs".into(),
                message: "must be > 0".into(),
            });
        }
        if m.priority_premium_critical < 1.0 {
            errors.push(ConfigError {
                field: "market.priority_premium_critical".into(),
                message: "must be >= 1.0".into(),
            });
        }
        if m.priority_premium_high < 1.0 {
            errors.push(ConfigError {
                field: "market.priority_premium_high".into(),
                message: "must be >= 1.0".into(),
            });
        }
        if !(0.0..=1.0).contains(&m.volume_discount_factor) || m.volume_discount_factor == 0.0 {
            errors.push(ConfigError {
                field: "market.volume_discount_factor".into(),
                message: "must be in (0.0, 1.0]".into(),
            });
        }
        if m.event_channel_capacity == 0 {
            errors.push(ConfigError {
                field: "market.event_channel_capacity".into(),
                message: "must be > 0".into(),
            });
        }

        let s = &self.shedding;
        if !(0.0..=1.0).contains(&s.reduction_factor) || s.reduction_factor == 0.0 {
            errors.push(ConfigError {
                field: "shedding.reduction_factor".into(),
                message: "must be in (0.0, 1.0]".into(),
            });
        }

        if self.simulation.step_secs == 0 {
            errors.push(ConfigError {
                field: "simulation.step_secs".into(),
                message: "must be > 0".into(),
            });
        }

        errors
    }
}
