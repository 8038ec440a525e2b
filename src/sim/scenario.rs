//! Simulation scenarios and preset definitions.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Parameters shaping a simulation's synthetic telemetry.
///
/// All fields have defaults matching the baseline scenario. Load from TOML
/// with [`Scenario::from_toml_file`] or use a named preset via
/// [`Scenario::from_preset`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Scenario {
    /// Scenario identifier referenced by `start_simulation`.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Simulated duration in hours.
    pub duration_hours: u64,
    /// Relative spread of device and household load sampling (0.0–1.0).
    pub load_variation: f64,
    /// Relative spread of household generation sampling (0.0–1.0).
    pub generation_variation: f64,
    /// Relative spread of household storage sampling (0.0–1.0).
    pub storage_variation: f64,
    /// Grid load above this ceiling raises the warning flag (kW).
    pub grid_load_ceiling_kw: f64,
    /// Frequency noise amplitude around 50 Hz.
    pub frequency_noise_hz: f64,
    /// Voltage noise amplitude around 230 V.
    pub voltage_noise_v: f64,
    /// Seed for the simulation's random source.
    pub seed: u64,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            id: "baseline".to_string(),
            name: "Baseline day".to_string(),
            duration_hours: 24,
            load_variation: 0.2,
            generation_variation: 0.2,
            storage_variation: 0.1,
            grid_load_ceiling_kw: 100.0,
            frequency_noise_hz: 0.05,
            voltage_noise_v: 2.0,
            seed: 42,
        }
    }
}

impl Scenario {
    /// Baseline scenario: mild variation, generous grid ceiling.
    pub fn baseline() -> Self {
        Self::default()
    }

    /// Volatile-solar preset: cloud-driven generation swings.
    pub fn volatile_solar() -> Self {
        Self {
            id: "volatile_solar".to_string(),
            name: "Volatile solar".to_string(),
            generation_variation: 0.6,
            load_variation: 0.3,
            grid_load_ceiling_kw: 80.0,
            frequency_noise_hz: 0.1,
            ..Self::default()
        }
    }

    /// Heatwave preset: high, spiky demand against a tight ceiling.
    pub fn heatwave() -> Self {
        Self {
            id: "heatwave".to_string(),
            name: "Heatwave demand".to_string(),
            duration_hours: 48,
            load_variation: 0.5,
            storage_variation: 0.2,
            grid_load_ceiling_kw: 60.0,
            voltage_noise_v: 4.0,
            ..Self::default()
        }
    }

    /// Available preset names.
    pub const PRESETS: &[&str] = &["baseline", "volatile_solar", "heatwave"];

    /// Loads a scenario from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "baseline" => Ok(Self::baseline()),
            "volatile_solar" => Ok(Self::volatile_solar()),
            "heatwave" => Ok(Self::heatwave()),
            _ => Err(ConfigError {
                field: "scenario".to_string(),
                message: format!(
                    "unknown scenario \"{name}\", available: {}",
                    Self::PRESETS.join(", ")
                ),
            }),
        }
    }

    /// Parses a scenario from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError {
            field: "scenario".to_string(),
            message: format!("cannot read \"{}\": {e}", path.display()),
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a scenario from a TOML string.
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
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.duration_hours == 0 {
            errors.push(ConfigError {
                field: "duration_hours".into(),
                message: "must be > 0".into(),
            });
        }
        for (field, value) in [
            ("load_variation", self.load_variation),
            ("generation_variation", self.generation_variation),
            ("storage_variation", self.storage_variation),
        ] {
            if !(0.0..=1.0).contains(&value) {
                errors.push(ConfigError {
                    field: field.into(),
                    message: "must be in [0.0, 1.0]".into(),
                });
            }
        }
        if self.grid_load_ceiling_kw <= 0.0 {
            errors.push(ConfigError {
                field: "grid_load_ceiling_kw".into(),
                message: "must be > 0".into(),
            });
        }
        if self.frequency_noise_hz < 0.0 || self.voltage_noise_v < 0.0 {
            errors.push(ConfigError {
                field: "frequency_noise_hz".into(),
                message: "noise amplitudes must be >= 0".into(),
            });
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_presets_are_valid() {
        for name in Scenario::PRESETS {
            let scenario = Scenario::from_preset(name);
            assert!(scenario.is_ok(), "preset \"{name}\" should load");
            let errors = scenario.as_ref().map(|s| s.validate()).unwrap_or_default();
            assert!(
                errors.is_empty(),
                "preset \"{name}\" should be valid: {errors:?}"
            );
        }
    }

    #[test]
    fn from_preset_unknown() {
        let err = Scenario::from_preset("nonexistent");
        assert!(err.is_err());
        let e = err.err();
        assert!(e.as_ref().map(|e| e.message.contains("unknown scenario")) == Some(true));
    }

    #[test]
    fn heatwave_is_tighter_than_baseline() {
        let base = Scenario::baseline();
        let heat = Scenario::heatwave();
        assert!(heat.grid_load_ceiling_kw < base.grid_load_ceiling_kw);
        assert!(heat.load_variation > base.load_variation);
    }

    #[test]
    fn valid_toml_parses() {
        let toml = r#"
id = "microburst"
name = "Microburst"
duration_hours = 6
load_variation = 0.8
grid_load_ceiling_kw = 40.0
seed = 7
"#;
        let scenario = Scenario::from_toml_str(toml);
        assert!(scenario.is_ok(), "valid TOML should parse: {:?}", scenario.err());
        let scenario = scenario.ok();
        assert_eq!(scenario.as_ref().map(|s| s.duration_hours), Some(6));
        // unset fields keep defaults
        assert_eq!(scenario.as_ref().map(|s| s.storage_variation), Some(0.1));
    }

    #[test]
    fn invalid_toml_unknown_field() {
        let result = Scenario::from_toml_str("bogus_field = 1\n");
        assert!(result.is_err());
    }

    #[test]
    fn validation_catches_out_of_range_variation() {
        let mut scenario = Scenario::baseline();
        scenario.load_variation = 1.5;
        let errors = scenario.validate();
        assert!(errors.iter().any(|e| e.field == "load_variation"));
    }

    #[test]
    fn validation_catches_zero_duration() {
        let mut scenario = Scenario::baseline();
        scenario.duration_hours = 0;
        let errors = scenario.validate();
        assert!(errors.iter().any(|e| e.field == "duration_hours"));
    }
}
