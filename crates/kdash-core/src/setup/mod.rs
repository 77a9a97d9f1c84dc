//! Dashboard Setup
//!
//! The user's setup document: preferred units, analog input formulas,
//! status flag masks, driving style thresholds and the persisted odometer
//! reading. Stored as JSON and
//! exchanged verbatim with dashboard clients.

mod error;
mod store;
mod validation;

pub use error::{SetupError, ValidationError};
pub use store::{default_setup_path, ConfigStore, FileConfigStore};
pub use validation::validate;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Setup format version written by this crate
pub const SETUP_VERSION: &str = "1.0";

/// Number of generic analog inputs
pub const ANALOG_INPUTS: usize = 8;

/// Complete setup document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setup {
    /// Format version
    pub version: String,
    /// Display options
    pub screen: ScreenSetting,
    /// Intake air temperature unit
    pub iat: UnitSetting,
    /// Coolant temperature unit
    pub ect: UnitSetting,
    /// Vehicle speed unit
    pub vss: UnitSetting,
    /// Air-fuel reading unit
    pub o2: UnitSetting,
    /// Manifold pressure unit
    pub map: UnitSetting,
    /// Odometer reading and unit
    pub odo: OdometerSetting,
    /// Generic analog inputs, indexed by input number
    pub analog: [AnalogSetting; ANALOG_INPUTS],
    /// Driving style thresholds
    #[serde(default)]
    pub style: StyleSetting,
    /// Bit masks for flags sharing the status byte, keyed by flag name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub status_bits: BTreeMap<String, u8>,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            version: SETUP_VERSION.to_string(),
            screen: ScreenSetting::default(),
            iat: UnitSetting::new("celsius"),
            ect: UnitSetting::new("celsius"),
            vss: UnitSetting::new("kmh"),
            o2: UnitSetting::new("afr"),
            map: UnitSetting::new("bar"),
            odo: OdometerSetting {
                value: 0.0,
                unit: "km".to_string(),
            },
            analog: std::array::from_fn(|_| AnalogSetting::default()),
            style: StyleSetting::default(),
            status_bits: BTreeMap::new(),
        }
    }
}

/// Display options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScreenSetting {
    /// Rotate the dashboard 180 degrees
    #[serde(default)]
    pub rotate: bool,
}

/// Preferred unit of a fixed channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSetting {
    /// Unit symbol
    pub unit: String,
}

impl UnitSetting {
    /// Create a unit setting
    pub fn new(unit: impl Into<String>) -> Self {
        Self { unit: unit.into() }
    }
}

/// Persisted odometer reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OdometerSetting {
    /// Distance in kilometres
    pub value: f64,
    /// Display unit
    pub unit: String,
}

/// Throttle thresholds for the driving style classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleSetting {
    /// Average throttle (percent) below which driving is `eco`
    pub tps_lower_threshold: f64,
    /// Average throttle (percent) above which driving is `sport`
    pub tps_upper_threshold: f64,
    /// Length of the averaging window in seconds
    pub elapsed_seconds: f64,
}

impl Default for StyleSetting {
    fn default() -> Self {
        Self {
            tps_lower_threshold: 25.0,
            tps_upper_threshold: 75.0,
            elapsed_seconds: 10.0,
        }
    }
}

/// Configuration of one analog input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalogSetting {
    /// Conversion formula
    pub formula: FormulaSpec,
    /// Preferred output unit
    pub unit: String,
    /// Extra formula parameters
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, f64>,
}

impl Default for AnalogSetting {
    fn default() -> Self {
        Self {
            formula: FormulaSpec::Builtin("voltage".to_string()),
            unit: "volts".to_string(),
            params: BTreeMap::new(),
        }
    }
}

/// Formula as written in the setup document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormulaSpec {
    /// Name of a built-in formula ("voltage", "divider")
    Builtin(String),
    /// Unit symbol → arithmetic expression over `voltage` and the params
    Expressions(BTreeMap<String, String>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_round_trips_through_json() {
        let setup = Setup::default();
        let value = serde_json::to_value(&setup).unwrap();
        assert_eq!(value["vss"], json!({"unit": "kmh"}));
        assert_eq!(value["analog"].as_array().unwrap().len(), ANALOG_INPUTS);
        assert!(value.get("status_bits").is_none());
        assert_eq!(
            value["style"],
            json!({"tpsLowerThreshold": 25.0, "tpsUpperThreshold": 75.0, "elapsedSeconds": 10.0})
        );

        let back: Setup = serde_json::from_value(value).unwrap();
        assert_eq!(back, setup);
    }

    #[test]
    fn test_style_defaults_when_absent() {
        let mut value = serde_json::to_value(Setup::default()).unwrap();
        value.as_object_mut().unwrap().remove("style");
        let setup: Setup = serde_json::from_value(value).unwrap();
        assert_eq!(setup.style, StyleSetting::default());
    }

    #[test]
    fn test_formula_spec_forms() {
        let named: FormulaSpec = serde_json::from_value(json!("divider")).unwrap();
        assert_eq!(named, FormulaSpec::Builtin("divider".to_string()));

        let custom: FormulaSpec =
            serde_json::from_value(json!({"psi": "voltage * 25 - 12.5"})).unwrap();
        assert!(matches!(custom, FormulaSpec::Expressions(map) if map.contains_key("psi")));
    }
}
