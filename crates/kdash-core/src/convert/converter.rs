//! Channel conversion rules

use std::collections::BTreeMap;
use std::fmt;

use super::{ConvertError, Formula, Readings};
use crate::protocol::table::fields;
use crate::setup::{Setup, ANALOG_INPUTS};
use crate::unit_conversion::{
    celsius_to_fahrenheit, interpolate, km_to_miles, kmh_to_mph, kpa_to_bar, kpa_to_psi,
    lambda_to_afr,
};

/// ADC counts per volt on the analog inputs (4096 counts = 5 V)
const ANALOG_COUNTS_PER_VOLT: f64 = 819.2;

/// Thermistor curve shared by the coolant and intake sensors: (counts, °C)
const THERMISTOR_CURVE: [(f64, f64); 14] = [
    (0.0, 150.0),
    (20.0, 120.0),
    (40.0, 100.0),
    (60.0, 85.0),
    (80.0, 73.0),
    (100.0, 62.0),
    (120.0, 52.0),
    (140.0, 43.0),
    (160.0, 34.0),
    (180.0, 24.0),
    (200.0, 13.0),
    (220.0, 0.0),
    (240.0, -18.0),
    (255.0, -40.0),
];

/// Throttle sensor travel: (counts, %)
const THROTTLE_CURVE: [(f64, f64); 2] = [(21.0, 0.0), (229.0, 100.0)];

/// A telemetry quantity that goes through unit conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Channel {
    /// Engine speed
    Rpm,
    /// Vehicle speed
    Speed,
    /// Engine coolant temperature
    CoolantTemp,
    /// Intake air temperature
    IntakeTemp,
    /// Fuel temperature
    FuelTemp,
    /// Battery voltage
    Battery,
    /// Manifold absolute pressure
    ManifoldPressure,
    /// Wideband air-fuel reading
    AirFuel,
    /// Throttle position
    Throttle,
    /// VTC cam angle
    Cam,
    /// Ethanol content
    Ethanol,
    /// Accumulated distance
    Odometer,
    /// Generic analog input 0..=7
    Analog(usize),
}

impl Channel {
    /// Units a fixed channel can produce. Analog inputs depend on their formula.
    pub fn builtin_units(&self) -> &'static [&'static str] {
        match self {
            Channel::Rpm => &["rpm"],
            Channel::Speed => &["kmh", "mph"],
            Channel::CoolantTemp | Channel::IntakeTemp | Channel::FuelTemp => {
                &["celsius", "fahrenheit"]
            }
            Channel::Battery => &["volts"],
            Channel::ManifoldPressure => &["bar", "mbar", "psi", "kpa"],
            Channel::AirFuel => &["afr", "lambda"],
            Channel::Throttle | Channel::Ethanol => &["percent"],
            Channel::Cam => &["degrees"],
            Channel::Odometer => &["km", "miles"],
            Channel::Analog(_) => &[],
        }
    }

    fn builtin(&self, raw: f64) -> Readings {
        let pairs: Vec<(&str, f64)> = match self {
            Channel::Rpm => vec![("rpm", raw / 4.0)],
            Channel::Speed => vec![("kmh", raw), ("mph", kmh_to_mph(raw))],
            Channel::CoolantTemp | Channel::IntakeTemp => {
                let c = interpolate(raw, &THERMISTOR_CURVE);
                vec![("celsius", c), ("fahrenheit", celsius_to_fahrenheit(c))]
            }
            Channel::FuelTemp => vec![("celsius", raw), ("fahrenheit", celsius_to_fahrenheit(raw))],
            Channel::Battery => vec![("volts", raw * 0.1)],
            Channel::ManifoldPressure => vec![
                ("kpa", raw),
                ("bar", kpa_to_bar(raw)),
                ("mbar", raw * 10.0),
                ("psi", kpa_to_psi(raw)),
            ],
            Channel::AirFuel => {
                let lambda = if raw > 0.0 { 32768.0 / raw } else { 0.0 };
                vec![("lambda", lambda), ("afr", lambda_to_afr(lambda))]
            }
            Channel::Throttle => vec![("percent", interpolate(raw, &THROTTLE_CURVE))],
            Channel::Cam => vec![("degrees", (raw - 40.0) * 0.5)],
            Channel::Ethanol => vec![("percent", raw)],
            Channel::Odometer => vec![("km", raw), ("miles", km_to_miles(raw))],
            Channel::Analog(_) => Vec::new(),
        };
        pairs
            .into_iter()
            .map(|(unit, value)| (unit.to_string(), value))
            .collect()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Rpm => f.write_str(fields::RPM),
            Channel::Speed => f.write_str(fields::VSS),
            Channel::CoolantTemp => f.write_str(fields::ECT),
            Channel::IntakeTemp => f.write_str(fields::IAT),
            Channel::FuelTemp => f.write_str(fields::FLT),
            Channel::Battery => f.write_str(fields::BAT),
            Channel::ManifoldPressure => f.write_str(fields::MAP),
            Channel::AirFuel => f.write_str("o2"),
            Channel::Throttle => f.write_str(fields::TPS),
            Channel::Cam => f.write_str(fields::CAM),
            Channel::Ethanol => f.write_str(fields::ETH),
            Channel::Odometer => f.write_str("odo"),
            Channel::Analog(n) => write!(f, "an{n}"),
        }
    }
}

#[derive(Debug, Clone)]
struct AnalogRule {
    formula: Formula,
    params: BTreeMap<String, f64>,
    unit: String,
}

/// The active conversion rule set.
///
/// Built in one piece from a [`Setup`] and never modified afterwards; a new
/// setup produces a new converter that replaces this one wholesale.
#[derive(Debug, Clone)]
pub struct UnitConverter {
    units: BTreeMap<Channel, String>,
    analog: Vec<AnalogRule>,
    status_bits: BTreeMap<String, u8>,
}

impl UnitConverter {
    /// Build and check the rule set for a setup
    pub fn from_setup(setup: &Setup) -> Result<Self, ConvertError> {
        let mut units = BTreeMap::new();
        for (channel, unit) in [
            (Channel::IntakeTemp, &setup.iat.unit),
            (Channel::CoolantTemp, &setup.ect.unit),
            (Channel::FuelTemp, &setup.ect.unit),
            (Channel::Speed, &setup.vss.unit),
            (Channel::AirFuel, &setup.o2.unit),
            (Channel::ManifoldPressure, &setup.map.unit),
            (Channel::Odometer, &setup.odo.unit),
        ] {
            let allowed = channel.builtin_units();
            if !allowed.contains(&unit.as_str()) {
                return Err(ConvertError::UnknownUnit {
                    channel: channel.to_string(),
                    unit: unit.clone(),
                    allowed: allowed.iter().map(|u| u.to_string()).collect(),
                });
            }
            units.insert(channel, unit.clone());
        }

        let mut analog = Vec::with_capacity(ANALOG_INPUTS);
        for (n, input) in setup.analog.iter().enumerate() {
            let channel = Channel::Analog(n).to_string();
            let formula = Formula::compile(&input.formula, &input.params, &channel)?;
            let available = formula.units();
            if !available.contains(&input.unit) {
                return Err(ConvertError::ConfigurationInconsistent {
                    channel,
                    unit: input.unit.clone(),
                    available,
                });
            }
            analog.push(AnalogRule {
                formula,
                params: input.params.clone(),
                unit: input.unit.clone(),
            });
        }

        for flag in setup.status_bits.keys() {
            if !fields::STATUS_FLAGS.contains(&flag.as_str()) {
                return Err(ConvertError::UnknownFlag(flag.clone()));
            }
        }

        Ok(Self {
            units,
            analog,
            status_bits: setup.status_bits.clone(),
        })
    }

    fn analog_rule(&self, n: usize) -> Result<&AnalogRule, ConvertError> {
        self.analog.get(n).ok_or_else(|| ConvertError::Formula {
            channel: Channel::Analog(n).to_string(),
            message: format!("only {ANALOG_INPUTS} analog inputs exist"),
        })
    }

    /// Convert a raw value (a voltage for analog inputs) into every unit the
    /// channel supports
    pub fn convert(&self, channel: Channel, input: f64) -> Result<Readings, ConvertError> {
        match channel {
            Channel::Analog(n) => {
                let rule = self.analog_rule(n)?;
                rule.formula
                    .evaluate(input, &rule.params, &channel.to_string())
            }
            fixed => Ok(fixed.builtin(input)),
        }
    }

    /// Unit the user wants to see for a channel
    pub fn preferred_unit(&self, channel: Channel) -> &str {
        match channel {
            Channel::Analog(n) => self.analog.get(n).map(|r| r.unit.as_str()).unwrap_or(""),
            fixed => self
                .units
                .get(&fixed)
                .map(String::as_str)
                .or_else(|| fixed.builtin_units().first().copied())
                .unwrap_or(""),
        }
    }

    /// Units a channel produces under the current rules
    pub fn supported_units(&self, channel: Channel) -> Vec<String> {
        match channel {
            Channel::Analog(n) => self
                .analog
                .get(n)
                .map(|r| r.formula.units())
                .unwrap_or_default(),
            fixed => fixed.builtin_units().iter().map(|u| u.to_string()).collect(),
        }
    }

    /// Convert and return the value in the preferred unit
    pub fn resolve(&self, channel: Channel, input: f64) -> Result<f64, ConvertError> {
        let mut readings = self.convert(channel, input)?;
        let unit = self.preferred_unit(channel);
        readings
            .remove(unit)
            .ok_or_else(|| ConvertError::ConfigurationInconsistent {
                channel: channel.to_string(),
                unit: unit.to_string(),
                available: readings.keys().cloned().collect(),
            })
    }

    /// Input voltage for raw analog counts
    pub fn analog_voltage(counts: u16) -> f64 {
        counts as f64 / ANALOG_COUNTS_PER_VOLT
    }

    /// Derive a status flag from the shared status byte, if a mask is configured
    pub fn flag(&self, name: &str, status: u16) -> Option<bool> {
        self.status_bits
            .get(name)
            .map(|mask| status & (*mask as u16) != 0)
    }
}
