//! Unit Conversion
//!
//! Turns raw field values into physical quantities keyed by unit symbol,
//! and picks the reading in the user's preferred unit. Fixed channels use
//! built-in formulas; the eight analog inputs use formulas from the setup.

mod converter;
mod formula;

pub use converter::{Channel, UnitConverter};
pub use formula::{Formula, INPUT_PARAM};

use std::collections::BTreeMap;
use thiserror::Error;

/// Converted values keyed by unit symbol
pub type Readings = BTreeMap<String, f64>;

/// Conversion and rule-set errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConvertError {
    #[error("{channel}: preferred unit '{unit}' is not produced by its formula (available: {available:?})")]
    ConfigurationInconsistent {
        channel: String,
        unit: String,
        available: Vec<String>,
    },

    #[error("{channel}: unknown unit '{unit}' (supported: {allowed:?})")]
    UnknownUnit {
        channel: String,
        unit: String,
        allowed: Vec<String>,
    },

    #[error("{channel}: parameter '{param}' collides with the formula input")]
    ParamCollision { channel: String, param: String },

    #[error("{channel}: formula requires parameter '{param}'")]
    MissingParam { channel: String, param: String },

    #[error("{channel}: invalid formula: {message}")]
    Formula { channel: String, message: String },

    #[error("{channel}: evaluation failed: {message}")]
    Evaluation { channel: String, message: String },

    #[error("unknown status flag '{0}'")]
    UnknownFlag(String),
}
