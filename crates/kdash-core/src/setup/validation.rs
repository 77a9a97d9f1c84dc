//! Validation of client-supplied setup documents

use serde_json::Value;

use super::{Setup, StyleSetting, ValidationError};
use crate::convert::UnitConverter;

/// Validate a setup document received from a client.
///
/// Checks the JSON shape, numeric ranges, every unit and formula, and that
/// each preferred unit is actually produced by its formula.
pub fn validate(raw: Value) -> Result<Setup, ValidationError> {
    let setup: Setup =
        serde_json::from_value(raw).map_err(|e| ValidationError::Malformed(e.to_string()))?;

    if !setup.odo.value.is_finite() || setup.odo.value < 0.0 {
        return Err(ValidationError::InvalidValue {
            field: "odo.value".to_string(),
            message: format!("must be a non-negative distance, got {}", setup.odo.value),
        });
    }

    validate_style(&setup.style)?;
    UnitConverter::from_setup(&setup)?;
    Ok(setup)
}

fn validate_style(style: &StyleSetting) -> Result<(), ValidationError> {
    let invalid = |field: &str, message: String| ValidationError::InvalidValue {
        field: format!("style.{field}"),
        message,
    };

    for (field, value) in [
        ("tpsLowerThreshold", style.tps_lower_threshold),
        ("tpsUpperThreshold", style.tps_upper_threshold),
    ] {
        if !(0.0..=100.0).contains(&value) {
            return Err(invalid(field, format!("must be a percentage, got {value}")));
        }
    }
    if style.tps_lower_threshold > style.tps_upper_threshold {
        return Err(invalid(
            "tpsLowerThreshold",
            format!(
                "must not exceed tpsUpperThreshold ({} > {})",
                style.tps_lower_threshold, style.tps_upper_threshold
            ),
        ));
    }
    if !style.elapsed_seconds.is_finite() || style.elapsed_seconds <= 0.0 {
        return Err(invalid(
            "elapsedSeconds",
            format!("must be a positive duration, got {}", style.elapsed_seconds),
        ));
    }
    Ok(())
}
