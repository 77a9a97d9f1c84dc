//! Unit Conversion Functions
//!
//! Provides the conversion primitives used by the dashboard channels:
//! - Temperature: °C → °F
//! - Pressure: kPa → PSI / bar
//! - Air-Fuel Ratio: Lambda → gasoline AFR
//! - Speed and distance: km/h → mph, km → miles
//! - Piecewise linear interpolation for sensor curves

/// Stoichiometric air-fuel ratio of gasoline
pub const STOICH_AFR: f64 = 14.7;

/// Convert Celsius to Fahrenheit
pub fn celsius_to_fahrenheit(c: f64) -> f64 {
    c * 9.0 / 5.0 + 32.0
}

/// Convert kPa to PSI
pub fn kpa_to_psi(kpa: f64) -> f64 {
    kpa * 0.14503773773020923
}

/// Convert kPa to bar
pub fn kpa_to_bar(kpa: f64) -> f64 {
    kpa / 100.0
}

/// Convert Lambda to gasoline AFR
pub fn lambda_to_afr(lambda: f64) -> f64 {
    lambda * STOICH_AFR
}

/// Convert km/h to mph
pub fn kmh_to_mph(kmh: f64) -> f64 {
    kmh * 0.62137119223733
}

/// Convert kilometres to miles
pub fn km_to_miles(km: f64) -> f64 {
    kmh_to_mph(km)
}

/// Piecewise linear interpolation over `(x, y)` breakpoints sorted by `x`.
///
/// Values outside the table clamp to the first or last `y`. An empty table
/// yields `0.0`.
pub fn interpolate(x: f64, points: &[(f64, f64)]) -> f64 {
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return 0.0;
    };
    if x <= first.0 {
        return first.1;
    }
    if x >= last.0 {
        return last.1;
    }
    for pair in points.windows(2) {
        let (x0, y0) = pair[0];
        let (x1, y1) = pair[1];
        if x <= x1 {
            if (x1 - x0).abs() < f64::EPSILON {
                return y1;
            }
            return y0 + (x - x0) * (y1 - y0) / (x1 - x0);
        }
    }
    last.1
}
