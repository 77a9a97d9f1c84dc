//! Odometer
//!
//! Integrates vehicle speed over time on top of the persisted reading.

use std::time::Duration;

/// Distance accumulator seeded from the setup's odometer value
#[derive(Debug, Clone)]
pub struct Odometer {
    km: f64,
    persisted_km: f64,
}

impl Odometer {
    /// Start from a persisted reading in kilometres
    pub fn new(km: f64) -> Self {
        Self {
            km,
            persisted_km: km,
        }
    }

    /// Current reading in kilometres
    pub fn km(&self) -> f64 {
        self.km
    }

    /// Add the distance covered at `speed_kmh` during `elapsed`.
    ///
    /// Returns `true` when a whole kilometre boundary has been crossed since
    /// the last persisted value, i.e. when the reading should be saved.
    pub fn advance(&mut self, speed_kmh: f64, elapsed: Duration) -> bool {
        if speed_kmh.is_finite() && speed_kmh > 0.0 {
            self.km += speed_kmh * elapsed.as_secs_f64() / 3600.0;
        }
        self.km.floor() > self.persisted_km.floor()
    }

    /// Record that the current reading was saved
    pub fn mark_persisted(&mut self) {
        self.persisted_km = self.km;
    }

    /// Replace the reading, e.g. after the user edited it
    pub fn rebase(&mut self, km: f64) {
        self.km = km;
        self.persisted_km = km;
    }
}
