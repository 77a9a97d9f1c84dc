//! Driving style
//!
//! Classifies how hard the car is being driven from the average throttle
//! position over a sliding time window.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use crate::setup::StyleSetting;

/// Driving style published in the `style` channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StyleStatus {
    /// Average throttle below the lower threshold
    Eco,
    /// Average throttle between the thresholds
    Normal,
    /// Average throttle above the upper threshold
    Sport,
}

impl StyleStatus {
    /// Channel value of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eco => "eco",
            Self::Normal => "normal",
            Self::Sport => "sport",
        }
    }
}

impl fmt::Display for StyleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sliding-window throttle accumulator
#[derive(Debug, Clone)]
pub struct DrivingStyle {
    lower: f64,
    upper: f64,
    window: Duration,
    samples: VecDeque<(f64, Duration)>,
    covered: Duration,
    status: StyleStatus,
}

impl DrivingStyle {
    /// Build from the setup thresholds
    pub fn new(setting: &StyleSetting) -> Self {
        Self {
            lower: setting.tps_lower_threshold,
            upper: setting.tps_upper_threshold,
            window: Duration::from_secs_f64(setting.elapsed_seconds.max(0.0)),
            samples: VecDeque::new(),
            covered: Duration::ZERO,
            status: StyleStatus::Normal,
        }
    }

    /// Current classification
    pub fn status(&self) -> StyleStatus {
        self.status
    }

    /// Record a throttle reading (percent) held for `elapsed`.
    ///
    /// Samples older than the window are dropped. The status only changes
    /// once the window has been filled, so a fresh accumulator reports
    /// `Normal` for its first `elapsed_seconds`.
    pub fn update(&mut self, tps: f64, elapsed: Duration) -> StyleStatus {
        if !tps.is_finite() || elapsed.is_zero() {
            return self.status;
        }

        self.samples.push_back((tps, elapsed));
        self.covered += elapsed;
        while let Some(&(_, oldest)) = self.samples.front() {
            if self.covered.saturating_sub(oldest) < self.window {
                break;
            }
            self.covered -= oldest;
            self.samples.pop_front();
        }

        if self.covered >= self.window {
            let weighted: f64 = self
                .samples
                .iter()
                .map(|(tps, held)| tps * held.as_secs_f64())
                .sum();
            let average = weighted / self.covered.as_secs_f64();
            self.status = if average < self.lower {
                StyleStatus::Eco
            } else if average > self.upper {
                StyleStatus::Sport
            } else {
                StyleStatus::Normal
            };
        }
        self.status
    }
}
