//! Demo mode - a simulated KPro for running the dashboard without a car
//!
//! Simulates an engine idling at ~850 RPM with random throttle blips while
//! the car rolls along at a slowly varying speed. Values are encoded into
//! response frames through the same command tables the decoder reads, so the
//! whole pipeline downstream of the transport is exercised.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Instant;

use crate::protocol::table::fields;
use crate::protocol::{Command, CommandTable, DeviceRevision, ProtocolError, Transport};

const IDLE_RPM: f64 = 850.0;
const RAMP_UP_MS: u64 = 300;
const HOLD_MS: u64 = 200;
const RAMP_DOWN_MS: u64 = 800;

#[derive(Debug, Clone, Copy, PartialEq)]
enum BlipState {
    /// Engine idling normally
    Idle,
    /// Throttle opening, RPM rising
    RampUp { start_ms: u64 },
    /// At peak RPM, holding
    Hold { start_ms: u64 },
    /// Throttle closing, RPM falling
    RampDown { start_ms: u64 },
}

/// Raw sensor values for one instant, already in device counts
#[derive(Debug, Clone, Default)]
struct RawSample {
    values: Vec<(&'static str, u16)>,
}

impl RawSample {
    fn set(&mut self, field: &'static str, value: f64) {
        let raw = value.round().clamp(0.0, u16::MAX as f64) as u16;
        self.values.push((field, raw));
    }
}

/// Engine simulator
struct EngineModel {
    last_update_ms: Option<u64>,
    next_blip_at_ms: u64,
    blip_state: BlipState,
    current_rpm: f64,
    blip_target_rpm: f64,
    rng: StdRng,
}

impl EngineModel {
    fn new(mut rng: StdRng) -> Self {
        let first_blip = rng.gen_range(8000..15000);
        Self {
            last_update_ms: None,
            next_blip_at_ms: first_blip,
            blip_state: BlipState::Idle,
            current_rpm: IDLE_RPM,
            blip_target_rpm: IDLE_RPM,
            rng,
        }
    }

    fn update_blip_state(&mut self, sim_time: u64) {
        match self.blip_state {
            BlipState::Idle => {
                if sim_time >= self.next_blip_at_ms {
                    self.blip_target_rpm = self.rng.gen_range(2000.0..4000.0);
                    self.blip_state = BlipState::RampUp { start_ms: sim_time };
                }
            }
            BlipState::RampUp { start_ms } => {
                if sim_time >= start_ms + RAMP_UP_MS {
                    self.blip_state = BlipState::Hold { start_ms: sim_time };
                }
            }
            BlipState::Hold { start_ms } => {
                if sim_time >= start_ms + HOLD_MS {
                    self.blip_state = BlipState::RampDown { start_ms: sim_time };
                }
            }
            BlipState::RampDown { start_ms } => {
                if sim_time >= start_ms + RAMP_DOWN_MS {
                    self.blip_state = BlipState::Idle;
                    self.next_blip_at_ms = sim_time + self.rng.gen_range(8000..15000);
                }
            }
        }
    }

    fn target_rpm(&self, sim_time: u64) -> f64 {
        match self.blip_state {
            BlipState::Idle => IDLE_RPM,
            BlipState::RampUp { start_ms } => {
                let progress = ((sim_time - start_ms) as f64 / RAMP_UP_MS as f64).min(1.0);
                IDLE_RPM + (self.blip_target_rpm - IDLE_RPM) * progress
            }
            BlipState::Hold { .. } => self.blip_target_rpm,
            BlipState::RampDown { start_ms } => {
                let progress = ((sim_time - start_ms) as f64 / RAMP_DOWN_MS as f64).min(1.0);
                self.blip_target_rpm + (IDLE_RPM - self.blip_target_rpm) * progress
            }
        }
    }

    /// Advance to `sim_time` and produce raw counts for every field
    fn sample(&mut self, sim_time: u64) -> RawSample {
        let delta_ms = self
            .last_update_ms
            .map(|last| sim_time.saturating_sub(last))
            .unwrap_or(0);
        self.last_update_ms = Some(sim_time);

        self.update_blip_state(sim_time);
        let target = self.target_rpm(sim_time);
        let rate = if target > self.current_rpm { 8000.0 } else { 3000.0 };
        let max_change = rate * delta_ms as f64 / 1000.0;
        self.current_rpm += (target - self.current_rpm).clamp(-max_change, max_change);

        let t = sim_time as f64 / 1000.0;
        let idle = matches!(self.blip_state, BlipState::Idle);
        let wobble = if idle {
            20.0 * (t * 2.5).sin() + 10.0 * (t * 7.3).sin()
        } else {
            0.0
        };
        let rpm = (self.current_rpm + wobble).max(0.0);

        let blip_progress = if self.blip_target_rpm > IDLE_RPM {
            ((self.current_rpm - IDLE_RPM) / (self.blip_target_rpm - IDLE_RPM)).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let tps_pct = match self.blip_state {
            BlipState::Idle => 1.5 + (t * 0.3).sin().abs(),
            BlipState::Hold { .. } => 45.0 + 5.0 * (t * 3.0).sin(),
            _ => 2.0 + blip_progress * 45.0,
        };

        let speed_kmh = (30.0 + 30.0 * (t / 20.0).sin()).max(0.0);
        let gear = match speed_kmh {
            s if s < 1.0 => 0.0,
            s if s < 15.0 => 1.0,
            s if s < 30.0 => 2.0,
            s if s < 45.0 => 3.0,
            _ => 4.0,
        };
        let map_kpa = if rpm < 1000.0 {
            35.0 + 10.0 * (1.0 - rpm / 1000.0)
        } else {
            25.0 + rpm / 100.0
        };
        let lambda = 1.0 + 0.02 * (t * 1.5).sin() + 0.007 * (t * 4.7).sin();
        // thermistor counts fall as the engine warms
        let ect_counts = 200.0 - 120.0 * (1.0 - (-t / 120.0).exp());
        let iat_counts = 170.0 + 5.0 * (t * 0.1).sin();
        let battery = 13.8 + 0.2 * (t * 0.5).sin();

        let mut sample = RawSample::default();
        sample.set(fields::RPM, rpm * 4.0);
        sample.set(fields::VSS, speed_kmh);
        sample.set(fields::TPS, 21.0 + tps_pct.clamp(0.0, 100.0) * 2.08);
        sample.set(fields::MAP, map_kpa.clamp(20.0, 105.0));
        sample.set(fields::CAM, 40.0 + 2.0 * (10.0 + rpm / 400.0));
        sample.set(fields::AFR, 32768.0 / lambda);
        sample.set(fields::GEAR, gear);
        sample.set(fields::MIL, 0.0);
        sample.set(fields::ECT, ect_counts);
        sample.set(fields::IAT, iat_counts);
        sample.set(fields::BAT, battery * 10.0);
        sample.set(fields::ETH, 10.0);
        sample.set(fields::FLT, 28.0 + 2.0 * (t * 0.05).sin());
        sample.set(fields::ECU_TYPE, 3.0);
        sample.set(fields::IGNITION, 1.0);
        sample.set(fields::SERIAL, 4242.0);
        sample.set(fields::FIRMWARE_MAJOR, 1.0);
        sample.set(fields::FIRMWARE_MINOR, 5.0);
        for flag in fields::STATUS_FLAGS {
            // brake switch bit flickers with the blips
            sample.set(flag, if idle { 0.0 } else { 0x08 as f64 });
        }
        for (n, field) in fields::ANALOG.into_iter().enumerate() {
            let volts = 0.5 + 0.5 * n as f64 + 0.1 * (t + n as f64).sin();
            sample.set(field, volts * 819.2);
        }
        sample
    }
}

/// A [`Transport`] backed by the engine simulator
pub struct DemoTransport {
    revision: DeviceRevision,
    engine: EngineModel,
    started: Option<Instant>,
}

impl DemoTransport {
    /// Simulate a device of the given revision
    pub fn new(revision: DeviceRevision) -> Self {
        Self::from_rng(revision, StdRng::from_entropy())
    }

    /// Simulate with a fixed seed so blips happen at reproducible times
    pub fn with_seed(revision: DeviceRevision, seed: u64) -> Self {
        Self::from_rng(revision, StdRng::seed_from_u64(seed))
    }

    fn from_rng(revision: DeviceRevision, rng: StdRng) -> Self {
        Self {
            revision,
            engine: EngineModel::new(rng),
            started: None,
        }
    }

    /// Encode the simulated state at `sim_time` into a response frame
    pub fn frame_at(&mut self, command: Command, sim_time: u64) -> Result<Vec<u8>, ProtocolError> {
        let table = CommandTable::for_revision(self.revision);
        let layout = table.layout(command).ok_or_else(|| {
            ProtocolError::SerialError(format!(
                "{command:?} is not supported by {}",
                self.revision
            ))
        })?;

        let sample = self.engine.sample(sim_time);
        let mut frame = vec![0u8; layout.frame_len()];
        for (field, raw) in sample.values {
            if let Some(field_layout) = layout.field(field) {
                field_layout.write(&mut frame, raw);
            }
        }
        Ok(frame)
    }
}

impl Transport for DemoTransport {
    fn discover_and_bind(&mut self) -> Result<DeviceRevision, ProtocolError> {
        self.started.get_or_insert_with(Instant::now);
        Ok(self.revision)
    }

    fn send_command(&mut self, command: Command) -> Result<Vec<u8>, ProtocolError> {
        let started = self.started.ok_or(ProtocolError::NotConnected)?;
        let sim_time = started.elapsed().as_millis() as u64;
        self.frame_at(command, sim_time)
    }

    fn is_connected(&self) -> bool {
        self.started.is_some()
    }
}
