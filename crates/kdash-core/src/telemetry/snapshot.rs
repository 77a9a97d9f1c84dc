//! Snapshot assembly

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::error;

use crate::convert::{Channel, UnitConverter};
use crate::protocol::table::fields;
use crate::protocol::PolledFrames;

/// A single channel value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelValue {
    /// Whole number
    Integer(i64),
    /// Converted measurement
    Number(f64),
    /// On/off indicator
    Flag(bool),
    /// Text such as the firmware version
    Text(String),
}

/// One fully converted telemetry record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    channels: BTreeMap<String, ChannelValue>,
}

impl Snapshot {
    /// Value of a channel
    pub fn get(&self, name: &str) -> Option<&ChannelValue> {
        self.channels.get(name)
    }

    /// Numeric value of a channel, if it is a number or integer
    pub fn number(&self, name: &str) -> Option<f64> {
        match self.channels.get(name)? {
            ChannelValue::Integer(v) => Some(*v as f64),
            ChannelValue::Number(v) => Some(*v),
            _ => None,
        }
    }

    /// Whether the channel is present
    pub fn contains(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    /// Iterate channels in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ChannelValue)> {
        self.channels.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of channels
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether the snapshot is empty
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub(crate) fn insert(&mut self, name: impl Into<String>, value: ChannelValue) {
        self.channels.insert(name.into(), value);
    }
}

fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Build the snapshot for one poll cycle.
///
/// Channels the bound revision does not carry, or whose frame was dropped
/// this cycle, are left out. A conversion failure drops only that channel.
pub fn assemble(
    frames: &PolledFrames,
    converter: &UnitConverter,
    odometer_km: f64,
    uptime: Duration,
) -> Snapshot {
    let mut snapshot = Snapshot::default();

    let raw = |field: &str| -> Option<u16> {
        match frames.field(field) {
            Ok(value) => value,
            Err(e) => {
                error!(field, error = %e, "decoded frame is missing a table field");
                None
            }
        }
    };
    let convert = |channel: Channel, input: f64| -> Option<f64> {
        match converter.resolve(channel, input) {
            Ok(value) => Some(value),
            Err(e) => {
                error!(%channel, error = %e, "conversion failed");
                None
            }
        }
    };

    let converted = [
        (fields::VSS, Channel::Speed),
        (fields::ECT, Channel::CoolantTemp),
        (fields::IAT, Channel::IntakeTemp),
        (fields::BAT, Channel::Battery),
        (fields::MAP, Channel::ManifoldPressure),
        (fields::CAM, Channel::Cam),
        (fields::FLT, Channel::FuelTemp),
    ];
    for (field, channel) in converted {
        if let Some(value) = raw(field).and_then(|r| convert(channel, r as f64)) {
            snapshot.insert(field, ChannelValue::Number(value));
        }
    }

    if let Some(value) = raw(fields::AFR).and_then(|r| convert(Channel::AirFuel, r as f64)) {
        snapshot.insert("o2", ChannelValue::Number(value));
    }

    for (field, channel) in [(fields::RPM, Channel::Rpm), (fields::TPS, Channel::Throttle)] {
        if let Some(value) = raw(field).and_then(|r| convert(channel, r as f64)) {
            snapshot.insert(field, ChannelValue::Integer(value.round() as i64));
        }
    }

    for (n, field) in fields::ANALOG.into_iter().enumerate() {
        let voltage = raw(field).map(UnitConverter::analog_voltage);
        if let Some(value) = voltage.and_then(|v| convert(Channel::Analog(n), v)) {
            snapshot.insert(field, ChannelValue::Number(value));
        }
    }

    for (field, key) in [
        (fields::GEAR, "gear"),
        (fields::ETH, "eth"),
        (fields::ECU_TYPE, "ecu"),
        (fields::IGNITION, "ign"),
        (fields::SERIAL, "serial"),
    ] {
        if let Some(value) = raw(field) {
            snapshot.insert(key, ChannelValue::Integer(value as i64));
        }
    }

    if let Some(value) = raw(fields::MIL) {
        snapshot.insert("mil", ChannelValue::Flag(value != 0));
    }

    for flag in fields::STATUS_FLAGS {
        if let Some(on) = raw(flag).and_then(|status| converter.flag(flag, status)) {
            snapshot.insert(flag, ChannelValue::Flag(on));
        }
    }

    if let (Some(major), Some(minor)) = (raw(fields::FIRMWARE_MAJOR), raw(fields::FIRMWARE_MINOR)) {
        snapshot.insert("fmw", ChannelValue::Text(format!("{major}.{minor:02}")));
    }

    if let Some(value) = convert(Channel::Odometer, odometer_km) {
        snapshot.insert("odo", ChannelValue::Number(value));
    }
    snapshot.insert("time", ChannelValue::Text(format_uptime(uptime)));
    snapshot.insert("ver", ChannelValue::Text(crate::VERSION.to_string()));
    snapshot.insert(
        "rev",
        ChannelValue::Text(frames.revision().as_str().to_string()),
    );

    snapshot
}
