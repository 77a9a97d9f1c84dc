//! Shared fixtures for integration tests

#![allow(dead_code)]

use kdash_core::protocol::table::fields;
use kdash_core::protocol::{Command, CommandTable, DeviceRevision, ProtocolError, Transport};
use kdash_core::setup::{ConfigStore, Setup, SetupError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Raw values of a warm engine idling at 850 rpm while rolling at 100 km/h
pub fn idle_values() -> Vec<(&'static str, u16)> {
    let mut values = vec![
        (fields::RPM, 3400),
        (fields::VSS, 100),
        (fields::TPS, 125),
        (fields::MAP, 100),
        (fields::CAM, 60),
        (fields::AFR, 32768),
        (fields::GEAR, 3),
        (fields::MIL, 0),
        (fields::ECT, 220),
        (fields::IAT, 40),
        (fields::BAT, 138),
        (fields::ETH, 10),
        (fields::FLT, 30),
        (fields::ECU_TYPE, 3),
        (fields::IGNITION, 1),
        (fields::SERIAL, 4242),
        (fields::FIRMWARE_MAJOR, 1),
        (fields::FIRMWARE_MINOR, 5),
    ];
    values.extend(fields::STATUS_FLAGS.iter().map(|flag| (*flag, 0x08)));
    values.extend(fields::ANALOG.iter().map(|input| (*input, 2048)));
    values
}

/// Encode raw values into a response frame for one command
pub fn encode(revision: DeviceRevision, command: Command, values: &[(&str, u16)]) -> Vec<u8> {
    let layout = CommandTable::for_revision(revision)
        .layout(command)
        .expect("command in table");
    let mut frame = vec![0u8; layout.frame_len()];
    for (name, value) in values {
        if let Some(field) = layout.field(name) {
            field.write(&mut frame, *value);
        }
    }
    frame
}

/// Transport answering from a fixed set of raw values, optionally failing
/// its first requests
pub struct ScriptedTransport {
    revision: DeviceRevision,
    values: Vec<(&'static str, u16)>,
    failures: usize,
    truncate: Option<(Command, usize)>,
    connected: bool,
    requests: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub fn new(revision: DeviceRevision) -> Self {
        Self {
            revision,
            values: idle_values(),
            failures: 0,
            truncate: None,
            connected: false,
            requests: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail the first `n` requests with a timeout
    pub fn failing_first(mut self, n: usize) -> Self {
        self.failures = n;
        self
    }

    /// Cut the response to `command` down to `len` bytes
    pub fn truncating(mut self, command: Command, len: usize) -> Self {
        self.truncate = Some((command, len));
        self
    }

    pub fn with_value(mut self, name: &'static str, value: u16) -> Self {
        self.values.retain(|(field, _)| *field != name);
        self.values.push((name, value));
        self
    }

    /// Counter of requests issued so far
    pub fn requests(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.requests)
    }
}

impl Transport for ScriptedTransport {
    fn discover_and_bind(&mut self) -> Result<DeviceRevision, ProtocolError> {
        self.connected = true;
        Ok(self.revision)
    }

    fn send_command(&mut self, command: Command) -> Result<Vec<u8>, ProtocolError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.failures > 0 {
            self.failures -= 1;
            self.connected = false;
            return Err(ProtocolError::Timeout);
        }
        let mut frame = encode(self.revision, command, &self.values);
        if let Some((truncated, len)) = self.truncate {
            if truncated == command {
                frame.truncate(len);
            }
        }
        Ok(frame)
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Setup store kept in memory
#[derive(Default)]
pub struct MemoryStore {
    setup: Mutex<Option<Setup>>,
    writes: AtomicUsize,
    persist_delay: Option<Duration>,
}

impl MemoryStore {
    /// A store whose writes take `delay`, like a slow SD card
    pub fn slow(delay: Duration) -> Self {
        Self {
            persist_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl ConfigStore for MemoryStore {
    fn load(&self) -> Result<Setup, SetupError> {
        Ok(self.setup.lock().unwrap().clone().unwrap_or_default())
    }

    fn persist(&self, setup: &Setup) -> Result<(), SetupError> {
        if let Some(delay) = self.persist_delay {
            std::thread::sleep(delay);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        *self.setup.lock().unwrap() = Some(setup.clone());
        Ok(())
    }
}
