//! Serial port handling
//!
//! Provides serial port discovery and the [`SerialTransport`] used to talk
//! to KPro devices through their USB serial bridge.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::io::{Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{
    Command, CommandTable, DeviceRevision, ProtocolError, Transport, DEFAULT_BAUD_RATE,
    DEFAULT_TIMEOUT_MS,
};

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl PortInfo {
    /// Revision family advertised by the port's USB ids. KPro v2 and v3
    /// share ids and are reported as v2 until probed.
    pub fn revision_family(&self) -> Option<DeviceRevision> {
        let ids = (self.vid?, self.pid?);
        if ids == DeviceRevision::Kpro4.usb_ids() {
            Some(DeviceRevision::Kpro4)
        } else if ids == DeviceRevision::Kpro2.usb_ids() {
            Some(DeviceRevision::Kpro2)
        } else {
            None
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, product) = match info.port_type {
            SerialPortType::UsbPort(usb_info) => {
                (Some(usb_info.vid), Some(usb_info.pid), usb_info.product)
            }
            _ => (None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            product,
        }
    }
}

/// Sort key so that ttyACM* ports come first, then ttyUSB*, then the rest,
/// numeric suffixes ordered numerically.
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// List all available serial ports, with /dev fallbacks and deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let p = PortInfo::from(info);
        map.entry(p.name.clone()).or_insert(p);
    }

    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone()).or_insert_with(|| PortInfo {
                        name: full,
                        vid: None,
                        pid: None,
                        product: None,
                    });
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// Open a serial port with the given read timeout
pub fn open_port(
    name: &str,
    baud_rate: u32,
    timeout: Duration,
) -> Result<Box<dyn SerialPort>, ProtocolError> {
    serialport::new(name, baud_rate)
        .timeout(timeout)
        .open()
        .map_err(|e| ProtocolError::SerialError(e.to_string()))
}

/// Configure a serial port for KPro communication (8N1, no flow control)
pub fn configure_port(port: &mut dyn SerialPort) -> Result<(), ProtocolError> {
    port.set_data_bits(serialport::DataBits::Eight)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_parity(serialport::Parity::None)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_stop_bits(serialport::StopBits::One)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_flow_control(serialport::FlowControl::None)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;

    if let Err(e) = port.write_data_terminal_ready(true) {
        debug!(error = %e, "failed to set DTR high (continuing)");
    }

    Ok(())
}

/// Clear the serial port buffers
pub fn clear_buffers(port: &mut dyn SerialPort) -> Result<(), ProtocolError> {
    port.clear(serialport::ClearBuffer::All)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))
}

/// Serial link configuration
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Force a specific port instead of scanning by USB id
    pub port_name: Option<String>,
    /// Baud rate
    pub baud_rate: u32,
    /// Per-request response timeout
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: None,
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

/// Transport over the KPro USB serial bridge
pub struct SerialTransport {
    config: SerialConfig,
    port: Option<Box<dyn SerialPort>>,
    revision: Option<DeviceRevision>,
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new(SerialConfig::default())
    }
}

impl SerialTransport {
    /// Create an unbound transport
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            port: None,
            revision: None,
        }
    }

    fn candidate(&self) -> Option<(String, DeviceRevision)> {
        let ports = list_ports();
        match &self.config.port_name {
            Some(name) => ports
                .into_iter()
                .find(|p| &p.name == name)
                .map(|p| {
                    let family = p.revision_family().unwrap_or(DeviceRevision::Kpro4);
                    (p.name, family)
                }),
            None => ports
                .into_iter()
                .find_map(|p| p.revision_family().map(|family| (p.name, family))),
        }
    }

    fn exchange(
        port: &mut dyn SerialPort,
        command: Command,
        expected: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, ProtocolError> {
        port.write_all(&[command.code()])?;

        let deadline = Instant::now() + timeout;
        let mut buf = vec![0u8; expected];
        let mut filled = 0;
        while filled < expected && Instant::now() < deadline {
            match port.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(e) => return Err(ProtocolError::IoError(e)),
            }
        }

        if filled == 0 {
            return Err(ProtocolError::Timeout);
        }
        // Partial frames are returned as-is; the decoder rejects them.
        buf.truncate(filled);
        Ok(buf)
    }

    /// Distinguish v2 from v3 by asking for the v3-only analog frame
    fn probe_kpro23(port: &mut dyn SerialPort, timeout: Duration) -> DeviceRevision {
        let expected = CommandTable::for_revision(DeviceRevision::Kpro3)
            .frame_len(Command::AnalogInputs)
            .unwrap_or(0);
        match Self::exchange(port, Command::AnalogInputs, expected, timeout) {
            Ok(bytes) if bytes.len() >= expected => DeviceRevision::Kpro3,
            _ => DeviceRevision::Kpro2,
        }
    }
}

impl Transport for SerialTransport {
    fn discover_and_bind(&mut self) -> Result<DeviceRevision, ProtocolError> {
        self.port = None;
        self.revision = None;

        let (name, family) = self.candidate().ok_or(ProtocolError::DeviceNotFound)?;
        let mut port = open_port(&name, self.config.baud_rate, self.config.timeout)?;
        configure_port(port.as_mut())?;
        clear_buffers(port.as_mut())?;

        let revision = match family {
            DeviceRevision::Kpro4 => DeviceRevision::Kpro4,
            _ => Self::probe_kpro23(port.as_mut(), self.config.timeout),
        };

        info!(port = %name, %revision, "opened KPro serial port");
        self.port = Some(port);
        self.revision = Some(revision);
        Ok(revision)
    }

    fn send_command(&mut self, command: Command) -> Result<Vec<u8>, ProtocolError> {
        let revision = self.revision.ok_or(ProtocolError::NotConnected)?;
        let expected = CommandTable::for_revision(revision)
            .frame_len(command)
            .ok_or(ProtocolError::NotConnected)?;
        let port = self.port.as_mut().ok_or(ProtocolError::NotConnected)?;

        match Self::exchange(port.as_mut(), command, expected, self.config.timeout) {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                warn!(?command, error = %e, "serial exchange failed, closing port");
                self.port = None;
                Err(e)
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }
}
