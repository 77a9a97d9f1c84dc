//! KPro Protocol Communication
//!
//! Implements the KPro binary request/response protocol. Each request is a
//! single command byte; the device answers with a fixed-layout frame whose
//! field offsets depend on the hardware revision.

pub mod commands;
mod decoder;
mod error;
mod revision;
pub mod serial;
mod session;
pub mod table;
mod transport;

pub use commands::Command;
pub use decoder::{decode, FieldSet, RawFrame};
pub use error::{DecodeError, PollError, ProtocolError};
pub use revision::DeviceRevision;
pub use serial::{SerialConfig, SerialTransport};
pub use session::{DeviceSession, PolledFrames, SessionState};
pub use table::{CommandTable, FieldLayout};
pub use transport::Transport;

/// Default baud rate for the KPro FTDI bridge
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default timeout for responses in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 60;
