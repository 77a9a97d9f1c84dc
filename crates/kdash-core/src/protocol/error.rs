//! Protocol errors

use thiserror::Error;

use super::{Command, DeviceRevision};

/// Errors that can occur while talking to the device
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Serial port error: {0}")]
    SerialError(String),

    #[error("Connection timeout")]
    Timeout,

    #[error("Not connected to ECU")]
    NotConnected,

    #[error("No supported device found")]
    DeviceNotFound,

    #[error("Transport disconnected: {0}")]
    Disconnected(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors raised while extracting fields from a response frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Frame too short for {command:?}: need {needed} bytes, got {actual}")]
    FrameTooShort {
        command: Command,
        needed: usize,
        actual: usize,
    },

    #[error("Command {command:?} is not part of the {revision} table")]
    UnknownCommand {
        revision: DeviceRevision,
        command: Command,
    },

    #[error("Frame was produced by {actual:?}, expected {expected:?}")]
    CommandMismatch { expected: Command, actual: Command },

    #[error("Field '{0}' is not present in the decoded frame")]
    UnknownField(String),
}

/// Failures of a single poll cycle. All of them are recoverable.
#[derive(Error, Debug)]
pub enum PollError {
    #[error("Transport disconnected: {0}")]
    TransportDisconnected(#[source] ProtocolError),

    #[error("Reconnect failed: {0}")]
    ReconnectFailed(#[source] ProtocolError),

    #[error("Session is disconnected")]
    Disconnected,

    #[error("Previous poll still in progress")]
    Busy,

    #[error("Poll timed out")]
    Timeout,

    #[error("Poll worker failed: {0}")]
    Worker(String),
}
