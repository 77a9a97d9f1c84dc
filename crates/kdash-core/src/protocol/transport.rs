//! Device transport abstraction

use super::{Command, DeviceRevision, ProtocolError};

/// Byte-level link to a KPro device.
///
/// Implementations must bound every call with a timeout; the session calls
/// them from a blocking worker and never retries inside a single poll.
pub trait Transport: Send {
    /// Find a supported device, open it and report its revision
    fn discover_and_bind(&mut self) -> Result<DeviceRevision, ProtocolError>;

    /// Send a single command and return the response bytes
    fn send_command(&mut self, command: Command) -> Result<Vec<u8>, ProtocolError>;

    /// Whether the link is currently open
    fn is_connected(&self) -> bool;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn discover_and_bind(&mut self) -> Result<DeviceRevision, ProtocolError> {
        (**self).discover_and_bind()
    }

    fn send_command(&mut self, command: Command) -> Result<Vec<u8>, ProtocolError> {
        (**self).send_command(command)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}
