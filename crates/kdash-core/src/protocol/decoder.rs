//! Frame decoding
//!
//! Pure extraction of raw field values from response frames. Nothing here
//! scales, converts or interprets a value.

use std::collections::BTreeMap;

use super::{Command, CommandTable, DecodeError, DeviceRevision};

/// A response frame, tagged with the command that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    command: Command,
    bytes: Vec<u8>,
}

impl RawFrame {
    /// Wrap the bytes returned for `command`
    pub fn new(command: Command, bytes: Vec<u8>) -> Self {
        Self { command, bytes }
    }

    /// Command that produced this frame
    pub fn command(&self) -> Command {
        self.command
    }

    /// Raw bytes
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Frame length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the frame is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Raw field values extracted from one frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSet {
    values: BTreeMap<&'static str, u16>,
}

impl FieldSet {
    /// Raw value of a field
    pub fn get(&self, name: &str) -> Result<u16, DecodeError> {
        self.values
            .get(name)
            .copied()
            .ok_or_else(|| DecodeError::UnknownField(name.to_string()))
    }

    /// Whether the field was decoded
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Iterate over all fields in name order
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, u16)> + '_ {
        self.values.iter().map(|(name, value)| (*name, *value))
    }

    /// Number of decoded fields
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no fields were decoded
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Decode a response frame for `command` using the table of `revision`.
///
/// Fails with [`DecodeError::FrameTooShort`] when the frame does not reach
/// the highest offset any field of the command needs. Fields that alias the
/// same byte all receive the same raw value.
pub fn decode(
    revision: DeviceRevision,
    command: Command,
    frame: &RawFrame,
) -> Result<FieldSet, DecodeError> {
    if frame.command() != command {
        return Err(DecodeError::CommandMismatch {
            expected: command,
            actual: frame.command(),
        });
    }

    let layout = CommandTable::for_revision(revision)
        .layout(command)
        .ok_or(DecodeError::UnknownCommand { revision, command })?;

    let bytes = frame.bytes();
    if bytes.len() < layout.frame_len() {
        return Err(DecodeError::FrameTooShort {
            command,
            needed: layout.frame_len(),
            actual: bytes.len(),
        });
    }

    let mut values = BTreeMap::new();
    for (name, field) in layout.fields() {
        let value = field.read(bytes).ok_or(DecodeError::FrameTooShort {
            command,
            needed: field.max_offset() + 1,
            actual: bytes.len(),
        })?;
        values.insert(*name, value);
    }

    Ok(FieldSet { values })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::table::fields;

    fn engine_frame(len: usize) -> RawFrame {
        RawFrame::new(Command::Engine, vec![0; len])
    }

    #[test]
    fn test_short_frame_rejected() {
        let err = decode(DeviceRevision::Kpro4, Command::Engine, &engine_frame(10)).unwrap_err();
        assert_eq!(
            err,
            DecodeError::FrameTooShort {
                command: Command::Engine,
                needed: 36,
                actual: 10
            }
        );
    }

    #[test]
    fn test_unknown_command_for_revision() {
        let frame = RawFrame::new(Command::AnalogInputs, vec![0; 32]);
        let err = decode(DeviceRevision::Kpro2, Command::AnalogInputs, &frame).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownCommand { .. }));
    }

    #[test]
    fn test_command_mismatch() {
        let err = decode(DeviceRevision::Kpro4, Command::Sensors, &engine_frame(64)).unwrap_err();
        assert!(matches!(err, DecodeError::CommandMismatch { .. }));
    }

    #[test]
    fn test_aliased_status_byte() {
        let mut bytes = vec![0u8; 38];
        bytes[33] = 0b1010_0101;
        let frame = RawFrame::new(Command::Engine, bytes);
        let set = decode(DeviceRevision::Kpro3, Command::Engine, &frame).unwrap();
        for flag in fields::STATUS_FLAGS {
            assert_eq!(set.get(flag).unwrap(), 0b1010_0101);
        }
    }

    #[test]
    fn test_longer_frame_accepted() {
        let set = decode(DeviceRevision::Kpro4, Command::Engine, &engine_frame(64)).unwrap();
        assert_eq!(set.get(fields::RPM).unwrap(), 0);
        assert!(matches!(set.get("nope"), Err(DecodeError::UnknownField(_))));
    }
}
