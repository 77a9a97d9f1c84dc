//! Device session management
//!
//! Owns the transport, polls the fixed command sequence of the bound
//! revision and tracks whether the device is reachable.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::{
    decode, Command, CommandTable, DecodeError, DeviceRevision, FieldSet, PollError, RawFrame,
    Transport,
};

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Device bound and answering
    Connected,
    /// No device, or the last request failed
    Disconnected,
}

/// Field sets produced by one poll cycle
#[derive(Debug, Clone)]
pub struct PolledFrames {
    revision: DeviceRevision,
    frames: BTreeMap<Command, FieldSet>,
    skipped: Vec<(Command, DecodeError)>,
}

impl PolledFrames {
    /// Revision the frames were decoded with
    pub fn revision(&self) -> DeviceRevision {
        self.revision
    }

    /// Field set for a command, if its frame decoded this cycle
    pub fn get(&self, command: Command) -> Option<&FieldSet> {
        self.frames.get(&command)
    }

    /// Raw value of a table field.
    ///
    /// `Ok(None)` when the revision does not carry the field or its frame
    /// was dropped this cycle. An error means the decoded set disagrees with
    /// the command table.
    pub fn field(&self, name: &str) -> Result<Option<u16>, DecodeError> {
        let Some(command) = CommandTable::for_revision(self.revision).locate(name) else {
            return Ok(None);
        };
        match self.frames.get(&command) {
            Some(set) => set.get(name).map(Some),
            None => Ok(None),
        }
    }

    /// Commands whose frames were rejected by the decoder this cycle
    pub fn skipped(&self) -> &[(Command, DecodeError)] {
        &self.skipped
    }

    /// Number of decoded frames
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether no frame decoded
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// A polling session over one transport
pub struct DeviceSession<T> {
    transport: T,
    state: SessionState,
    revision: Option<DeviceRevision>,
}

impl<T: Transport> DeviceSession<T> {
    /// Create a session; it starts disconnected and binds on the first reconnect
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            state: SessionState::Disconnected,
            revision: None,
        }
    }

    /// Current session state
    pub fn status(&self) -> SessionState {
        self.state
    }

    /// Revision bound by the last successful reconnect
    pub fn revision(&self) -> Option<DeviceRevision> {
        self.revision
    }

    /// Access the underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Discover the device again and re-bind its revision
    pub fn reconnect(&mut self) -> bool {
        match self.transport.discover_and_bind() {
            Ok(revision) => {
                if self.revision != Some(revision) {
                    info!(%revision, "device bound");
                }
                self.revision = Some(revision);
                self.state = SessionState::Connected;
                true
            }
            Err(e) => {
                debug!(error = %e, "reconnect failed");
                self.state = SessionState::Disconnected;
                false
            }
        }
    }

    /// Issue every command of the bound revision and decode the responses.
    ///
    /// A transport failure moves the session to `Disconnected` and further
    /// polls are refused until [`reconnect`](Self::reconnect) succeeds. A
    /// frame rejected by the decoder only drops that command for this cycle.
    pub fn poll(&mut self) -> Result<PolledFrames, PollError> {
        let revision = match (self.state, self.revision) {
            (SessionState::Connected, Some(revision)) => revision,
            _ => return Err(PollError::Disconnected),
        };

        if !self.transport.is_connected() {
            warn!("transport reports link down");
            self.state = SessionState::Disconnected;
            return Err(PollError::Disconnected);
        }

        let table = CommandTable::for_revision(revision);
        let mut frames = BTreeMap::new();
        let mut skipped = Vec::new();

        for command in table.commands() {
            let bytes = match self.transport.send_command(command) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(?command, error = %e, "request failed, marking session disconnected");
                    self.state = SessionState::Disconnected;
                    return Err(PollError::TransportDisconnected(e));
                }
            };

            match decode(revision, command, &RawFrame::new(command, bytes)) {
                Ok(fields) => {
                    frames.insert(command, fields);
                }
                Err(e) => {
                    warn!(?command, error = %e, "dropping frame for this cycle");
                    skipped.push((command, e));
                }
            }
        }

        Ok(PolledFrames {
            revision,
            frames,
            skipped,
        })
    }

    /// Reconnect if needed, then poll
    pub fn tick(&mut self) -> Result<PolledFrames, PollError> {
        if self.state == SessionState::Disconnected && !self.reconnect() {
            return Err(PollError::Disconnected);
        }
        self.poll()
    }
}
