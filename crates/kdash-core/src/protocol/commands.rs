//! Protocol commands
//!
//! Defines the request codes understood by the KPro firmware.

use serde::{Deserialize, Serialize};

/// Protocol commands for ECU communication
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Command {
    /// ECU identity: type, ignition table, serial and firmware (0x40)
    Identity,

    /// Engine data: rpm, speed, throttle, map, afr, cam, gear, status byte (0x60)
    Engine,

    /// Sensor data: coolant, intake air, battery (0x61)
    Sensors,

    /// KPro v4 auxiliary frame: analog inputs, mil, ethanol, fuel temp (0x65)
    Auxiliary,

    /// KPro v3 analog input frame (0xB0)
    AnalogInputs,
}

impl Command {
    /// Every command, in wire order
    pub const ALL: [Command; 5] = [
        Command::Identity,
        Command::Engine,
        Command::Sensors,
        Command::Auxiliary,
        Command::AnalogInputs,
    ];

    /// Get the request byte sent to the device
    pub fn code(&self) -> u8 {
        match self {
            Command::Identity => 0x40,
            Command::Engine => 0x60,
            Command::Sensors => 0x61,
            Command::Auxiliary => 0x65,
            Command::AnalogInputs => 0xB0,
        }
    }

    /// Look up a command from its request byte
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_bytes() {
        assert_eq!(Command::Identity.code(), 0x40);
        assert_eq!(Command::Engine.code(), 0x60);
        assert_eq!(Command::AnalogInputs.code(), 0xB0);
    }

    #[test]
    fn test_command_from_code() {
        for command in Command::ALL {
            assert_eq!(Command::from_code(command.code()), Some(command));
        }
        assert_eq!(Command::from_code(0x00), None);
    }
}
