//! Command tables
//!
//! One read-only [`CommandTable`] per [`DeviceRevision`], mapping every
//! command to the byte layout of its response frame. Tables are built once
//! on first use and shared for the life of the process.

use std::sync::OnceLock;

use super::{Command, DeviceRevision};

/// Field names shared by the tables, the decoder and the telemetry loop
pub mod fields {
    /// ECU type byte
    pub const ECU_TYPE: &str = "ecu_type";
    /// Ignition table byte
    pub const IGNITION: &str = "ign";
    /// Device serial number
    pub const SERIAL: &str = "serial";
    /// Firmware major version
    pub const FIRMWARE_MAJOR: &str = "firmware_major";
    /// Firmware minor version
    pub const FIRMWARE_MINOR: &str = "firmware_minor";

    /// Engine speed, quarter rpm
    pub const RPM: &str = "rpm";
    /// Vehicle speed, km/h
    pub const VSS: &str = "vss";
    /// Throttle position counts
    pub const TPS: &str = "tps";
    /// Manifold absolute pressure, kPa
    pub const MAP: &str = "map";
    /// Wideband O2 counts
    pub const AFR: &str = "afr";
    /// VTC cam angle counts
    pub const CAM: &str = "cam";
    /// Selected gear
    pub const GEAR: &str = "gear";
    /// Malfunction indicator
    pub const MIL: &str = "mil";

    /// Electric power steering
    pub const EPS: &str = "eps";
    /// Service check signal
    pub const SCS: &str = "scs";
    /// Reverse lock
    pub const RVSLCK: &str = "rvslck";
    /// Brake switch
    pub const BKSW: &str = "bksw";
    /// A/C switch
    pub const ACSW: &str = "acsw";
    /// A/C clutch
    pub const ACCL: &str = "accl";
    /// Fuel relay
    pub const FLR: &str = "flr";
    /// Radiator fan control
    pub const FANC: &str = "fanc";

    /// Engine coolant temperature counts
    pub const ECT: &str = "ect";
    /// Intake air temperature counts
    pub const IAT: &str = "iat";
    /// Battery voltage, tenths of a volt
    pub const BAT: &str = "bat";

    /// Ethanol content, percent
    pub const ETH: &str = "eth";
    /// Fuel temperature, celsius
    pub const FLT: &str = "flt";

    /// Generic analog inputs, ADC counts
    pub const ANALOG: [&str; 8] = ["an0", "an1", "an2", "an3", "an4", "an5", "an6", "an7"];

    /// Flags sharing a single status byte
    pub const STATUS_FLAGS: [&str; 8] = [EPS, SCS, RVSLCK, BKSW, ACSW, ACCL, FLR, FANC];

    /// Fields every revision must carry
    pub const REQUIRED: [&str; 16] = [
        ECU_TYPE,
        IGNITION,
        SERIAL,
        FIRMWARE_MAJOR,
        FIRMWARE_MINOR,
        RPM,
        VSS,
        TPS,
        MAP,
        AFR,
        CAM,
        GEAR,
        MIL,
        ECT,
        IAT,
        BAT,
    ];
}

/// How a field is laid out inside a response frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldLayout {
    /// A single unsigned byte
    Byte(usize),
    /// A 16-bit value split across two bytes. The offsets are explicit so
    /// the byte order lives in the table rather than at call sites.
    Word {
        /// Offset of the most significant byte
        high: usize,
        /// Offset of the least significant byte
        low: usize,
    },
}

impl FieldLayout {
    /// Highest byte offset touched by this field
    pub fn max_offset(&self) -> usize {
        match *self {
            FieldLayout::Byte(offset) => offset,
            FieldLayout::Word { high, low } => high.max(low),
        }
    }

    /// Read the raw value, or `None` if the frame does not cover the field
    pub fn read(&self, frame: &[u8]) -> Option<u16> {
        match *self {
            FieldLayout::Byte(offset) => frame.get(offset).map(|b| *b as u16),
            FieldLayout::Word { high, low } => {
                let hi = *frame.get(high)?;
                let lo = *frame.get(low)?;
                Some(u16::from_be_bytes([hi, lo]))
            }
        }
    }

    /// Write a raw value into a frame buffer. Out-of-range offsets are ignored.
    pub fn write(&self, frame: &mut [u8], value: u16) {
        match *self {
            FieldLayout::Byte(offset) => {
                if let Some(slot) = frame.get_mut(offset) {
                    *slot = value as u8;
                }
            }
            FieldLayout::Word { high, low } => {
                let [hi, lo] = value.to_be_bytes();
                if let Some(slot) = frame.get_mut(high) {
                    *slot = hi;
                }
                if let Some(slot) = frame.get_mut(low) {
                    *slot = lo;
                }
            }
        }
    }
}

/// Field layout of one command's response frame
#[derive(Debug, Clone)]
pub struct CommandLayout {
    command: Command,
    fields: Vec<(&'static str, FieldLayout)>,
    frame_len: usize,
}

impl CommandLayout {
    fn new(command: Command, fields: Vec<(&'static str, FieldLayout)>) -> Self {
        let frame_len = fields
            .iter()
            .map(|(_, layout)| layout.max_offset() + 1)
            .max()
            .unwrap_or(0);
        Self {
            command,
            fields,
            frame_len,
        }
    }

    /// The command this layout belongs to
    pub fn command(&self) -> Command {
        self.command
    }

    /// Minimum frame length covering every field
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Field names and layouts, in table order
    pub fn fields(&self) -> &[(&'static str, FieldLayout)] {
        &self.fields
    }

    /// Layout of a single field
    pub fn field(&self, name: &str) -> Option<FieldLayout> {
        self.fields
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, layout)| *layout)
    }
}

/// Read-only command table for one revision
#[derive(Debug)]
pub struct CommandTable {
    revision: DeviceRevision,
    commands: Vec<CommandLayout>,
}

impl CommandTable {
    /// Get the shared table for a revision
    pub fn for_revision(revision: DeviceRevision) -> &'static CommandTable {
        static KPRO2: OnceLock<CommandTable> = OnceLock::new();
        static KPRO3: OnceLock<CommandTable> = OnceLock::new();
        static KPRO4: OnceLock<CommandTable> = OnceLock::new();

        match revision {
            DeviceRevision::Kpro2 => KPRO2.get_or_init(|| Self::build(revision)),
            DeviceRevision::Kpro3 => KPRO3.get_or_init(|| Self::build(revision)),
            DeviceRevision::Kpro4 => KPRO4.get_or_init(|| Self::build(revision)),
        }
    }

    fn build(revision: DeviceRevision) -> Self {
        let commands = match revision {
            DeviceRevision::Kpro2 => kpro23_base(),
            DeviceRevision::Kpro3 => {
                let mut commands = kpro23_base();
                commands.push(CommandLayout::new(
                    Command::AnalogInputs,
                    analog_words(4),
                ));
                commands
            }
            DeviceRevision::Kpro4 => kpro4(),
        };
        Self { revision, commands }
    }

    /// Revision this table describes
    pub fn revision(&self) -> DeviceRevision {
        self.revision
    }

    /// Commands in the order they are polled
    pub fn commands(&self) -> impl Iterator<Item = Command> + '_ {
        self.commands.iter().map(|layout| layout.command)
    }

    /// Layout of one command's frame
    pub fn layout(&self, command: Command) -> Option<&CommandLayout> {
        self.commands.iter().find(|layout| layout.command == command)
    }

    /// Layout of a field within a command's frame
    pub fn offset(&self, command: Command, field: &str) -> Option<FieldLayout> {
        self.layout(command)?.field(field)
    }

    /// Minimum frame length expected for a command
    pub fn frame_len(&self, command: Command) -> Option<usize> {
        self.layout(command).map(CommandLayout::frame_len)
    }

    /// Find which command's frame carries a field
    pub fn locate(&self, field: &str) -> Option<Command> {
        self.commands
            .iter()
            .find(|layout| layout.field(field).is_some())
            .map(|layout| layout.command)
    }
}

fn flags_at(offset: usize) -> impl Iterator<Item = (&'static str, FieldLayout)> {
    fields::STATUS_FLAGS
        .into_iter()
        .map(move |name| (name, FieldLayout::Byte(offset)))
}

/// Eight analog words, high byte after low byte, starting at `first_low`
fn analog_words(first_low: usize) -> Vec<(&'static str, FieldLayout)> {
    fields::ANALOG
        .into_iter()
        .enumerate()
        .map(|(n, name)| {
            let low = first_low + 2 * n;
            (name, FieldLayout::Word { high: low + 1, low })
        })
        .collect()
}

fn kpro23_base() -> Vec<CommandLayout> {
    use fields::*;
    use FieldLayout::{Byte, Word};

    let identity = vec![
        (ECU_TYPE, Byte(12)),
        (IGNITION, Byte(17)),
        (SERIAL, Word { high: 7, low: 6 }),
        (FIRMWARE_MAJOR, Byte(8)),
        (FIRMWARE_MINOR, Byte(9)),
    ];

    let mut engine = vec![
        (RPM, Word { high: 5, low: 4 }),
        (VSS, Byte(6)),
        (TPS, Byte(7)),
        (MAP, Byte(8)),
        (CAM, Byte(10)),
        (AFR, Word { high: 19, low: 18 }),
        (GEAR, Byte(37)),
        (MIL, Byte(34)),
    ];
    engine.extend(flags_at(33));

    let sensors = vec![(ECT, Byte(4)), (IAT, Byte(5)), (BAT, Byte(6))];

    vec![
        CommandLayout::new(Command::Identity, identity),
        CommandLayout::new(Command::Engine, engine),
        CommandLayout::new(Command::Sensors, sensors),
    ]
}

fn kpro4() -> Vec<CommandLayout> {
    use fields::*;
    use FieldLayout::{Byte, Word};

    let identity = vec![
        (ECU_TYPE, Byte(10)),
        (IGNITION, Byte(15)),
        (SERIAL, Word { high: 5, low: 4 }),
        (FIRMWARE_MAJOR, Byte(6)),
        (FIRMWARE_MINOR, Byte(7)),
    ];

    let mut engine = vec![
        (RPM, Word { high: 3, low: 2 }),
        (VSS, Byte(4)),
        (TPS, Byte(5)),
        (MAP, Byte(6)),
        (CAM, Byte(8)),
        (AFR, Word { high: 17, low: 16 }),
        (GEAR, Byte(35)),
    ];
    engine.extend(flags_at(31));

    let sensors = vec![(ECT, Byte(2)), (IAT, Byte(3)), (BAT, Byte(4))];

    let mut auxiliary = analog_words(66);
    auxiliary.extend([(MIL, Byte(30)), (ETH, Byte(98)), (FLT, Byte(99))]);

    vec![
        CommandLayout::new(Command::Identity, identity),
        CommandLayout::new(Command::Engine, engine),
        CommandLayout::new(Command::Sensors, sensors),
        CommandLayout::new(Command::Auxiliary, auxiliary),
    ]
}
