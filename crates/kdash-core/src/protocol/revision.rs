//! Hardware revisions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// FTDI vendor id used by KPro v2 and v3
pub const KPRO23_VENDOR_ID: u16 = 0x0403;
/// Product id used by KPro v2 and v3
pub const KPRO23_PRODUCT_ID: u16 = 0xF5F8;
/// Vendor id used by KPro v4
pub const KPRO4_VENDOR_ID: u16 = 0x1C40;
/// Product id used by KPro v4
pub const KPRO4_PRODUCT_ID: u16 = 0x0434;

/// The closed set of supported hardware revisions.
///
/// A revision selects the command table used to decode frames. It is bound
/// when a session connects and only changes through a reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceRevision {
    /// KPro v2: no analog input frame
    Kpro2,
    /// KPro v3: analog inputs in a dedicated 0xB0 frame
    Kpro3,
    /// KPro v4
    Kpro4,
}

impl DeviceRevision {
    /// All revisions
    pub const ALL: [DeviceRevision; 3] = [
        DeviceRevision::Kpro2,
        DeviceRevision::Kpro3,
        DeviceRevision::Kpro4,
    ];

    /// USB (vendor, product) ids advertised by this revision
    pub fn usb_ids(&self) -> (u16, u16) {
        match self {
            DeviceRevision::Kpro2 | DeviceRevision::Kpro3 => (KPRO23_VENDOR_ID, KPRO23_PRODUCT_ID),
            DeviceRevision::Kpro4 => (KPRO4_VENDOR_ID, KPRO4_PRODUCT_ID),
        }
    }

    /// Short identifier used in snapshots and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceRevision::Kpro2 => "kpro2",
            DeviceRevision::Kpro3 => "kpro3",
            DeviceRevision::Kpro4 => "kpro4",
        }
    }
}

impl fmt::Display for DeviceRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceRevision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|revision| revision.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown revision '{s}' (expected kpro2, kpro3 or kpro4)"))
    }
}
