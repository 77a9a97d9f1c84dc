//! # kdash Core Library
//!
//! Core functionality for the kdash dashboard backend.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - KPro command tables and frame decoding for every supported revision
//! - A device session that polls the ECU and survives disconnects
//! - Unit conversion with user-configurable analog formulas
//! - Odometer and driving style tracking
//! - Setup (configuration) validation and persistence
//! - The live telemetry loop and subscriber registry
//!
//! ## Supported devices
//!
//! - KPro v2 / v3 (FTDI based)
//! - KPro v4
//!
//! ## Example
//!
//! ```rust,ignore
//! use kdash_core::prelude::*;
//!
//! let store = FileConfigStore::new("setup.json");
//! let setup = store.load()?;
//! let session = DeviceSession::new(SerialTransport::default());
//! let shutdown = CancellationToken::new();
//! let handle = TelemetryLoop::new(session, store, setup, TelemetryConfig::default())?
//!     .spawn(shutdown.clone());
//! let (id, mut queue) = handle.hub().subscribe();
//! ```

pub mod convert;
pub mod demo;
pub mod odometer;
pub mod protocol;
pub mod setup;
pub mod style;
pub mod telemetry;
pub mod unit_conversion;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::convert::{Channel, UnitConverter};
    pub use crate::demo::DemoTransport;
    pub use crate::protocol::{
        decode, Command, CommandTable, DeviceRevision, DeviceSession, FieldSet, RawFrame,
        SerialTransport, SessionState, Transport,
    };
    pub use crate::setup::{ConfigStore, FileConfigStore, Setup};
    pub use crate::telemetry::{
        ClientMessage, ServerMessage, Snapshot, SubscriberId, SubscriberRegistry,
        TelemetryConfig, TelemetryHandle, TelemetryHub, TelemetryLoop,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
