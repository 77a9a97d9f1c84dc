//! Live telemetry
//!
//! Turns polled frames into converted snapshots and distributes them to
//! connected clients, alongside the setup request/response protocol.

mod messages;
mod registry;
mod service;
mod snapshot;

pub use messages::{ActionMessage, ClientMessage, ServerMessage};
pub use registry::{BroadcastReport, Outbound, Subscriber, SubscriberId, SubscriberRegistry};
pub use service::{
    ControlRequest, Controller, OdometerReading, Publisher, TelemetryConfig, TelemetryHandle,
    TelemetryHub, TelemetryLoop, TelemetryParts,
};
pub use snapshot::{assemble, ChannelValue, Snapshot};
