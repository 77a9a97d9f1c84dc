//! Wire messages exchanged with dashboard clients

use serde::{Deserialize, Serialize};

use super::Snapshot;
use crate::setup::Setup;

/// Requests sent by a client
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Ask for the current setup
    Setup,
    /// Validate and apply a new setup
    Save {
        /// The proposed setup document
        data: serde_json::Value,
    },
    /// Restore the default setup
    Reset,
}

/// Actions pushed to every client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ActionMessage {
    /// Reload the setup and redraw
    Refresh,
    /// Show a message to the user
    Alert {
        /// Text, prefixed with SUCCESS: or ERROR:
        message: String,
    },
}

/// Messages sent by the server
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ServerMessage {
    /// One telemetry snapshot
    Data {
        /// Channel values
        data: Snapshot,
    },
    /// Reply to a setup request
    Setup {
        /// The current setup
        setup: Setup,
    },
    /// Refresh or alert
    Action(ActionMessage),
}

impl ServerMessage {
    /// `{"action":"refresh"}`
    pub fn refresh() -> Self {
        ServerMessage::Action(ActionMessage::Refresh)
    }

    /// Success alert
    pub fn success(message: &str) -> Self {
        ServerMessage::Action(ActionMessage::Alert {
            message: format!("SUCCESS: {message}"),
        })
    }

    /// Error alert
    pub fn error(reason: impl std::fmt::Display) -> Self {
        ServerMessage::Action(ActionMessage::Alert {
            message: format!("ERROR: {reason}"),
        })
    }
}
