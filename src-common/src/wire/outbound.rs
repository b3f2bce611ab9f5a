//! Messages sent by the console to the scanner.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::Settings;

/// A message to the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutboundMessage {
    /// Complete settings object; the device has no partial update
    Settings { settings: Settings },

    /// Discrete control command
    Command { command: DeviceCommand },
}

/// Commands the device understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceCommand {
    /// Suspend the scan loop
    Pause,
    /// Resume a paused scan loop
    Resume,
    /// Clear device-side accumulators
    Clear,
    /// Restore factory settings
    Reset,
    /// Re-initialize the radio; answered with `reinitStatus`
    Reinit,
}

impl DeviceCommand {
    pub const ALL: [DeviceCommand; 5] = [
        DeviceCommand::Pause,
        DeviceCommand::Resume,
        DeviceCommand::Clear,
        DeviceCommand::Reset,
        DeviceCommand::Reinit,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DeviceCommand::Pause => "pause",
            DeviceCommand::Resume => "resume",
            DeviceCommand::Clear => "clear",
            DeviceCommand::Reset => "reset",
            DeviceCommand::Reinit => "reinit",
        }
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DeviceCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceCommand::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown command '{}'", s))
    }
}
