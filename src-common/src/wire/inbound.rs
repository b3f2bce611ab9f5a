//! Messages pushed by the scanner to the console.

use serde::{Deserialize, Serialize};

use crate::types::{Settings, SpectrumFrame, Statistics};

/// A message from the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InboundMessage {
    /// New spectrum sweep
    Spectrum {
        data: SpectrumFrame,
        /// Device-side summary of the sweep
        #[serde(default, skip_serializing_if = "Option::is_none")]
        statistics: Option<Statistics>,
    },

    /// Full snapshot of the device's configuration
    Settings { settings: Settings },

    /// Outcome of a `reinit` command, passed through verbatim
    ReinitStatus { status: String },
}

impl InboundMessage {
    /// Short name for logging.
    pub fn kind_name(&self) -> &'static str {
        match self {
            InboundMessage::Spectrum { .. } => "spectrum",
            InboundMessage::Settings { .. } => "settings",
            InboundMessage::ReinitStatus { .. } => "reinitStatus",
        }
    }
}
