//! Boundary between the core components and whatever shows them.
//!
//! The console loop translates component events into calls on a
//! [`PresentationAdapter`]. Adapters only render; they never reach back into
//! the components.

mod terminal;

pub use terminal::TerminalPresenter;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rfscan_common::{Settings, SpectrumFrame, Statistics, StatusKind};
use serde::{Deserialize, Serialize};

use crate::connection::ConnectionState;
use crate::history::HistoryBuffer;
use crate::sonifier::{AudioSessionState, NoteEvent, SonifierParams};

/// Which plot the operator is looking at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum View {
    #[default]
    Spectrum,
    Waterfall,
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            View::Spectrum => "spectrum",
            View::Waterfall => "waterfall",
        })
    }
}

impl FromStr for View {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "spectrum" => Ok(View::Spectrum),
            "waterfall" => Ok(View::Waterfall),
            _ => Err(format!("unknown view '{}' (spectrum, waterfall)", s)),
        }
    }
}

/// An RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    fn lerp(self, other: Rgb, t: f32) -> Rgb {
        let mix = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * t).round() as u8;
        Rgb(mix(self.0, other.0), mix(self.1, other.1), mix(self.2, other.2))
    }
}

/// Waterfall color scale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Colorscale {
    #[default]
    Viridis,
    Jet,
    Hot,
    Greys,
    YlGnBu,
    Earth,
}

impl Colorscale {
    pub const ALL: [Colorscale; 6] = [
        Colorscale::Viridis,
        Colorscale::Jet,
        Colorscale::Hot,
        Colorscale::Greys,
        Colorscale::YlGnBu,
        Colorscale::Earth,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Colorscale::Viridis => "Viridis",
            Colorscale::Jet => "Jet",
            Colorscale::Hot => "Hot",
            Colorscale::Greys => "Greys",
            Colorscale::YlGnBu => "YlGnBu",
            Colorscale::Earth => "Earth",
        }
    }

    fn stops(&self) -> &'static [(f32, Rgb)] {
        match self {
            Colorscale::Viridis => &[
                (0.0, Rgb(68, 1, 84)),
                (0.25, Rgb(59, 82, 139)),
                (0.5, Rgb(33, 145, 140)),
                (0.75, Rgb(94, 201, 98)),
                (1.0, Rgb(253, 231, 37)),
            ],
            Colorscale::Jet => &[
                (0.0, Rgb(0, 0, 131)),
                (0.125, Rgb(0, 60, 170)),
                (0.375, Rgb(5, 255, 255)),
                (0.625, Rgb(255, 255, 0)),
                (0.875, Rgb(250, 0, 0)),
                (1.0, Rgb(128, 0, 0)),
            ],
            Colorscale::Hot => &[
                (0.0, Rgb(0, 0, 0)),
                (0.3, Rgb(230, 0, 0)),
                (0.6, Rgb(255, 210, 0)),
                (1.0, Rgb(255, 255, 255)),
            ],
            Colorscale::Greys => &[(0.0, Rgb(0, 0, 0)), (1.0, Rgb(255, 255, 255))],
            Colorscale::YlGnBu => &[
                (0.0, Rgb(8, 29, 88)),
                (0.25, Rgb(34, 94, 168)),
                (0.5, Rgb(65, 182, 196)),
                (0.75, Rgb(199, 233, 180)),
                (1.0, Rgb(255, 255, 217)),
            ],
            Colorscale::Earth => &[
                (0.0, Rgb(0, 0, 130)),
                (0.1, Rgb(0, 180, 180)),
                (0.2, Rgb(40, 210, 40)),
                (0.4, Rgb(230, 230, 50)),
                (0.6, Rgb(120, 70, 20)),
                (1.0, Rgb(255, 255, 255)),
            ],
        }
    }

    /// Color for a value normalized to 0..=1 (clamped).
    pub fn color(&self, t: f32) -> Rgb {
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        let stops = self.stops();
        for pair in stops.windows(2) {
            let ((t0, c0), (t1, c1)) = (pair[0], pair[1]);
            if t <= t1 {
                return c0.lerp(c1, (t - t0) / (t1 - t0));
            }
        }
        stops[stops.len() - 1].1
    }
}

impl fmt::Display for Colorscale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Colorscale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Colorscale::ALL
            .into_iter()
            .find(|scale| scale.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let names: Vec<&str> = Colorscale::ALL.iter().map(|c| c.name()).collect();
                format!("unknown colorscale '{}' ({})", s, names.join(", "))
            })
    }
}

/// Scan indicator shown next to the plot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    Active,
    Paused,
    Failed,
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScanStatus::Active => "Active",
            ScanStatus::Paused => "Paused",
            ScanStatus::Failed => "Failed",
        })
    }
}

/// Snapshot printed for the `status` command.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub endpoint: String,
    pub connection: ConnectionState,
    pub retry_count: u32,
    pub stalled: bool,
    pub scan: ScanStatus,
    pub audio: AudioSessionState,
    pub sonifier: SonifierParams,
    pub settings: Settings,
    pub history_filled: usize,
    pub history_capacity: usize,
    pub statistics: Option<Statistics>,
    pub view: View,
    pub colorscale: Colorscale,
}

/// Receives everything the operator should see.
pub trait PresentationAdapter {
    fn on_connection_state_changed(&mut self, state: ConnectionState, retry_delay: Option<Duration>);

    /// Show the blocking "no data" indicator.
    fn on_watchdog_expired(&mut self);

    fn on_frame_rendered(&mut self, frame: &SpectrumFrame);

    fn on_statistics_updated(&mut self, statistics: &Statistics);

    /// Operational status from the device, shown as a toast.
    fn on_operational_status(&mut self, message: &str, kind: StatusKind);

    /// Dismiss the "no data" indicator.
    fn on_watchdog_cleared(&mut self) {}

    fn on_history_updated(&mut self, _history: &HistoryBuffer) {}

    fn on_settings_updated(&mut self, _settings: &Settings) {}

    fn on_scan_status(&mut self, _status: ScanStatus) {}

    fn on_audio_state_changed(&mut self, _state: AudioSessionState) {}

    fn on_notes_played(&mut self, _notes: &[NoteEvent]) {}

    fn on_view_changed(&mut self, _view: View, _colorscale: Colorscale) {}

    fn on_status_report(&mut self, _report: &StatusReport) {}

    /// Free text for the operator (help, rejected input).
    fn on_message(&mut self, _text: &str) {}
}
