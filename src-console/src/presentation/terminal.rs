//! Line-oriented terminal presenter.

use std::io::{self, Write};
use std::time::Duration;

use colored::Colorize;
use rfscan_common::{SettingKey, Settings, SpectrumFrame, Statistics, StatusKind};
use tracing::debug;

use super::{Colorscale, PresentationAdapter, ScanStatus, StatusReport, View};
use crate::connection::ConnectionState;
use crate::history::HistoryBuffer;
use crate::sonifier::{AudioSessionState, NoteEvent};

const SPARK: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Writes timestamped, colored status lines and, when plotting is on, one
/// text row per frame in the selected view.
pub struct TerminalPresenter<W: Write> {
    out: W,
    plot: bool,
    view: View,
    colorscale: Colorscale,
    scan: Option<ScanStatus>,
    statistics: Option<Statistics>,
}

impl TerminalPresenter<io::Stdout> {
    pub fn stdout(plot: bool, colorscale: Colorscale) -> Self {
        Self::new(io::stdout(), plot, colorscale)
    }
}

impl<W: Write> TerminalPresenter<W> {
    pub fn new(out: W, plot: bool, colorscale: Colorscale) -> Self {
        Self {
            out,
            plot,
            view: View::default(),
            colorscale,
            scan: None,
            statistics: None,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, text: impl std::fmt::Display) {
        let stamp = chrono::Local::now().format("%H:%M:%S");
        if let Err(e) = writeln!(self.out, "{} {}", stamp.to_string().dimmed(), text) {
            debug!("[Presenter] Write failed: {}", e);
        }
    }

    fn raw(&mut self, text: impl std::fmt::Display) {
        if let Err(e) = writeln!(self.out, "{}", text) {
            debug!("[Presenter] Write failed: {}", e);
        }
    }

    fn spectrum_row(frame: &SpectrumFrame) -> String {
        let max = frame.counts().iter().copied().max().unwrap_or(0).max(1);
        frame
            .counts()
            .iter()
            .map(|value| {
                let level = (*value as usize * (SPARK.len() - 1)) / max as usize;
                SPARK[level]
            })
            .collect()
    }

    fn waterfall_row(&self, frame: &SpectrumFrame) -> String {
        let max = frame.counts().iter().copied().max().unwrap_or(0).max(1) as f32;
        frame
            .counts()
            .iter()
            .map(|value| {
                let color = self.colorscale.color(*value as f32 / max);
                "█".truecolor(color.0, color.1, color.2).to_string()
            })
            .collect()
    }

    fn settings_summary(settings: &Settings) -> String {
        SettingKey::ALL
            .iter()
            .map(|key| format!("{}={}", key, settings.display_value(*key)))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl<W: Write> PresentationAdapter for TerminalPresenter<W> {
    fn on_connection_state_changed(&mut self, state: ConnectionState, retry_delay: Option<Duration>) {
        let text = match (state, retry_delay) {
            (ConnectionState::Connecting, _) => "Connecting...".yellow().to_string(),
            (ConnectionState::Open, _) => "Connected".green().bold().to_string(),
            (ConnectionState::Closed, Some(delay)) => format!(
                "{} retrying in {:.1}s",
                "Disconnected,".red(),
                delay.as_secs_f32()
            ),
            (ConnectionState::Closed, None) => "Disconnected".red().to_string(),
        };
        self.line(text);
    }

    fn on_watchdog_expired(&mut self) {
        self.line(format!(
            "{} device stopped sending data. Type {} to reinitialize.",
            "NO DATA:".red().bold(),
            "reinit".bold()
        ));
    }

    fn on_watchdog_cleared(&mut self) {
        self.line("No-data indicator dismissed".dimmed());
    }

    fn on_frame_rendered(&mut self, frame: &SpectrumFrame) {
        if !self.plot {
            return;
        }
        let row = match self.view {
            View::Spectrum => Self::spectrum_row(frame),
            View::Waterfall => self.waterfall_row(frame),
        };
        let peak = self
            .statistics
            .and_then(|stats| stats.peak_label().map(|label| format!(" peak {} ({})", label, stats.peak_value)))
            .unwrap_or_default();
        self.raw(format!("{}{}", row, peak.dimmed()));
    }

    fn on_statistics_updated(&mut self, statistics: &Statistics) {
        self.statistics = Some(*statistics);
    }

    fn on_operational_status(&mut self, message: &str, kind: StatusKind) {
        let text = match kind {
            StatusKind::Success => message.green().bold(),
            StatusKind::Failure => message.red().bold(),
            StatusKind::Info => message.cyan(),
        };
        self.line(text);
    }

    fn on_history_updated(&mut self, history: &HistoryBuffer) {
        debug!(
            "[Presenter] History {}/{} rows",
            history.filled(),
            history.capacity()
        );
    }

    fn on_settings_updated(&mut self, settings: &Settings) {
        self.line(format!("{} {}", "Settings".cyan(), Self::settings_summary(settings)));
    }

    fn on_scan_status(&mut self, status: ScanStatus) {
        if self.scan == Some(status) {
            return;
        }
        self.scan = Some(status);
        let text = match status {
            ScanStatus::Active => "Scan: Active".green(),
            ScanStatus::Paused => "Scan: Paused".yellow(),
            ScanStatus::Failed => "Scan: Failed".red(),
        };
        self.line(text);
    }

    fn on_audio_state_changed(&mut self, state: AudioSessionState) {
        let text = match state {
            AudioSessionState::Running => "Audio on".green(),
            AudioSessionState::Stopped => "Audio off".yellow(),
        };
        self.line(text);
    }

    fn on_notes_played(&mut self, notes: &[NoteEvent]) {
        if !self.plot || notes.is_empty() {
            return;
        }
        let names: Vec<String> = notes.iter().map(NoteEvent::name).collect();
        self.raw(format!("♪ {}", names.join(" ")).magenta());
    }

    fn on_view_changed(&mut self, view: View, colorscale: Colorscale) {
        self.view = view;
        self.colorscale = colorscale;
        self.line(format!("View: {} ({})", view, colorscale));
    }

    fn on_status_report(&mut self, report: &StatusReport) {
        let connection = match report.connection {
            ConnectionState::Open => report.connection.to_string().green(),
            ConnectionState::Connecting => report.connection.to_string().yellow(),
            ConnectionState::Closed => report.connection.to_string().red(),
        };
        let mut lines = vec![
            format!("Device:      {}", report.endpoint),
            format!("Connection:  {} (retries: {})", connection, report.retry_count),
            format!(
                "Data:        {}",
                if report.stalled {
                    "no data".red().to_string()
                } else {
                    "flowing".green().to_string()
                }
            ),
            format!("Scan:        {}", report.scan),
            format!(
                "Audio:       {} (threshold {}, tones {}, {:.1} dB)",
                report.audio,
                report.sonifier.threshold,
                report.sonifier.max_tones,
                report.sonifier.volume_db
            ),
            format!(
                "History:     {}/{} rows",
                report.history_filled, report.history_capacity
            ),
            format!("View:        {} ({})", report.view, report.colorscale),
        ];
        if let Some(stats) = report.statistics {
            lines.push(format!(
                "Statistics:  total {} peak {} ({})",
                stats.total,
                stats.peak_label().unwrap_or_else(|| "-".to_string()),
                stats.peak_value
            ));
        }
        lines.push(format!("Settings:    {}", Self::settings_summary(&report.settings)));
        for line in lines {
            self.raw(line);
        }
    }

    fn on_message(&mut self, text: &str) {
        self.raw(text);
    }
}
