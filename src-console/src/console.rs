//! The console loop.
//!
//! Every unit of work (a transport event, a sonifier tick, an operator action)
//! is dispatched from one `select!` and runs to completion before the next.

use std::ops::ControlFlow;

use rfscan_common::wire::DeviceCommand;
use rfscan_common::Statistics;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::connection::{ConnectionEvent, ConnectionManager, Connector};
use crate::history::HistoryBuffer;
use crate::operator::{help_text, parse_action, OperatorAction};
use crate::presentation::{Colorscale, PresentationAdapter, ScanStatus, StatusReport, View};
use crate::settings_sync::SettingsSync;
use crate::sonifier::{AudioSessionState, Sonifier, SonifierParams, ToneEngine, DEFAULT_TEMPO_BPM};

/// Input fed to the console from outside the loop.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleInput {
    /// Raw operator text, parsed by the console
    Line(String),
    Action(OperatorAction),
}

#[derive(Debug, Clone)]
pub struct ConsoleOptions {
    pub tempo_bpm: f32,
    pub sonifier: SonifierParams,
    pub colorscale: Colorscale,
}

impl Default for ConsoleOptions {
    fn default() -> Self {
        Self {
            tempo_bpm: DEFAULT_TEMPO_BPM,
            sonifier: SonifierParams::default(),
            colorscale: Colorscale::default(),
        }
    }
}

/// Wires the components together and routes their events to the presenter.
pub struct Console<C: Connector, E: ToneEngine, P: PresentationAdapter> {
    connection: ConnectionManager<C>,
    history: HistoryBuffer,
    settings: SettingsSync,
    sonifier: Sonifier<E>,
    presenter: P,
    input: Option<mpsc::UnboundedReceiver<ConsoleInput>>,
    paused: bool,
    scan: ScanStatus,
    statistics: Option<Statistics>,
    view: View,
    colorscale: Colorscale,
}

impl<C: Connector, E: ToneEngine, P: PresentationAdapter> Console<C, E, P> {
    /// Build the console. The first connection attempt starts immediately.
    pub fn new(connector: C, engine: E, presenter: P, options: ConsoleOptions) -> Self {
        let connection = ConnectionManager::new(connector);
        let sonifier = Sonifier::new(engine, connection.subscribe_frames())
            .with_tempo(options.tempo_bpm)
            .with_params(options.sonifier);
        Self {
            connection,
            history: HistoryBuffer::new(),
            settings: SettingsSync::new(),
            sonifier,
            presenter,
            input: None,
            paused: false,
            scan: ScanStatus::Active,
            statistics: None,
            view: View::default(),
            colorscale: options.colorscale,
        }
    }

    pub fn with_input(mut self, input: mpsc::UnboundedReceiver<ConsoleInput>) -> Self {
        self.input = Some(input);
        self
    }

    pub fn connection(&self) -> &ConnectionManager<C> {
        &self.connection
    }

    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    pub fn settings(&self) -> &SettingsSync {
        &self.settings
    }

    pub fn sonifier(&self) -> &Sonifier<E> {
        &self.sonifier
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn scan_status(&self) -> ScanStatus {
        self.scan
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Run until the operator quits, then shut down.
    pub async fn run(&mut self) {
        info!("[Console] Running against {}", self.connection.endpoint());
        self.presenter.on_view_changed(self.view, self.colorscale);
        while self.step().await.is_continue() {}
        self.shutdown();
    }

    /// Wait for and handle exactly one unit of work.
    pub async fn step(&mut self) -> ControlFlow<()> {
        tokio::select! {
            event = self.connection.next_event() => {
                self.handle_connection_event(event);
                ControlFlow::Continue(())
            }
            at = self.sonifier.next_tick() => {
                self.on_tick(at);
                ControlFlow::Continue(())
            }
            input = next_input(&mut self.input) => match input {
                Some(ConsoleInput::Line(line)) => self.handle_line(&line),
                Some(ConsoleInput::Action(action)) => self.handle_action(action),
                None => {
                    debug!("[Console] Operator input closed");
                    self.input = None;
                    ControlFlow::Continue(())
                }
            },
        }
    }

    pub fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::StateChanged { state, retry_delay } => {
                self.presenter.on_connection_state_changed(state, retry_delay);
            }
            ConnectionEvent::Frame { frame, statistics } => {
                self.history.push(frame.clone());
                self.presenter.on_frame_rendered(&frame);
                self.presenter.on_history_updated(&self.history);
                if let Some(statistics) = statistics {
                    self.statistics = Some(statistics);
                    self.presenter.on_statistics_updated(&statistics);
                }
                self.set_scan_status(ScanStatus::Active);
            }
            ConnectionEvent::Settings(settings) => {
                self.settings.apply_snapshot(settings);
                self.presenter.on_settings_updated(self.settings.cache());
            }
            ConnectionEvent::OperationalStatus { message, kind } => {
                self.presenter.on_operational_status(&message, kind);
            }
            ConnectionEvent::WatchdogExpired => {
                self.presenter.on_watchdog_expired();
                self.set_scan_status(ScanStatus::Failed);
            }
            ConnectionEvent::LivenessRestored => {
                self.presenter.on_watchdog_cleared();
            }
        }
    }

    /// Parse and run one line of operator input.
    pub fn handle_line(&mut self, line: &str) -> ControlFlow<()> {
        if line.trim().is_empty() {
            return ControlFlow::Continue(());
        }
        match parse_action(line) {
            Ok(action) => self.handle_action(action),
            Err(e) => {
                self.presenter.on_message(&e.to_string());
                ControlFlow::Continue(())
            }
        }
    }

    pub fn handle_action(&mut self, action: OperatorAction) -> ControlFlow<()> {
        debug!("[Console] Operator: {:?}", action);
        match action {
            OperatorAction::Device(command) => self.device_command(command),
            OperatorAction::Set { key, value } => {
                let settings = self.settings.commit(key, value);
                self.presenter.on_settings_updated(&settings);
                self.connection.send_settings(&settings);
            }
            OperatorAction::Edit { key, value } => self.settings.stage(key, value),
            OperatorAction::Preset(preset) => {
                info!("[Console] Applying {} preset", preset.name());
                let settings = self.settings.apply_preset(preset);
                self.presenter.on_settings_updated(&settings);
                self.connection.send_settings(&settings);
            }
            OperatorAction::AudioStart => {
                let was_running = self.sonifier.is_running();
                if self.sonifier.start().is_ok() && !was_running {
                    self.presenter.on_audio_state_changed(AudioSessionState::Running);
                }
            }
            OperatorAction::AudioStop => {
                if self.sonifier.is_running() {
                    self.sonifier.stop();
                    self.presenter.on_audio_state_changed(AudioSessionState::Stopped);
                }
            }
            OperatorAction::Volume(volume_db) => {
                self.sonifier.set_volume_db(volume_db);
                let volume_db = self.sonifier.params().volume_db;
                self.presenter.on_message(&format!("Volume {:.1} dB", volume_db));
            }
            OperatorAction::Threshold(threshold) => {
                self.sonifier.set_threshold(threshold);
                let threshold = self.sonifier.params().threshold;
                self.presenter.on_message(&format!("Threshold {}", threshold));
            }
            OperatorAction::Tones(tones) => {
                self.sonifier.set_max_tones(tones);
                let tones = self.sonifier.params().max_tones;
                self.presenter.on_message(&format!("Max tones {}", tones));
            }
            OperatorAction::View(view) => {
                self.view = view;
                self.presenter.on_view_changed(self.view, self.colorscale);
            }
            OperatorAction::Colorscale(colorscale) => {
                self.colorscale = colorscale;
                self.presenter.on_view_changed(self.view, self.colorscale);
            }
            OperatorAction::Status => {
                let report = self.status_report();
                self.presenter.on_status_report(&report);
            }
            OperatorAction::Help => self.presenter.on_message(&help_text()),
            OperatorAction::Quit => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    fn device_command(&mut self, command: DeviceCommand) {
        if !self.connection.send_command(command) {
            warn!("[Console] Not connected, '{}' not sent", command);
        }
        match command {
            DeviceCommand::Pause => {
                self.paused = true;
                self.connection.set_frame_intake(false);
                self.set_scan_status(ScanStatus::Paused);
            }
            DeviceCommand::Resume => {
                self.paused = false;
                self.connection.set_frame_intake(true);
                self.set_scan_status(ScanStatus::Active);
            }
            DeviceCommand::Reinit => {
                if self.connection.acknowledge_stall() {
                    self.presenter.on_watchdog_cleared();
                }
            }
            DeviceCommand::Clear | DeviceCommand::Reset => {}
        }
    }

    fn on_tick(&mut self, at: Instant) {
        let notes = self.sonifier.play_tick(at);
        if !notes.is_empty() {
            self.presenter.on_notes_played(&notes);
        }
    }

    fn set_scan_status(&mut self, status: ScanStatus) {
        self.scan = status;
        self.presenter.on_scan_status(status);
    }

    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            endpoint: self.connection.endpoint(),
            connection: self.connection.state(),
            retry_count: self.connection.retry_count(),
            stalled: self.connection.is_stalled(),
            scan: self.scan,
            audio: self.sonifier.state(),
            sonifier: self.sonifier.params(),
            settings: self.settings.cache().clone(),
            history_filled: self.history.filled(),
            history_capacity: self.history.capacity(),
            statistics: self.statistics,
            view: self.view,
            colorscale: self.colorscale,
        }
    }

    /// Silence audio and drop the session.
    pub fn shutdown(&mut self) {
        self.sonifier.stop();
        self.connection.close();
        info!("[Console] Stopped");
    }
}

async fn next_input(
    input: &mut Option<mpsc::UnboundedReceiver<ConsoleInput>>,
) -> Option<ConsoleInput> {
    match input.as_mut() {
        Some(input) => input.recv().await,
        None => std::future::pending().await,
    }
}
