//! End-to-end scenarios: console loop against an in-memory device.

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rfscan_common::wire::{read_json, DeviceCommand, OutboundMessage};
use rfscan_common::{SettingKey, Settings, SpectrumFrame, Statistics, StatusKind, BIN_COUNT};
use rfscan_console::connection::{
    memory_link, ConnectionState, MemoryConnector, MemoryDevice, WATCHDOG_TIMEOUT,
};
use rfscan_console::operator::OperatorAction;
use rfscan_console::presentation::{PresentationAdapter, ScanStatus};
use rfscan_console::sonifier::{
    frequency_to_pitch, strength_to_velocity, AudioError, AudioSessionState, NoteEvent, ToneEngine,
    Voice,
};
use rfscan_console::{Console, ConsoleOptions};
use tokio::io::{AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::time::Instant;

#[derive(Default)]
struct Presented {
    states: Vec<(ConnectionState, Option<Duration>)>,
    frames: usize,
    statistics: Vec<Statistics>,
    toasts: Vec<(String, StatusKind)>,
    watchdog_expired: usize,
    watchdog_cleared: usize,
    settings: Vec<Settings>,
    scan: Vec<ScanStatus>,
    audio: Vec<AudioSessionState>,
    notes: Vec<NoteEvent>,
    messages: Vec<String>,
}

#[derive(Clone, Default)]
struct RecordingPresenter(Arc<Mutex<Presented>>);

impl RecordingPresenter {
    fn get(&self) -> std::sync::MutexGuard<'_, Presented> {
        self.0.lock().unwrap()
    }
}

impl PresentationAdapter for RecordingPresenter {
    fn on_connection_state_changed(&mut self, state: ConnectionState, retry_delay: Option<Duration>) {
        self.get().states.push((state, retry_delay));
    }

    fn on_watchdog_expired(&mut self) {
        self.get().watchdog_expired += 1;
    }

    fn on_frame_rendered(&mut self, _frame: &SpectrumFrame) {
        self.get().frames += 1;
    }

    fn on_statistics_updated(&mut self, statistics: &Statistics) {
        self.get().statistics.push(*statistics);
    }

    fn on_operational_status(&mut self, message: &str, kind: StatusKind) {
        self.get().toasts.push((message.to_string(), kind));
    }

    fn on_watchdog_cleared(&mut self) {
        self.get().watchdog_cleared += 1;
    }

    fn on_settings_updated(&mut self, settings: &Settings) {
        self.get().settings.push(settings.clone());
    }

    fn on_scan_status(&mut self, status: ScanStatus) {
        self.get().scan.push(status);
    }

    fn on_audio_state_changed(&mut self, state: AudioSessionState) {
        self.get().audio.push(state);
    }

    fn on_notes_played(&mut self, notes: &[NoteEvent]) {
        self.get().notes.extend_from_slice(notes);
    }

    fn on_message(&mut self, text: &str) {
        self.get().messages.push(text.to_string());
    }
}

#[derive(Default)]
struct EngineLog {
    voices_created: usize,
    notes: Vec<NoteEvent>,
}

#[derive(Default)]
struct RecordingEngine {
    log: Arc<Mutex<EngineLog>>,
    started: bool,
    refuse: bool,
}

struct RecordingVoice(Arc<Mutex<EngineLog>>);

impl ToneEngine for RecordingEngine {
    type Voice = RecordingVoice;

    fn start(&mut self) -> Result<(), AudioError> {
        if self.refuse {
            return Err(AudioError::EngineStart("suspended".to_string()));
        }
        self.started = true;
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.started
    }

    fn create_voice(&mut self) -> RecordingVoice {
        self.log.lock().unwrap().voices_created += 1;
        RecordingVoice(self.log.clone())
    }
}

impl Voice for RecordingVoice {
    fn trigger(&mut self, note: &NoteEvent) {
        self.0.lock().unwrap().notes.push(*note);
    }

    fn release_all(&mut self) {}

    fn set_volume_db(&mut self, _volume_db: f32) {}
}

type TestConsole = Console<MemoryConnector, RecordingEngine, RecordingPresenter>;

struct Device {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl Device {
    async fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    async fn frame(&mut self, bins: &[(usize, u32)]) {
        let mut data = vec![0u32; BIN_COUNT];
        for (index, value) in bins {
            data[*index] = *value;
        }
        let line = serde_json::json!({
            "type": "spectrum",
            "data": data,
            "statistics": {"total": data.iter().sum::<u32>(), "peak_freq": 2400, "peak_value": 0}
        });
        self.send(&line.to_string()).await;
    }

    async fn receive(&mut self) -> OutboundMessage {
        read_json(&mut self.reader).await.unwrap()
    }
}

fn console(engine: RecordingEngine) -> (TestConsole, MemoryDevice, RecordingPresenter) {
    let (connector, device) = memory_link();
    let presenter = RecordingPresenter::default();
    let console = Console::new(connector, engine, presenter.clone(), ConsoleOptions::default());
    (console, device, presenter)
}

async fn step_until(console: &mut TestConsole, mut done: impl FnMut(&TestConsole) -> bool) {
    for _ in 0..1000 {
        if done(console) {
            return;
        }
        assert_eq!(console.step().await, ControlFlow::Continue(()));
    }
    panic!("condition never reached");
}

async fn open(console: &mut TestConsole, device: &mut MemoryDevice) -> Device {
    step_until(console, |c| c.connection().state() == ConnectionState::Open).await;
    let (read, writer) = tokio::io::split(device.accept().await.unwrap());
    Device {
        reader: BufReader::new(read),
        writer,
    }
}

#[tokio::test(start_paused = true)]
async fn test_history_keeps_latest_300_of_301() {
    let (mut console, mut link, presenter) = console(RecordingEngine::default());
    let mut device = open(&mut console, &mut link).await;

    for i in 0..301u32 {
        device.frame(&[(0, i)]).await;
        step_until(&mut console, |_| presenter.get().frames > i as usize).await;
    }

    let history = console.history();
    assert_eq!(history.len(), 300);
    assert_eq!(history.filled(), 300);
    assert_eq!(history.newest().unwrap().get(0), Some(300));
    let oldest = history.rows().last().unwrap().unwrap();
    assert_eq!(oldest.get(0), Some(1));
    assert_eq!(console.scan_status(), ScanStatus::Active);
    assert_eq!(presenter.get().statistics.len(), 301);
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_then_commit_sends_ordered_full_object() {
    let (mut console, mut link, presenter) = console(RecordingEngine::default());
    let mut device = open(&mut console, &mut link).await;

    device
        .send(r#"{"type":"settings","settings":{"startFreq":2400,"endFreq":2480,"powerLevel":2,"dataRate":1,"scanSpeed":5,"sensitivity":60,"averaging":3,"led":true}}"#)
        .await;
    step_until(&mut console, |_| !presenter.get().settings.is_empty()).await;
    assert_eq!(console.settings().control(SettingKey::EndFreq), "2480");

    console.handle_action(OperatorAction::Set {
        key: SettingKey::StartFreq,
        value: "2500".to_string(),
    });

    let OutboundMessage::Settings { settings } = device.receive().await else {
        panic!("expected a settings message");
    };
    assert_eq!((settings.start_freq, settings.end_freq), (2500, 2501));
    assert_eq!(settings.power_level, 2);
    assert_eq!(settings.averaging, 3);
    assert_eq!(settings.extra["led"], serde_json::json!(true));
}

#[tokio::test(start_paused = true)]
async fn test_outbound_dropped_while_disconnected() {
    let (mut console, mut link, presenter) = console(RecordingEngine::default());
    link.set_accepting(false);
    step_until(&mut console, |c| c.connection().state() == ConnectionState::Closed).await;

    console.handle_action(OperatorAction::Set {
        key: SettingKey::Sensitivity,
        value: "80".to_string(),
    });
    console.handle_action(OperatorAction::Device(DeviceCommand::Reset));
    assert_eq!(console.settings().cache().sensitivity, 80);

    link.set_accepting(true);
    let mut device = open(&mut console, &mut link).await;
    console.handle_action(OperatorAction::Device(DeviceCommand::Clear));
    assert_eq!(
        device.receive().await,
        OutboundMessage::Command {
            command: DeviceCommand::Clear
        }
    );

    let presented = presenter.get();
    let states = &presented.states;
    assert!(states.contains(&(ConnectionState::Closed, Some(Duration::from_millis(2000)))));
    assert_eq!(states.last(), Some(&(ConnectionState::Open, None)));
}

#[tokio::test(start_paused = true)]
async fn test_reinit_status_toast() {
    let (mut console, mut link, presenter) = console(RecordingEngine::default());
    let mut device = open(&mut console, &mut link).await;

    device.send(r#"{"type":"reinitStatus","status":"fail"}"#).await;
    device.send(r#"{"type":"reinitStatus","status":"busy"}"#).await;
    step_until(&mut console, |_| presenter.get().toasts.len() == 2).await;

    assert_eq!(
        presenter.get().toasts,
        vec![
            ("Re-init fail".to_string(), StatusKind::Failure),
            ("Re-init busy".to_string(), StatusKind::Info),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_requires_reinit() {
    let (mut console, mut link, presenter) = console(RecordingEngine::default());
    let mut device = open(&mut console, &mut link).await;
    let opened_at = Instant::now();

    step_until(&mut console, |_| presenter.get().watchdog_expired == 1).await;
    assert!(opened_at.elapsed() >= WATCHDOG_TIMEOUT);
    assert_eq!(console.scan_status(), ScanStatus::Failed);
    assert_eq!(console.connection().state(), ConnectionState::Open);

    let reinit_at = Instant::now();
    console.handle_action(OperatorAction::Device(DeviceCommand::Reinit));
    assert_eq!(
        device.receive().await,
        OutboundMessage::Command {
            command: DeviceCommand::Reinit
        }
    );
    assert_eq!(presenter.get().watchdog_cleared, 1);
    assert!(!console.connection().is_stalled());

    // still silent: the indicator comes back one watchdog period later
    step_until(&mut console, |_| presenter.get().watchdog_expired == 2).await;
    assert!(reinit_at.elapsed() >= WATCHDOG_TIMEOUT);

    device.frame(&[(10, 4)]).await;
    step_until(&mut console, |_| presenter.get().frames == 1).await;
    assert_eq!(presenter.get().watchdog_cleared, 2);
    assert_eq!(console.scan_status(), ScanStatus::Active);
}

#[tokio::test(start_paused = true)]
async fn test_pause_stops_frame_intake() {
    let (mut console, mut link, presenter) = console(RecordingEngine::default());
    let mut device = open(&mut console, &mut link).await;

    console.handle_action(OperatorAction::Device(DeviceCommand::Pause));
    assert_eq!(
        device.receive().await,
        OutboundMessage::Command {
            command: DeviceCommand::Pause
        }
    );
    assert!(console.is_paused());

    device.frame(&[(3, 9)]).await;
    device.send(r#"{"type":"settings","settings":{}}"#).await;
    step_until(&mut console, |_| !presenter.get().settings.is_empty()).await;
    assert_eq!(console.history().filled(), 0);
    assert!(console.connection().latest_frame().is_none());
    assert_eq!(console.scan_status(), ScanStatus::Paused);

    console.handle_action(OperatorAction::Device(DeviceCommand::Resume));
    device.frame(&[(3, 9)]).await;
    step_until(&mut console, |c| c.history().filled() == 1).await;
    assert_eq!(console.scan_status(), ScanStatus::Active);
}

#[tokio::test(start_paused = true)]
async fn test_sonifier_plays_strongest_peaks() {
    let engine = RecordingEngine::default();
    let log = engine.log.clone();
    let (mut console, mut link, presenter) = console(engine);
    let mut device = open(&mut console, &mut link).await;

    console.handle_action(OperatorAction::Threshold(3));
    console.handle_action(OperatorAction::Tones(4));
    device.frame(&[(2, 5), (4, 28)]).await;
    step_until(&mut console, |c| c.history().filled() == 1).await;

    console.handle_action(OperatorAction::AudioStart);
    step_until(&mut console, |_| !presenter.get().notes.is_empty()).await;

    let notes = log.lock().unwrap().notes.clone();
    assert_eq!(notes.len(), 2);
    assert_eq!(notes[0].pitch, frequency_to_pitch(2404.0));
    assert_eq!(notes[0].velocity, strength_to_velocity(28));
    assert_eq!(notes[1].pitch, frequency_to_pitch(2402.0));
    assert_eq!(notes[1].velocity, strength_to_velocity(5));
    assert_eq!(notes[0].duration, Duration::from_millis(125));
    assert_eq!(presenter.get().audio, vec![AudioSessionState::Running]);
}

#[tokio::test(start_paused = true)]
async fn test_audio_start_is_idempotent() {
    let engine = RecordingEngine::default();
    let log = engine.log.clone();
    let (mut console, _link, presenter) = console(engine);

    console.handle_action(OperatorAction::AudioStart);
    console.handle_action(OperatorAction::AudioStart);
    console.handle_action(OperatorAction::AudioStop);
    console.handle_action(OperatorAction::AudioStop);
    console.handle_action(OperatorAction::AudioStart);

    assert_eq!(log.lock().unwrap().voices_created, 1);
    assert_eq!(
        presenter.get().audio,
        vec![
            AudioSessionState::Running,
            AudioSessionState::Stopped,
            AudioSessionState::Running
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_refused_engine_leaves_audio_stopped() {
    let engine = RecordingEngine {
        refuse: true,
        ..Default::default()
    };
    let log = engine.log.clone();
    let (mut console, _link, presenter) = console(engine);

    console.handle_action(OperatorAction::AudioStart);
    assert_eq!(console.sonifier().state(), AudioSessionState::Stopped);
    assert_eq!(log.lock().unwrap().voices_created, 0);
    assert!(presenter.get().audio.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_operator_lines() {
    let (mut console, _link, presenter) = console(RecordingEngine::default());

    assert_eq!(console.handle_line("launch"), ControlFlow::Continue(()));
    assert_eq!(console.handle_line("   "), ControlFlow::Continue(()));
    assert_eq!(console.handle_line("volume -6"), ControlFlow::Continue(()));
    assert_eq!(console.sonifier().params().volume_db, -6.0);
    assert_eq!(console.handle_line("quit"), ControlFlow::Break(()));

    let presented = presenter.get();
    let messages = &presented.messages;
    assert!(messages[0].contains("unknown command 'launch'"));
    assert_eq!(messages[1], "Volume -6.0 dB");
}
