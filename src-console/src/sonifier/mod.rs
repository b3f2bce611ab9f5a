//! Sonification of spectrum peaks.
//!
//! Runs on its own eighth-note schedule. Every tick samples whatever frame is
//! current, picks the strongest bins and plays one sixteenth note per bin. It
//! never waits for new data.

mod peaks;
mod tone;

pub use peaks::{
    find_peaks, frequency_to_pitch, note_name, strength_to_velocity, Peak, PITCH_BASE, PITCH_SPAN,
};
pub use tone::{NoteEvent, ToneEngine, TracingToneEngine, TracingVoice, Voice};

use std::fmt;
use std::future::pending;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::connection::LatestFrame;

pub const DEFAULT_TEMPO_BPM: f32 = 120.0;
pub const DEFAULT_THRESHOLD: u32 = 3;
pub const DEFAULT_MAX_TONES: usize = 4;
pub const DEFAULT_VOLUME_DB: f32 = -10.0;

pub const MIN_VOLUME_DB: f32 = -40.0;
pub const MAX_VOLUME_DB: f32 = 0.0;
pub const MIN_THRESHOLD: u32 = 1;
pub const MAX_THRESHOLD: u32 = 30;
pub const MIN_TONES: usize = 1;
pub const MAX_TONES: usize = 10;

const MIN_TEMPO_BPM: f32 = 20.0;
const MAX_TEMPO_BPM: f32 = 300.0;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("tone engine failed to start: {0}")]
    EngineStart(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioSessionState {
    Stopped,
    Running,
}

impl fmt::Display for AudioSessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AudioSessionState::Stopped => "stopped",
            AudioSessionState::Running => "running",
        })
    }
}

/// Live-adjustable sonifier parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SonifierParams {
    /// Minimum count for a bin to sound
    pub threshold: u32,
    /// Maximum notes per tick
    pub max_tones: usize,
    pub volume_db: f32,
}

impl Default for SonifierParams {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            max_tones: DEFAULT_MAX_TONES,
            volume_db: DEFAULT_VOLUME_DB,
        }
    }
}

impl SonifierParams {
    /// Pull every field into its accepted range.
    pub fn clamped(self) -> Self {
        Self {
            threshold: self.threshold.clamp(MIN_THRESHOLD, MAX_THRESHOLD),
            max_tones: self.max_tones.clamp(MIN_TONES, MAX_TONES),
            volume_db: clamp_volume(self.volume_db),
        }
    }
}

fn clamp_volume(volume_db: f32) -> f32 {
    if volume_db.is_nan() {
        DEFAULT_VOLUME_DB
    } else {
        volume_db.clamp(MIN_VOLUME_DB, MAX_VOLUME_DB)
    }
}

/// Owns the audio session, the voice and the tick schedule.
pub struct Sonifier<E: ToneEngine> {
    engine: E,
    voice: Option<E::Voice>,
    state: AudioSessionState,
    params: SonifierParams,
    tempo_bpm: f32,
    ticker: Option<Interval>,
    frames: watch::Receiver<LatestFrame>,
}

impl<E: ToneEngine> Sonifier<E> {
    pub fn new(engine: E, frames: watch::Receiver<LatestFrame>) -> Self {
        Self {
            engine,
            voice: None,
            state: AudioSessionState::Stopped,
            params: SonifierParams::default(),
            tempo_bpm: DEFAULT_TEMPO_BPM,
            ticker: None,
            frames,
        }
    }

    pub fn with_params(mut self, params: SonifierParams) -> Self {
        self.params = params.clamped();
        self
    }

    /// Tempo used by the next `start`.
    pub fn with_tempo(mut self, tempo_bpm: f32) -> Self {
        self.tempo_bpm = if tempo_bpm.is_finite() {
            tempo_bpm.clamp(MIN_TEMPO_BPM, MAX_TEMPO_BPM)
        } else {
            DEFAULT_TEMPO_BPM
        };
        self
    }

    pub fn state(&self) -> AudioSessionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == AudioSessionState::Running
    }

    pub fn params(&self) -> SonifierParams {
        self.params
    }

    pub fn has_voice(&self) -> bool {
        self.voice.is_some()
    }

    /// One eighth note at the current tempo.
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f32(30.0 / self.tempo_bpm)
    }

    /// One sixteenth note at the current tempo.
    pub fn note_duration(&self) -> Duration {
        Duration::from_secs_f32(15.0 / self.tempo_bpm)
    }

    /// Start the engine, build the voice on first use and begin ticking.
    /// Does nothing when already running. On engine failure the session stays
    /// stopped.
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.is_running() {
            debug!("[Sonifier] Already running");
            return Ok(());
        }

        if !self.engine.is_started() {
            if let Err(e) = self.engine.start() {
                warn!("[Sonifier] {}", e);
                return Err(e);
            }
        }

        if self.voice.is_none() {
            let mut voice = self.engine.create_voice();
            voice.set_volume_db(self.params.volume_db);
            self.voice = Some(voice);
        }

        let mut ticker = interval_at(Instant::now(), self.tick_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.ticker = Some(ticker);
        self.state = AudioSessionState::Running;
        info!(
            "[Sonifier] Started at {} BPM (tick {} ms)",
            self.tempo_bpm,
            self.tick_period().as_millis()
        );
        Ok(())
    }

    /// Cancel the schedule and silence sounding notes. The voice is kept.
    pub fn stop(&mut self) {
        if !self.is_running() {
            return;
        }
        self.ticker = None;
        if let Some(voice) = self.voice.as_mut() {
            voice.release_all();
        }
        self.state = AudioSessionState::Stopped;
        info!("[Sonifier] Stopped");
    }

    /// Cached, and applied now if the voice exists.
    pub fn set_volume_db(&mut self, volume_db: f32) {
        self.params.volume_db = clamp_volume(volume_db);
        if let Some(voice) = self.voice.as_mut() {
            voice.set_volume_db(self.params.volume_db);
        }
    }

    pub fn set_threshold(&mut self, threshold: u32) {
        self.params.threshold = threshold.clamp(MIN_THRESHOLD, MAX_THRESHOLD);
    }

    pub fn set_max_tones(&mut self, max_tones: usize) {
        self.params.max_tones = max_tones.clamp(MIN_TONES, MAX_TONES);
    }

    /// Wait for the next scheduled tick. Pending forever while stopped.
    pub async fn next_tick(&mut self) -> Instant {
        match self.ticker.as_mut() {
            Some(ticker) => ticker.tick().await,
            None => pending().await,
        }
    }

    /// Play one tick against the current frame and return the notes played.
    pub fn play_tick(&mut self, at: Instant) -> Vec<NoteEvent> {
        let duration = self.note_duration();
        let frame = self.frames.borrow().clone();
        let (Some(frame), Some(voice)) = (frame, self.voice.as_mut()) else {
            return Vec::new();
        };
        if self.state != AudioSessionState::Running {
            return Vec::new();
        }

        let notes: Vec<NoteEvent> =
            find_peaks(frame.counts(), self.params.threshold, self.params.max_tones)
                .into_iter()
                .map(|peak| NoteEvent {
                    pitch: frequency_to_pitch(peak.frequency() as f32),
                    velocity: strength_to_velocity(peak.value),
                    duration,
                    at,
                })
                .collect();

        for note in &notes {
            voice.trigger(note);
        }
        notes
    }
}
