//! Boundary to the tone engine that actually makes sound.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use super::peaks::note_name;
use super::AudioError;

/// One note-on/note-off pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteEvent {
    /// Fractional MIDI pitch
    pub pitch: f32,
    /// 0.0 ..= 1.0
    pub velocity: f32,
    pub duration: Duration,
    /// Tick the note belongs to
    pub at: Instant,
}

impl NoteEvent {
    pub fn name(&self) -> String {
        note_name(self.pitch)
    }
}

/// An audio backend. It must be started explicitly before any voice is used.
pub trait ToneEngine {
    type Voice: Voice;

    fn start(&mut self) -> Result<(), AudioError>;

    fn is_started(&self) -> bool;

    /// Build the polyphonic voice notes are played on.
    fn create_voice(&mut self) -> Self::Voice;
}

/// A polyphonic instrument owned by the sonifier.
pub trait Voice {
    fn trigger(&mut self, note: &NoteEvent);

    /// Silence every sounding note.
    fn release_all(&mut self);

    fn set_volume_db(&mut self, volume_db: f32);
}

/// Engine for hosts without an audio device: notes go to the log.
#[derive(Debug, Default)]
pub struct TracingToneEngine {
    started: bool,
}

impl TracingToneEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ToneEngine for TracingToneEngine {
    type Voice = TracingVoice;

    fn start(&mut self) -> Result<(), AudioError> {
        info!("[Tone] Engine started (log output)");
        self.started = true;
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.started
    }

    fn create_voice(&mut self) -> TracingVoice {
        TracingVoice::default()
    }
}

#[derive(Debug, Default)]
pub struct TracingVoice {
    volume_db: f32,
    /// Note-off instants of the notes triggered so far
    note_offs: Vec<Instant>,
}

impl TracingVoice {
    /// Notes still sounding at `now`.
    pub fn sounding_at(&self, now: Instant) -> usize {
        self.note_offs.iter().filter(|off| **off > now).count()
    }
}

impl Voice for TracingVoice {
    fn trigger(&mut self, note: &NoteEvent) {
        self.note_offs.retain(|off| *off > note.at);
        self.note_offs.push(note.at + note.duration);
        debug!(
            "[Tone] {} vel={:.2} for {} ms at {:.1} dB",
            note.name(),
            note.velocity,
            note.duration.as_millis(),
            self.volume_db
        );
    }

    fn release_all(&mut self) {
        let sounding = self.sounding_at(Instant::now());
        if sounding > 0 {
            debug!("[Tone] Released {} note(s)", sounding);
        }
        self.note_offs.clear();
    }

    fn set_volume_db(&mut self, volume_db: f32) {
        self.volume_db = volume_db;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(at: Instant) -> NoteEvent {
        NoteEvent {
            pitch: 60.0,
            velocity: 0.5,
            duration: Duration::from_millis(125),
            at,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_voice_counts_only_sounding_notes() {
        let mut voice = TracingVoice::default();
        let start = Instant::now();
        voice.trigger(&note(start));
        voice.trigger(&note(start));
        assert_eq!(voice.sounding_at(start + Duration::from_millis(100)), 2);

        let next_tick = start + Duration::from_millis(250);
        voice.trigger(&note(next_tick));
        assert_eq!(voice.sounding_at(next_tick), 1);
        assert_eq!(voice.sounding_at(next_tick + Duration::from_millis(125)), 0);

        voice.release_all();
        assert_eq!(voice.sounding_at(next_tick), 0);
    }
}
