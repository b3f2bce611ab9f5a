//! Peak selection and the frequency/strength to note mapping.

use rfscan_common::{bin_frequency, BASE_FREQ_MHZ, BIN_COUNT};

/// Lowest pitch, heard at the bottom of the band.
pub const PITCH_BASE: f32 = 48.0;

/// Pitch span across the full band (five octaves).
pub const PITCH_SPAN: f32 = 60.0;

/// Counts at or below this are silent.
pub const VELOCITY_FLOOR: f32 = 1.0;

/// Counts at or above this play at full velocity.
pub const VELOCITY_CEIL: f32 = 30.0;

/// A bin selected for sonification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peak {
    pub index: usize,
    pub value: u32,
}

impl Peak {
    pub fn frequency(&self) -> u16 {
        bin_frequency(self.index)
    }
}

/// Bins with `value >= threshold`, strongest first, at most `max` of them.
/// Equal values keep ascending index order.
pub fn find_peaks(counts: &[u32], threshold: u32, max: usize) -> Vec<Peak> {
    let mut peaks: Vec<Peak> = counts
        .iter()
        .enumerate()
        .filter(|(_, value)| **value >= threshold)
        .map(|(index, value)| Peak {
            index,
            value: *value,
        })
        .collect();
    peaks.sort_by(|a, b| b.value.cmp(&a.value));
    peaks.truncate(max);
    peaks
}

/// `48 + (freq - 2400) / 125 * 60`, so 2400 MHz is C3 and 2525 MHz is C8.
pub fn frequency_to_pitch(freq_mhz: f32) -> f32 {
    PITCH_BASE + (freq_mhz - BASE_FREQ_MHZ as f32) / BIN_COUNT as f32 * PITCH_SPAN
}

/// Map a count linearly from [1, 30] onto [0, 1], clamped.
pub fn strength_to_velocity(value: u32) -> f32 {
    ((value as f32 - VELOCITY_FLOOR) / (VELOCITY_CEIL - VELOCITY_FLOOR)).clamp(0.0, 1.0)
}

/// Scientific pitch name of the nearest semitone (60 is `C4`).
pub fn note_name(pitch: f32) -> String {
    const NAMES: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];
    let midi = pitch.round() as i32;
    let octave = midi.div_euclid(12) - 1;
    format!("{}{}", NAMES[midi.rem_euclid(12) as usize], octave)
}
