//! Shared types for the rfscan spectrum console.

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::wire::WireError;

/// Number of frequency bins in one spectrum frame.
pub const BIN_COUNT: usize = 125;

/// Frequency of bin 0 in MHz.
pub const BASE_FREQ_MHZ: u16 = 2400;

/// Upper edge of the scanned band in MHz.
pub const TOP_FREQ_MHZ: u16 = 2525;

/// Frequency in MHz represented by a bin index.
pub fn bin_frequency(index: usize) -> u16 {
    BASE_FREQ_MHZ + index as u16
}

/// One spectrum update: activity count per 1 MHz bin, starting at 2400 MHz.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u32>", into = "Vec<u32>")]
pub struct SpectrumFrame(Vec<u32>);

impl SpectrumFrame {
    /// Build a frame, rejecting anything that is not exactly `BIN_COUNT` long.
    pub fn new(counts: Vec<u32>) -> Result<Self, WireError> {
        if counts.len() != BIN_COUNT {
            return Err(WireError::FrameLength {
                len: counts.len(),
                expected: BIN_COUNT,
            });
        }
        Ok(Self(counts))
    }

    /// A frame with no activity in any bin.
    pub fn silent() -> Self {
        Self(vec![0; BIN_COUNT])
    }

    pub fn counts(&self) -> &[u32] {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<u32> {
        self.0.get(index).copied()
    }

    /// Sum of all bins.
    pub fn total(&self) -> u64 {
        self.0.iter().map(|&c| c as u64).sum()
    }
}

impl TryFrom<Vec<u32>> for SpectrumFrame {
    type Error = WireError;

    fn try_from(counts: Vec<u32>) -> Result<Self, Self::Error> {
        Self::new(counts)
    }
}

impl From<SpectrumFrame> for Vec<u32> {
    fn from(frame: SpectrumFrame) -> Self {
        frame.0
    }
}

/// Summary numbers the device computes alongside each frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Statistics {
    /// Total signal count across the band
    pub total: u64,
    /// Frequency of the strongest bin in MHz
    pub peak_freq: u16,
    /// Count in the strongest bin
    pub peak_value: u32,
}

impl Statistics {
    /// Text for the "peak activity" indicator, `None` while the band is quiet.
    pub fn peak_label(&self) -> Option<String> {
        (self.peak_value > 0).then(|| format!("{} MHz", self.peak_freq))
    }
}

/// The seven operator-configurable device parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SettingKey {
    StartFreq,
    EndFreq,
    PowerLevel,
    DataRate,
    ScanSpeed,
    Sensitivity,
    Averaging,
}

impl SettingKey {
    pub const ALL: [SettingKey; 7] = [
        SettingKey::StartFreq,
        SettingKey::EndFreq,
        SettingKey::PowerLevel,
        SettingKey::DataRate,
        SettingKey::ScanSpeed,
        SettingKey::Sensitivity,
        SettingKey::Averaging,
    ];

    /// Key name used on the wire.
    pub fn wire_name(&self) -> &'static str {
        match self {
            SettingKey::StartFreq => "startFreq",
            SettingKey::EndFreq => "endFreq",
            SettingKey::PowerLevel => "powerLevel",
            SettingKey::DataRate => "dataRate",
            SettingKey::ScanSpeed => "scanSpeed",
            SettingKey::Sensitivity => "sensitivity",
            SettingKey::Averaging => "averaging",
        }
    }

    /// Values the operator control accepts.
    pub fn range(&self) -> RangeInclusive<i64> {
        match self {
            SettingKey::StartFreq => BASE_FREQ_MHZ as i64..=TOP_FREQ_MHZ as i64 - 1,
            SettingKey::EndFreq => BASE_FREQ_MHZ as i64 + 1..=TOP_FREQ_MHZ as i64,
            SettingKey::PowerLevel => 0..=3,
            SettingKey::DataRate => 0..=2,
            SettingKey::ScanSpeed => 0..=50,
            SettingKey::Sensitivity => 10..=100,
            SettingKey::Averaging => 0..=10,
        }
    }

    pub fn clamp_value(&self, value: i64) -> i64 {
        let range = self.range();
        value.clamp(*range.start(), *range.end())
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for SettingKey {
    type Err = String;

    /// Accepts the wire name in any case, or a kebab/snake spelling (`start-freq`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .flat_map(char::to_lowercase)
            .collect();
        SettingKey::ALL
            .into_iter()
            .find(|key| key.wire_name().to_lowercase() == folded)
            .ok_or_else(|| format!("unknown setting '{}'", s))
    }
}

/// The device's scan configuration.
///
/// Keys the console does not recognize are kept in `extra` so a commit sends
/// them back to the device untouched. Inbound values are read as any JSON
/// number and clamped to their control range, so one odd value never costs
/// the whole snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "WireSettings")]
pub struct Settings {
    /// Sweep start in MHz
    pub start_freq: u16,
    /// Sweep end in MHz
    pub end_freq: u16,
    /// PA level (0 = MIN .. 3 = MAX)
    pub power_level: u8,
    /// Air data rate (0 = 250kbps, 1 = 1Mbps, 2 = 2Mbps)
    pub data_rate: u8,
    /// Delay between sweeps in ms
    pub scan_speed: u8,
    /// Detection sensitivity in percent
    pub sensitivity: u8,
    /// Number of sweeps averaged, 0 disables averaging
    pub averaging: u8,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            start_freq: BASE_FREQ_MHZ,
            end_freq: TOP_FREQ_MHZ,
            power_level: 3,
            data_rate: 0,
            scan_speed: 10,
            sensitivity: 50,
            averaging: 0,
            extra: serde_json::Map::new(),
        }
    }
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WireSettings {
    start_freq: Option<serde_json::Value>,
    end_freq: Option<serde_json::Value>,
    power_level: Option<serde_json::Value>,
    data_rate: Option<serde_json::Value>,
    scan_speed: Option<serde_json::Value>,
    sensitivity: Option<serde_json::Value>,
    averaging: Option<serde_json::Value>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

/// Integer reading of a JSON value: integers as-is, floats truncated,
/// numeric strings parsed.
fn wire_integer(value: &serde_json::Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    if let Some(f) = value.as_f64().filter(|f| f.is_finite()) {
        return Some(f.trunc() as i64);
    }
    value.as_str().and_then(|s| s.trim().parse().ok())
}

impl From<WireSettings> for Settings {
    fn from(wire: WireSettings) -> Self {
        let mut settings = Settings {
            extra: wire.extra,
            ..Settings::default()
        };
        let values = [
            (SettingKey::StartFreq, wire.start_freq),
            (SettingKey::EndFreq, wire.end_freq),
            (SettingKey::PowerLevel, wire.power_level),
            (SettingKey::DataRate, wire.data_rate),
            (SettingKey::ScanSpeed, wire.scan_speed),
            (SettingKey::Sensitivity, wire.sensitivity),
            (SettingKey::Averaging, wire.averaging),
        ];
        for (key, value) in values {
            if let Some(value) = value.as_ref().and_then(wire_integer) {
                settings.set(key, value);
            }
        }
        settings
    }
}

impl Settings {
    pub fn get(&self, key: SettingKey) -> i64 {
        match key {
            SettingKey::StartFreq => self.start_freq as i64,
            SettingKey::EndFreq => self.end_freq as i64,
            SettingKey::PowerLevel => self.power_level as i64,
            SettingKey::DataRate => self.data_rate as i64,
            SettingKey::ScanSpeed => self.scan_speed as i64,
            SettingKey::Sensitivity => self.sensitivity as i64,
            SettingKey::Averaging => self.averaging as i64,
        }
    }

    /// Store a value, clamped to the key's control range.
    pub fn set(&mut self, key: SettingKey, value: i64) {
        let value = key.clamp_value(value);
        match key {
            SettingKey::StartFreq => self.start_freq = value as u16,
            SettingKey::EndFreq => self.end_freq = value as u16,
            SettingKey::PowerLevel => self.power_level = value as u8,
            SettingKey::DataRate => self.data_rate = value as u8,
            SettingKey::ScanSpeed => self.scan_speed = value as u8,
            SettingKey::Sensitivity => self.sensitivity = value as u8,
            SettingKey::Averaging => self.averaging = value as u8,
        }
    }

    pub fn is_ordered(&self) -> bool {
        self.start_freq < self.end_freq
    }

    /// Human readable value, as the operator panel labels it.
    pub fn display_value(&self, key: SettingKey) -> String {
        match key {
            SettingKey::StartFreq => format!("{} MHz", self.start_freq),
            SettingKey::EndFreq => format!("{} MHz", self.end_freq),
            SettingKey::PowerLevel => match self.power_level {
                0 => "MIN".to_string(),
                1 => "LOW".to_string(),
                2 => "HIGH".to_string(),
                3 => "MAX".to_string(),
                other => other.to_string(),
            },
            SettingKey::DataRate => match self.data_rate {
                0 => "250kbps".to_string(),
                1 => "1Mbps".to_string(),
                2 => "2Mbps".to_string(),
                other => other.to_string(),
            },
            SettingKey::ScanSpeed => format!("{} ms", self.scan_speed),
            SettingKey::Sensitivity => format!("{}%", self.sensitivity),
            SettingKey::Averaging if self.averaging == 0 => "Off".to_string(),
            SettingKey::Averaging => format!("{}x", self.averaging),
        }
    }
}

/// Common 2.4 GHz band allocations offered as one-click frequency ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandPreset {
    WiFi,
    Bluetooth,
    ZigBee,
    FullBand,
}

impl BandPreset {
    pub const ALL: [BandPreset; 4] = [
        BandPreset::WiFi,
        BandPreset::Bluetooth,
        BandPreset::ZigBee,
        BandPreset::FullBand,
    ];

    /// (start, end) in MHz
    pub fn range(&self) -> (u16, u16) {
        match self {
            BandPreset::WiFi => (2412, 2484),
            BandPreset::Bluetooth => (2402, 2480),
            BandPreset::ZigBee => (2405, 2480),
            BandPreset::FullBand => (BASE_FREQ_MHZ, TOP_FREQ_MHZ),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BandPreset::WiFi => "WiFi",
            BandPreset::Bluetooth => "Bluetooth",
            BandPreset::ZigBee => "ZigBee",
            BandPreset::FullBand => "Full Band",
        }
    }
}

impl FromStr for BandPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_', ' '], "").as_str() {
            "wifi" => Ok(BandPreset::WiFi),
            "bluetooth" | "bt" => Ok(BandPreset::Bluetooth),
            "zigbee" => Ok(BandPreset::ZigBee),
            "fullband" | "full" => Ok(BandPreset::FullBand),
            _ => Err(format!("unknown preset '{}'", s)),
        }
    }
}

/// Severity attached to an operational status message from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Success,
    Failure,
    Info,
}

impl StatusKind {
    /// Classify a free-form status string.
    pub fn from_status(status: &str) -> Self {
        match status {
            "success" => StatusKind::Success,
            "fail" => StatusKind::Failure,
            _ => StatusKind::Info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_rejects_wrong_length() {
        assert!(SpectrumFrame::new(vec![0; BIN_COUNT]).is_ok());
        let err = SpectrumFrame::new(vec![1, 2, 3]).unwrap_err();
        assert!(matches!(err, WireError::FrameLength { len: 3, .. }));
    }

    #[test]
    fn test_bin_frequency() {
        assert_eq!(bin_frequency(0), 2400);
        assert_eq!(bin_frequency(BIN_COUNT - 1), 2524);
    }

    #[test]
    fn test_settings_set_clamps_to_control_range() {
        let mut settings = Settings::default();
        settings.set(SettingKey::Sensitivity, 5);
        assert_eq!(settings.sensitivity, 10);
        settings.set(SettingKey::PowerLevel, 9);
        assert_eq!(settings.power_level, 3);
        settings.set(SettingKey::EndFreq, 3000);
        assert_eq!(settings.end_freq, 2525);
        settings.set(SettingKey::StartFreq, 2525);
        assert_eq!(settings.start_freq, 2524);
        assert_eq!(SettingKey::ScanSpeed.clamp_value(-4), 0);
        assert_eq!(SettingKey::Averaging.clamp_value(7), 7);
    }

    #[test]
    fn test_snapshot_tolerates_out_of_type_values() {
        let json = r#"{"startFreq":2410.0,"endFreq":"2450","powerLevel":1,
            "sensitivity":300,"averaging":-2,"scanSpeed":null,"channelMask":"0xff"}"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.start_freq, 2410);
        assert_eq!(settings.end_freq, 2450);
        assert_eq!(settings.power_level, 1);
        assert_eq!(settings.sensitivity, 100);
        assert_eq!(settings.averaging, 0);
        assert_eq!(settings.scan_speed, Settings::default().scan_speed);
        assert_eq!(settings.extra["channelMask"], "0xff");
        assert!(!settings.extra.contains_key("sensitivity"));
    }

    #[test]
    fn test_settings_keep_unknown_keys() {
        let json = r#"{"startFreq":2410,"endFreq":2450,"powerLevel":1,"dataRate":2,
            "scanSpeed":5,"sensitivity":70,"averaging":3,"channelMask":"0xff"}"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.start_freq, 2410);
        assert_eq!(settings.averaging, 3);
        assert_eq!(settings.extra["channelMask"], "0xff");

        let back = serde_json::to_value(&settings).unwrap();
        assert_eq!(back["channelMask"], "0xff");
        assert_eq!(back["scanSpeed"], 5);
    }

    #[test]
    fn test_missing_settings_keys_take_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"startFreq":2420}"#).unwrap();
        assert_eq!(settings.start_freq, 2420);
        assert_eq!(settings.end_freq, Settings::default().end_freq);
    }

    #[test]
    fn test_setting_key_parsing() {
        assert_eq!("startFreq".parse::<SettingKey>(), Ok(SettingKey::StartFreq));
        assert_eq!("start-freq".parse::<SettingKey>(), Ok(SettingKey::StartFreq));
        assert_eq!("SCAN_SPEED".parse::<SettingKey>(), Ok(SettingKey::ScanSpeed));
        assert!("volume".parse::<SettingKey>().is_err());
    }

    #[test]
    fn test_display_values() {
        let mut settings = Settings::default();
        settings.averaging = 0;
        assert_eq!(settings.display_value(SettingKey::Averaging), "Off");
        settings.averaging = 4;
        assert_eq!(settings.display_value(SettingKey::Averaging), "4x");
        settings.data_rate = 1;
        assert_eq!(settings.display_value(SettingKey::DataRate), "1Mbps");
    }

    #[test]
    fn test_presets_are_ordered() {
        for preset in BandPreset::ALL {
            let (start, end) = preset.range();
            assert!(start < end, "{} range is inverted", preset.name());
        }
        assert_eq!("Full Band".parse::<BandPreset>(), Ok(BandPreset::FullBand));
    }

    #[test]
    fn test_status_kind() {
        assert_eq!(StatusKind::from_status("success"), StatusKind::Success);
        assert_eq!(StatusKind::from_status("fail"), StatusKind::Failure);
        assert_eq!(StatusKind::from_status("busy"), StatusKind::Info);
    }

    #[test]
    fn test_peak_label() {
        let quiet = Statistics::default();
        assert_eq!(quiet.peak_label(), None);
        let busy = Statistics {
            total: 40,
            peak_freq: 2437,
            peak_value: 12,
        };
        assert_eq!(busy.peak_label().as_deref(), Some("2437 MHz"));
    }
}
