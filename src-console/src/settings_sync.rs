//! Settings reconciliation between the operator panel and the device.
//!
//! The device copy is authoritative. A snapshot from the device replaces the
//! cache and every control wholesale; a commit from the operator re-reads all
//! seven controls and yields the complete object to transmit.

use std::collections::BTreeMap;

use rfscan_common::{BandPreset, SettingKey, Settings};
use tracing::{debug, warn};

/// Settings cache plus the text currently shown in each operator control.
#[derive(Debug, Clone)]
pub struct SettingsSync {
    cache: Settings,
    controls: BTreeMap<SettingKey, String>,
}

impl Default for SettingsSync {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsSync {
    pub fn new() -> Self {
        let mut sync = Self {
            cache: Settings::default(),
            controls: BTreeMap::new(),
        };
        sync.reflect_all();
        sync
    }

    pub fn cache(&self) -> &Settings {
        &self.cache
    }

    /// Text currently held by a control.
    pub fn control(&self, key: SettingKey) -> &str {
        self.controls.get(&key).map(String::as_str).unwrap_or_default()
    }

    /// Replace the cache with the device's snapshot and reflect every key into
    /// its control. Uncommitted edits are discarded.
    pub fn apply_snapshot(&mut self, settings: Settings) {
        let discarded = SettingKey::ALL
            .iter()
            .filter(|key| self.control(**key) != self.cache.get(**key).to_string())
            .count();
        if discarded > 0 {
            debug!("[Settings] Snapshot discards {} uncommitted edit(s)", discarded);
        }
        self.cache = settings;
        self.reflect_all();
    }

    /// Change a control without committing it.
    pub fn stage(&mut self, key: SettingKey, text: impl Into<String>) {
        self.controls.insert(key, text.into());
    }

    /// Commit an edit of `key`: update the control, keep the frequency bounds
    /// ordered, then assemble the full object from all seven controls.
    ///
    /// The returned value is what must be sent to the device.
    pub fn commit(&mut self, key: SettingKey, text: impl Into<String>) -> Settings {
        self.stage(key, text);
        self.enforce_order(key);
        self.assemble()
    }

    /// Set both frequency controls from a preset and commit.
    pub fn apply_preset(&mut self, preset: BandPreset) -> Settings {
        let (start, end) = preset.range();
        self.stage(SettingKey::StartFreq, start.to_string());
        self.stage(SettingKey::EndFreq, end.to_string());
        self.assemble()
    }

    /// Nudge the bound opposite to `edited` by one unit when the pair would
    /// otherwise be out of order.
    fn enforce_order(&mut self, edited: SettingKey) {
        let start = self.read_control(SettingKey::StartFreq);
        let end = self.read_control(SettingKey::EndFreq);
        if start < end {
            return;
        }
        match edited {
            SettingKey::EndFreq => {
                let start = SettingKey::StartFreq.clamp_value(end - 1);
                debug!("[Settings] Nudging startFreq to {}", start);
                self.stage(SettingKey::StartFreq, start.to_string());
            }
            _ => {
                let end = SettingKey::EndFreq.clamp_value(start + 1);
                debug!("[Settings] Nudging endFreq to {}", end);
                self.stage(SettingKey::EndFreq, end.to_string());
            }
        }
    }

    /// Read a control as an integer: plain integers first, then decimals
    /// truncated toward zero. Anything else keeps the cached value.
    fn read_control(&self, key: SettingKey) -> i64 {
        let text = self.control(key).trim();
        if let Ok(value) = text.parse::<i64>() {
            return key.clamp_value(value);
        }
        match text.parse::<f64>() {
            Ok(value) if value.is_finite() => key.clamp_value(value.trunc() as i64),
            _ => {
                warn!(
                    "[Settings] Control {} holds '{}', keeping {}",
                    key,
                    text,
                    self.cache.get(key)
                );
                self.cache.get(key)
            }
        }
    }

    /// Overwrite the cache from all seven controls and return the result.
    fn assemble(&mut self) -> Settings {
        for key in SettingKey::ALL {
            let value = self.read_control(key);
            self.cache.set(key, value);
        }
        if !self.cache.is_ordered() {
            let end = SettingKey::EndFreq.clamp_value(self.cache.start_freq as i64 + 1);
            self.cache.set(SettingKey::EndFreq, end);
            let start = SettingKey::StartFreq.clamp_value(end - 1);
            self.cache.set(SettingKey::StartFreq, start);
        }
        self.reflect_all();
        self.cache.clone()
    }

    fn reflect_all(&mut self) {
        for key in SettingKey::ALL {
            self.controls.insert(key, self.cache.get(key).to_string());
        }
    }
}
