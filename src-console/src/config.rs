//! Console configuration file.
//!
//! Stored as JSON at `<config dir>/rfscan/console.json`. Missing keys take
//! their defaults; command-line flags override whatever the file says.

use std::path::{Path, PathBuf};

use rfscan_common::wire::DEFAULT_DEVICE_ADDR;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::presentation::Colorscale;
use crate::sonifier::{
    SonifierParams, DEFAULT_MAX_TONES, DEFAULT_TEMPO_BPM, DEFAULT_THRESHOLD, DEFAULT_VOLUME_DB,
};

const CONFIG_FILE: &str = "console.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub threshold: u32,
    pub max_tones: usize,
    pub volume_db: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            max_tones: DEFAULT_MAX_TONES,
            volume_db: DEFAULT_VOLUME_DB,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Device address as `host:port`
    pub device: String,
    pub tempo_bpm: f32,
    pub audio: AudioConfig,
    pub colorscale: Colorscale,
    /// Print a text plot row for every frame
    pub plot: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE_ADDR.to_string(),
            tempo_bpm: DEFAULT_TEMPO_BPM,
            audio: AudioConfig::default(),
            colorscale: Colorscale::default(),
            plot: false,
        }
    }
}

/// Where the config file lives on this platform.
pub fn default_path() -> PathBuf {
    directories::BaseDirs::new()
        .map(|d| d.config_dir().join("rfscan"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_FILE)
}

impl ConsoleConfig {
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Load the file, falling back to defaults when it is missing or broken.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load_from(path) {
            Ok(config) => {
                info!("[Config] Loaded {}", path.display());
                config
            }
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("[Config] No config at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                warn!("[Config] Ignoring {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn sonifier_params(&self) -> SonifierParams {
        SonifierParams {
            threshold: self.audio.threshold,
            max_tones: self.audio.max_tones,
            volume_db: self.audio.volume_db,
        }
        .clamped()
    }
}
