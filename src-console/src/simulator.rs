//! In-process stand-in for the scanner.
//!
//! Speaks the device side of the wire protocol over a memory link: streams
//! synthetic sweeps, echoes settings and answers commands.

use std::time::Duration;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rfscan_common::wire::{decode_line, write_json, DeviceCommand, InboundMessage, OutboundMessage};
use rfscan_common::{bin_frequency, Settings, SpectrumFrame, Statistics, BIN_COUNT};
use tokio::io::{AsyncBufReadExt, AsyncWrite, BufReader};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::connection::MemoryDevice;

/// Time between synthetic sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// WiFi channel 6 centre
const WIFI_CENTRE_MHZ: i32 = 2437;
const WIFI_HALF_WIDTH_MHZ: i32 = 11;
const BLUETOOTH_LOW_MHZ: u16 = 2402;
const BLUETOOTH_CHANNELS: u16 = 79;

/// Synthetic scanner state.
pub struct Simulator {
    device: MemoryDevice,
    settings: Settings,
    scanning: bool,
    rng: SmallRng,
    average: Vec<f32>,
}

impl Simulator {
    pub fn new(device: MemoryDevice, seed: u64) -> Self {
        Self {
            device,
            settings: Settings::default(),
            scanning: true,
            rng: SmallRng::seed_from_u64(seed),
            average: vec![0.0; BIN_COUNT],
        }
    }

    /// Serve sessions one after another until the console side goes away.
    pub async fn run(mut self) {
        info!("[Simulator] Device simulator running");
        while let Some(stream) = self.device.accept().await {
            info!("[Simulator] Console connected");
            let (read, mut write) = tokio::io::split(stream);
            if let Err(e) = self.serve(BufReader::new(read).lines(), &mut write).await {
                debug!("[Simulator] Session ended: {}", e);
            }
            info!("[Simulator] Console disconnected");
        }
    }

    async fn serve<R, W>(
        &mut self,
        mut lines: tokio::io::Lines<R>,
        write: &mut W,
    ) -> Result<(), rfscan_common::WireError>
    where
        R: tokio::io::AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.send_settings(write).await?;
        let mut sweep = interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = sweep.tick() => {
                    if self.scanning {
                        let (data, statistics) = self.next_sweep();
                        let message = InboundMessage::Spectrum {
                            data,
                            statistics: Some(statistics),
                        };
                        write_json(write, &message).await?;
                    }
                }
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        return Ok(());
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match decode_line::<OutboundMessage>(&line) {
                        Ok(message) => self.handle(message, write).await?,
                        Err(e) => warn!("[Simulator] Ignoring malformed message: {}", e),
                    }
                }
            }
        }
    }

    async fn handle<W>(
        &mut self,
        message: OutboundMessage,
        write: &mut W,
    ) -> Result<(), rfscan_common::WireError>
    where
        W: AsyncWrite + Unpin,
    {
        match message {
            OutboundMessage::Settings { settings } => {
                debug!(
                    "[Simulator] Settings {}-{} MHz",
                    settings.start_freq, settings.end_freq
                );
                self.settings = settings;
                self.send_settings(write).await?;
            }
            OutboundMessage::Command { command } => {
                debug!("[Simulator] Command {}", command);
                match command {
                    DeviceCommand::Pause => self.scanning = false,
                    DeviceCommand::Resume => self.scanning = true,
                    DeviceCommand::Clear => self.clear(),
                    DeviceCommand::Reset => {
                        self.settings = Settings::default();
                        self.clear();
                        self.send_settings(write).await?;
                    }
                    DeviceCommand::Reinit => {
                        self.clear();
                        self.scanning = true;
                        let status = InboundMessage::ReinitStatus {
                            status: "success".to_string(),
                        };
                        write_json(write, &status).await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn send_settings<W>(&mut self, write: &mut W) -> Result<(), rfscan_common::WireError>
    where
        W: AsyncWrite + Unpin,
    {
        let snapshot = InboundMessage::Settings {
            settings: self.settings.clone(),
        };
        write_json(write, &snapshot).await
    }

    fn clear(&mut self) {
        self.average.iter_mut().for_each(|v| *v = 0.0);
    }

    /// One sweep over the configured range.
    pub fn next_sweep(&mut self) -> (SpectrumFrame, Statistics) {
        let gain = self.settings.sensitivity as f32 / 50.0;
        let hop = bin_index(BLUETOOTH_LOW_MHZ + self.rng.gen_range(0..BLUETOOTH_CHANNELS));
        let start = self.settings.start_freq;
        let end = self.settings.end_freq;

        let mut raw = vec![0.0f32; BIN_COUNT];
        for (i, value) in raw.iter_mut().enumerate() {
            let freq = bin_frequency(i);
            if freq < start || freq > end {
                continue;
            }
            let offset = (freq as i32 - WIFI_CENTRE_MHZ).abs();
            let wifi = if offset <= WIFI_HALF_WIDTH_MHZ {
                18.0 * (1.0 - offset as f32 / WIFI_HALF_WIDTH_MHZ as f32)
            } else {
                0.0
            };
            let noise = self.rng.gen_range(0..3) as f32;
            let burst = if Some(i) == hop {
                12.0 + self.rng.gen_range(0..18) as f32
            } else {
                0.0
            };
            *value = (wifi + noise + burst) * gain;
        }

        let counts: Vec<u32> = if self.settings.averaging == 0 {
            raw.iter().map(|v| v.round() as u32).collect()
        } else {
            let weight = 1.0 / (self.settings.averaging as f32 + 1.0);
            self.average
                .iter_mut()
                .zip(&raw)
                .map(|(avg, v)| {
                    *avg += (v - *avg) * weight;
                    avg.round() as u32
                })
                .collect()
        };

        let (peak_index, peak_value) = counts
            .iter()
            .copied()
            .enumerate()
            .max_by_key(|(i, v)| (*v, std::cmp::Reverse(*i)))
            .unwrap_or((0, 0));
        let statistics = Statistics {
            total: counts.iter().map(|v| *v as u64).sum(),
            peak_freq: bin_frequency(peak_index),
            peak_value,
        };
        let frame = SpectrumFrame::new(counts).unwrap_or_else(|_| SpectrumFrame::silent());
        (frame, statistics)
    }
}

fn bin_index(freq: u16) -> Option<usize> {
    let index = freq.checked_sub(rfscan_common::BASE_FREQ_MHZ)? as usize;
    (index < BIN_COUNT).then_some(index)
}
