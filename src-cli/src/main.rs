//! rfscan command line interface
//!
//! One-shot commands against a scanner: send a device command, read or change
//! settings, stream sweep statistics or list the current peaks.

mod client;

use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use rfscan_common::wire::{DeviceCommand, InboundMessage, OutboundMessage, DEFAULT_DEVICE_ADDR};
use rfscan_common::{BandPreset, SettingKey, Settings, StatusKind};
use rfscan_console::settings_sync::SettingsSync;
use rfscan_console::sonifier::{
    find_peaks, frequency_to_pitch, note_name, strength_to_velocity, DEFAULT_MAX_TONES,
    DEFAULT_THRESHOLD,
};

use client::Client;

#[derive(Parser)]
#[command(name = "rfscan")]
#[command(version)]
#[command(about = "2.4 GHz spectrum scanner CLI", long_about = None)]
struct Cli {
    /// Device address (host:port)
    #[arg(short, long, default_value = DEFAULT_DEVICE_ADDR)]
    device: String,

    /// Output format
    #[arg(long, default_value = "text")]
    format: OutputFormat,

    /// Seconds to wait for the device
    #[arg(long, default_value_t = 5)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a device command (pause, resume, clear, reset, reinit)
    Command {
        name: String,
    },

    /// Show the device settings
    Settings,

    /// Change device settings
    Set {
        /// Band preset applied before the individual values
        #[arg(short, long)]
        preset: Option<String>,

        #[arg(long)]
        start_freq: Option<String>,

        #[arg(long)]
        end_freq: Option<String>,

        #[arg(long)]
        power_level: Option<String>,

        #[arg(long)]
        data_rate: Option<String>,

        #[arg(long)]
        scan_speed: Option<String>,

        #[arg(long)]
        sensitivity: Option<String>,

        #[arg(long)]
        averaging: Option<String>,
    },

    /// Stream sweep statistics
    Watch {
        /// Stop after this many frames
        #[arg(short, long)]
        count: Option<usize>,
    },

    /// Show the peaks the sonifier would play for the next frame
    Peaks {
        #[arg(short, long, default_value_t = DEFAULT_THRESHOLD)]
        threshold: u32,

        #[arg(short, long, default_value_t = DEFAULT_MAX_TONES)]
        max: usize,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let json = matches!(cli.format, OutputFormat::Json);
    let mut client = Client::new(cli.device.clone(), Duration::from_secs(cli.timeout));
    client
        .connect()
        .await
        .map_err(|e| format!("Failed to connect to {}: {}", cli.device, e))?;

    match cli.command {
        Commands::Command { name } => {
            let command: DeviceCommand = name.parse()?;
            client
                .send(&OutboundMessage::Command { command })
                .await
                .map_err(|e| e.to_string())?;

            if command == DeviceCommand::Reinit {
                let status = client.next_reinit_status().await.map_err(|e| e.to_string())?;
                if json {
                    println!("{}", serde_json::json!({ "status": status }));
                } else {
                    let message = format!("Re-init {}", status);
                    match StatusKind::from_status(&status) {
                        StatusKind::Success => println!("{}", message.green().bold()),
                        StatusKind::Failure => println!("{}", message.red().bold()),
                        StatusKind::Info => println!("{}", message.cyan()),
                    }
                }
            } else if !json {
                println!("Sent {}", command.to_string().green());
            }
        }

        Commands::Settings => {
            let settings = client.next_settings().await.map_err(|e| e.to_string())?;
            print_settings(&settings, json)?;
        }

        Commands::Set {
            preset,
            start_freq,
            end_freq,
            power_level,
            data_rate,
            scan_speed,
            sensitivity,
            averaging,
        } => {
            let edits = [
                (SettingKey::StartFreq, start_freq),
                (SettingKey::EndFreq, end_freq),
                (SettingKey::PowerLevel, power_level),
                (SettingKey::DataRate, data_rate),
                (SettingKey::ScanSpeed, scan_speed),
                (SettingKey::Sensitivity, sensitivity),
                (SettingKey::Averaging, averaging),
            ];
            if preset.is_none() && edits.iter().all(|(_, value)| value.is_none()) {
                return Err("Nothing to set. See 'rfscan set --help'.".into());
            }

            let mut sync = SettingsSync::new();
            sync.apply_snapshot(client.next_settings().await.map_err(|e| e.to_string())?);

            let mut settings = sync.cache().clone();
            if let Some(preset) = preset {
                let preset: BandPreset = preset.parse()?;
                settings = sync.apply_preset(preset);
            }
            for (key, value) in edits {
                if let Some(value) = value {
                    settings = sync.commit(key, value);
                }
            }

            client
                .send(&OutboundMessage::Settings {
                    settings: settings.clone(),
                })
                .await
                .map_err(|e| e.to_string())?;
            print_settings(&settings, json)?;
        }

        Commands::Watch { count } => {
            let mut seen = 0usize;
            while count.map_or(true, |count| seen < count) {
                let message = client.next_message().await.map_err(|e| e.to_string())?;
                if json {
                    println!(
                        "{}",
                        serde_json::to_string(&message).map_err(|e| e.to_string())?
                    );
                }
                match message {
                    InboundMessage::Spectrum { data, statistics } => {
                        seen += 1;
                        if json {
                            continue;
                        }
                        let stats = statistics.unwrap_or_default();
                        let peak = stats
                            .peak_label()
                            .map(|label| format!("{} ({})", label, stats.peak_value))
                            .unwrap_or_else(|| "--".to_string());
                        println!(
                            "frame {:>5}  total {:>6}  peak {}",
                            seen,
                            data.total().to_string().cyan(),
                            peak.green()
                        );
                    }
                    InboundMessage::Settings { settings } if !json => {
                        println!("{}", "Settings changed".yellow());
                        print_settings(&settings, false)?;
                    }
                    InboundMessage::ReinitStatus { status } if !json => {
                        println!("{}", format!("Re-init {}", status).cyan());
                    }
                    _ => {}
                }
            }
        }

        Commands::Peaks { threshold, max } => {
            let (frame, _) = client.next_frame().await.map_err(|e| e.to_string())?;
            let peaks = find_peaks(frame.counts(), threshold, max);

            if json {
                let rows: Vec<serde_json::Value> = peaks
                    .iter()
                    .map(|peak| {
                        let pitch = frequency_to_pitch(peak.frequency() as f32);
                        serde_json::json!({
                            "index": peak.index,
                            "freq": peak.frequency(),
                            "value": peak.value,
                            "pitch": pitch,
                            "note": note_name(pitch),
                            "velocity": strength_to_velocity(peak.value),
                        })
                    })
                    .collect();
                println!(
                    "{}",
                    serde_json::to_string_pretty(&rows).map_err(|e| e.to_string())?
                );
            } else if peaks.is_empty() {
                println!("No bins at or above {}", threshold);
            } else {
                for peak in peaks {
                    let pitch = frequency_to_pitch(peak.frequency() as f32);
                    println!(
                        "  {} MHz  {:>3}  {:<4} vel {:.2}",
                        peak.frequency().to_string().bold(),
                        peak.value,
                        note_name(pitch).magenta(),
                        strength_to_velocity(peak.value)
                    );
                }
            }
        }
    }

    Ok(())
}

fn print_settings(settings: &Settings, json: bool) -> Result<(), String> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(settings).map_err(|e| e.to_string())?
        );
        return Ok(());
    }
    for key in SettingKey::ALL {
        println!("  {:<12} {}", key.to_string(), settings.display_value(key).green());
    }
    for (key, value) in &settings.extra {
        println!("  {:<12} {}", key, value.to_string().dimmed());
    }
    Ok(())
}
