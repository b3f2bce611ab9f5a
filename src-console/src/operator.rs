//! Operator commands typed at the console prompt.

use std::io::{self, BufRead};
use std::str::FromStr;
use std::thread;

use rfscan_common::wire::DeviceCommand;
use rfscan_common::{BandPreset, SettingKey};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::console::ConsoleInput;
use crate::presentation::{Colorscale, View};

/// One operator action, already validated.
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorAction {
    /// Forward a device command (`pause`, `resume`, `clear`, `reset`, `reinit`)
    Device(DeviceCommand),
    /// Edit a control and commit it
    Set { key: SettingKey, value: String },
    /// Edit a control without committing
    Edit { key: SettingKey, value: String },
    Preset(BandPreset),
    AudioStart,
    AudioStop,
    Volume(f32),
    Threshold(u32),
    Tones(usize),
    View(View),
    Colorscale(Colorscale),
    Status,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq)]
pub enum ParseActionError {
    #[error("empty command")]
    Empty,

    #[error("unknown command '{0}', type 'help'")]
    Unknown(String),

    #[error("'{command}' needs {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },

    #[error("'{command}': {reason}")]
    InvalidArgument {
        command: &'static str,
        reason: String,
    },
}

/// Parse one input line.
pub fn parse_action(line: &str) -> Result<OperatorAction, ParseActionError> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Err(ParseActionError::Empty);
    };
    let head = head.to_lowercase();

    if let Ok(command) = DeviceCommand::from_str(&head) {
        return Ok(OperatorAction::Device(command));
    }

    match head.as_str() {
        "set" | "edit" => {
            let command = if head == "set" { "set" } else { "edit" };
            let key = words.next().ok_or(ParseActionError::MissingArgument {
                command,
                argument: "a setting name",
            })?;
            let key = SettingKey::from_str(key)
                .map_err(|reason| ParseActionError::InvalidArgument { command, reason })?;
            let value = words.collect::<Vec<_>>().join(" ");
            if value.is_empty() {
                return Err(ParseActionError::MissingArgument {
                    command,
                    argument: "a value",
                });
            }
            Ok(if command == "set" {
                OperatorAction::Set { key, value }
            } else {
                OperatorAction::Edit { key, value }
            })
        }
        "preset" => {
            let name = words.collect::<Vec<_>>().join(" ");
            if name.is_empty() {
                return Err(ParseActionError::MissingArgument {
                    command: "preset",
                    argument: "a band name",
                });
            }
            BandPreset::from_str(&name)
                .map(OperatorAction::Preset)
                .map_err(|reason| ParseActionError::InvalidArgument {
                    command: "preset",
                    reason,
                })
        }
        "audio" => match words.next().map(str::to_lowercase).as_deref() {
            Some("start") | Some("on") => Ok(OperatorAction::AudioStart),
            Some("stop") | Some("off") => Ok(OperatorAction::AudioStop),
            Some(other) => Err(ParseActionError::InvalidArgument {
                command: "audio",
                reason: format!("expected start or stop, got '{}'", other),
            }),
            None => Err(ParseActionError::MissingArgument {
                command: "audio",
                argument: "start or stop",
            }),
        },
        "volume" => number(words.next(), "volume", "a level in dB").map(OperatorAction::Volume),
        "threshold" => number(words.next(), "threshold", "a count").map(OperatorAction::Threshold),
        "tones" => number(words.next(), "tones", "a count").map(OperatorAction::Tones),
        "view" => parsed(words.next(), "view", "spectrum or waterfall").map(OperatorAction::View),
        "colorscale" => {
            parsed(words.next(), "colorscale", "a colorscale name").map(OperatorAction::Colorscale)
        }
        "status" => Ok(OperatorAction::Status),
        "help" | "?" => Ok(OperatorAction::Help),
        "quit" | "exit" => Ok(OperatorAction::Quit),
        _ => Err(ParseActionError::Unknown(head)),
    }
}

fn number<T: FromStr>(
    word: Option<&str>,
    command: &'static str,
    argument: &'static str,
) -> Result<T, ParseActionError> {
    let word = word.ok_or(ParseActionError::MissingArgument { command, argument })?;
    word.parse().map_err(|_| ParseActionError::InvalidArgument {
        command,
        reason: format!("'{}' is not a number", word),
    })
}

fn parsed<T: FromStr<Err = String>>(
    word: Option<&str>,
    command: &'static str,
    argument: &'static str,
) -> Result<T, ParseActionError> {
    let word = word.ok_or(ParseActionError::MissingArgument { command, argument })?;
    word.parse()
        .map_err(|reason| ParseActionError::InvalidArgument { command, reason })
}

/// Text printed for `help`.
pub fn help_text() -> String {
    let settings: Vec<&str> = SettingKey::ALL.iter().map(|key| key.wire_name()).collect();
    let presets: Vec<&str> = BandPreset::ALL.iter().map(|preset| preset.name()).collect();
    let scales: Vec<&str> = Colorscale::ALL.iter().map(|scale| scale.name()).collect();
    format!(
        "Commands:
  pause | resume | clear | reset | reinit   device commands
  set <setting> <value>                     change a setting and send it
  edit <setting> <value>                    change a control without sending
  preset <band>                             {}
  audio start|stop                          sonification on/off
  volume <dB> | threshold <n> | tones <n>   sonifier parameters
  view spectrum|waterfall                   plot view
  colorscale <name>                         {}
  status                                    show console state
  quit
Settings: {}",
        presets.join(", "),
        scales.join(", "),
        settings.join(", ")
    )
}

/// Forward lines from a blocking reader (normally stdin) to the console.
///
/// Reads on its own thread: a read still pending at exit does not hold up
/// runtime shutdown.
pub fn spawn_line_reader<R>(
    reader: R,
    tx: mpsc::UnboundedSender<ConsoleInput>,
) -> io::Result<thread::JoinHandle<()>>
where
    R: BufRead + Send + 'static,
{
    thread::Builder::new()
        .name("operator-input".to_string())
        .spawn(move || {
            for line in reader.lines() {
                match line {
                    Ok(line) => {
                        if tx.send(ConsoleInput::Line(line)).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        error!("[Operator] Failed to read input: {}", e);
                        return;
                    }
                }
            }
            info!("[Operator] Input closed, press Ctrl-C to quit");
        })
}
