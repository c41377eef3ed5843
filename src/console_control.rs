//! Line-oriented control surface standing in for the windowed UI.
//!
//! One thread reads commands from stdin and forwards them as intents; another
//! renders state events. The renderer remembers the keys of the rows it last
//! showed so that row commands carry the identity the user actually saw.

use std::{
    io::BufRead,
    path::PathBuf,
    sync::{mpsc::Sender, Arc, Mutex},
    thread::{self, JoinHandle},
};

use log::{debug, error, warn};
use tokio::sync::broadcast;

use crate::{
    playlist::{RowIntent, RowKey},
    property::TrackKind,
    protocol::{ColorControl, Intent, PanAxis, SessionInput, StateEvent, SubtitleStyleDelta},
};

pub const HELP: &str = "\
commands:
  play                      toggle play/pause
  seek + | seek -           seek one step
  goto <percent>            jump to a position
  vol <n> | vol + | vol -   set or step volume
  mute                      toggle mute
  speed <percent>           playback speed
  zoom <percent>            video zoom
  rotate <degrees>          video rotation
  pan x|y <percent>         video pan
  crop <h%> <v%>            crop margins
  color <control> <value>   brightness|contrast|saturation|gamma|hue
  sub font|size|color|border-color|border-size <value>
  audio <id> | subs <id>    select a track
  select <row> | select none
  up|down|remove|playrow <row>
  open <path>               append a file or folder
  quit";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Intent(Intent),
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command '{0}'")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
}

/// Row keys as last rendered.
pub type RenderedRows = Arc<Mutex<Vec<RowKey>>>;

fn number(value: Option<&str>, usage: &'static str) -> Result<i64, ParseError> {
    value
        .and_then(|value| value.parse::<i64>().ok())
        .ok_or(ParseError::Usage(usage))
}

fn row_key(value: Option<&str>, rows: &[RowKey], usage: &'static str) -> Result<RowKey, ParseError> {
    let row = value
        .and_then(|value| value.parse::<usize>().ok())
        .ok_or(ParseError::Usage(usage))?;
    Ok(rows.get(row).copied().unwrap_or(RowKey {
        index: row,
        id: None,
    }))
}

fn step(value: Option<&str>, usage: &'static str) -> Result<bool, ParseError> {
    match value {
        Some("+") => Ok(true),
        Some("-") => Ok(false),
        _ => Err(ParseError::Usage(usage)),
    }
}

/// Parses one input line. `rows` are the keys of the last rendered playlist.
pub fn parse_command(line: &str, rows: &[RowKey]) -> Result<ConsoleCommand, ParseError> {
    let line = line.trim();
    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };
    let mut args = rest.split_whitespace();
    let first = args.next();
    let second = args.next();

    let intent = match command {
        "" => return Err(ParseError::Empty),
        "help" | "?" => return Ok(ConsoleCommand::Help),
        "quit" | "q" => return Ok(ConsoleCommand::Quit),
        "play" | "pause" | "p" => Intent::TogglePlayPause,
        "seek" => Intent::Seek {
            forward: step(first, "seek + | seek -")?,
        },
        "goto" => {
            let percent = first
                .and_then(|value| value.parse::<f64>().ok())
                .ok_or(ParseError::Usage("goto <percent>"))?;
            Intent::SeekToRatio(percent / 100.0)
        }
        "vol" => match first {
            Some("+") | Some("-") => Intent::StepVolume {
                increase: step(first, "vol <n> | vol + | vol -")?,
            },
            _ => Intent::SetVolume(number(first, "vol <n> | vol + | vol -")?),
        },
        "mute" => Intent::ToggleMute,
        "speed" => Intent::SetSpeed(number(first, "speed <percent>")?),
        "zoom" => Intent::SetZoom(number(first, "zoom <percent>")?),
        "rotate" => Intent::SetRotation(number(first, "rotate <degrees>")?),
        "pan" => {
            let axis = match first {
                Some("x") => PanAxis::X,
                Some("y") => PanAxis::Y,
                _ => return Err(ParseError::Usage("pan x|y <percent>")),
            };
            Intent::SetPan {
                axis,
                percent: number(second, "pan x|y <percent>")?,
            }
        }
        "crop" => Intent::SetCrop {
            horizontal: number(first, "crop <h%> <v%>")?,
            vertical: number(second, "crop <h%> <v%>")?,
        },
        "color" => {
            let control = match first {
                Some("brightness") => ColorControl::Brightness,
                Some("contrast") => ColorControl::Contrast,
                Some("saturation") => ColorControl::Saturation,
                Some("gamma") => ColorControl::Gamma,
                Some("hue") => ColorControl::Hue,
                _ => return Err(ParseError::Usage("color <control> <value>")),
            };
            Intent::SetColor {
                control,
                value: number(second, "color <control> <value>")?,
            }
        }
        "sub" => parse_subtitle_style(first, rest)?,
        "audio" => Intent::SelectTrack {
            kind: TrackKind::Audio,
            id: number(first, "audio <id>")?,
        },
        "subs" => Intent::SelectTrack {
            kind: TrackKind::Subtitle,
            id: number(first, "subs <id>")?,
        },
        "select" => match first {
            Some("none") => Intent::SelectPlaylistRow(None),
            _ => Intent::SelectPlaylistRow(Some(
                row_key(first, rows, "select <row> | select none")?.index,
            )),
        },
        "up" | "down" | "remove" | "playrow" => {
            let intent = match command {
                "up" => RowIntent::MoveUp,
                "down" => RowIntent::MoveDown,
                "remove" => RowIntent::Remove,
                _ => RowIntent::Play,
            };
            Intent::PlaylistRow {
                key: row_key(first, rows, "up|down|remove|playrow <row>")?,
                intent,
            }
        }
        "open" if !rest.is_empty() => Intent::AppendFiles(vec![PathBuf::from(rest)]),
        "open" => return Err(ParseError::Usage("open <path>")),
        other => return Err(ParseError::Unknown(other.to_string())),
    };
    Ok(ConsoleCommand::Intent(intent))
}

fn parse_subtitle_style(field: Option<&str>, rest: &str) -> Result<Intent, ParseError> {
    const USAGE: &str = "sub font|size|color|border-color|border-size <value>";
    let value = field
        .and_then(|field| rest.strip_prefix(field))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(ParseError::Usage(USAGE))?;
    let size = || value.parse::<u32>().map_err(|_| ParseError::Usage(USAGE));

    let mut delta = SubtitleStyleDelta::default();
    match field {
        Some("font") => delta.font = Some(value.to_string()),
        Some("size") => delta.font_size = Some(size()?),
        Some("color") => delta.color = Some(value.to_string()),
        Some("border-color") => delta.border_color = Some(value.to_string()),
        Some("border-size") => delta.border_size = Some(size()?),
        _ => return Err(ParseError::Usage(USAGE)),
    }
    Ok(Intent::SetSubtitleStyle(delta))
}

/// Reads stdin until EOF or `quit`, forwarding intents. EOF also quits.
pub fn spawn_stdin_forwarder(
    input_sender: Sender<SessionInput>,
    rows: RenderedRows,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("console-input".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        error!("Failed to read console input: {}", err);
                        break;
                    }
                };
                let parsed = {
                    let rows = rows.lock().expect("rendered rows lock poisoned");
                    parse_command(&line, &rows)
                };
                match parsed {
                    Ok(ConsoleCommand::Intent(intent)) => {
                        if input_sender.send(SessionInput::Intent(intent)).is_err() {
                            return;
                        }
                    }
                    Ok(ConsoleCommand::Help) => println!("{}", HELP),
                    Ok(ConsoleCommand::Quit) => break,
                    Err(ParseError::Empty) => {}
                    Err(err) => warn!("{}", err),
                }
            }
            let _ = input_sender.send(SessionInput::Quit);
        })
}

/// One-line rendering of a state event; `None` for events not worth a line.
pub fn describe_state_event(event: &StateEvent) -> Option<String> {
    match event {
        StateEvent::ProgressChanged { .. } => None,
        StateEvent::VolumeChanged { volume, muted, icon } => Some(format!(
            "volume {}{} ({:?})",
            volume,
            if *muted { " muted" } else { "" },
            icon
        )),
        StateEvent::PlayIconChanged(icon) => Some(format!("play button: {:?}", icon)),
        StateEvent::PhaseChanged(phase) => Some(format!("phase: {:?}", phase)),
        StateEvent::EndOfStream => Some("end of stream".to_string()),
        StateEvent::TitleChanged(title) => Some(format!("title: {}", title)),
        StateEvent::TracksChanged { audio, subtitles } => {
            let labels = |items: &[crate::playback_state::TrackMenuItem]| {
                items
                    .iter()
                    .map(|item| item.label.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            Some(format!(
                "audio: {} | subtitles: {}",
                labels(audio),
                labels(subtitles)
            ))
        }
        StateEvent::ChaptersChanged(chapters) => Some(format!("{} chapters", chapters.len())),
        StateEvent::PlaylistChanged(view) => {
            let mut text = String::from("playlist:");
            for (row, entry) in view.rows.iter().enumerate() {
                let marker = if entry.is_current { '>' } else { ' ' };
                let selected = if view.selected == Some(row) { '*' } else { ' ' };
                text.push_str(&format!("\n {}{}{:>3} {}", marker, selected, row, entry.title));
            }
            if view.rows.is_empty() {
                text.push_str(" (empty)");
            }
            Some(text)
        }
        StateEvent::RotationNormalized(degrees) => Some(format!("rotation: {}", degrees)),
        StateEvent::EngineShutdown => Some("engine shut down".to_string()),
    }
}

/// Prints state events until the bus closes, keeping `rows` current.
pub fn spawn_state_printer(
    mut bus_consumer: broadcast::Receiver<StateEvent>,
    rows: RenderedRows,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("console-output".to_string())
        .spawn(move || loop {
            match bus_consumer.blocking_recv() {
                Ok(event) => {
                    if let StateEvent::PlaylistChanged(view) = &event {
                        *rows.lock().expect("rendered rows lock poisoned") =
                            view.rows.iter().map(|row| row.key).collect();
                    }
                    if let StateEvent::ProgressChanged { text, .. } = &event {
                        debug!("progress {}", text);
                    }
                    if let Some(line) = describe_state_event(&event) {
                        println!("{}", line);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Console renderer skipped {} state events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        })
}
