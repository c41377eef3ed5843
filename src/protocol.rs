//! Messages exchanged between the presentation layer and the session.
//!
//! `Intent`s flow down from the UI into the consumer context; `StateEvent`s
//! flow up on a broadcast bus for any number of renderers.

use std::path::PathBuf;

use crate::{
    playback_state::{PlayButtonIcon, PlaybackPhase, TrackMenuItem, VolumeIcon},
    playlist::{PlaylistView, RowIntent, RowKey},
    property::{Chapter, TrackKind},
};

/// Everything the consumer context reacts to, in arrival order.
#[derive(Debug, Clone)]
pub enum SessionInput {
    /// Engine events may be pending.
    EngineWakeup,
    Intent(Intent),
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanAxis {
    X,
    Y,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorControl {
    Brightness,
    Contrast,
    Saturation,
    Gamma,
    Hue,
}

impl ColorControl {
    pub fn option_name(self) -> &'static str {
        match self {
            ColorControl::Brightness => "brightness",
            ColorControl::Contrast => "contrast",
            ColorControl::Saturation => "saturation",
            ColorControl::Gamma => "gamma",
            ColorControl::Hue => "hue",
        }
    }
}

/// Partial subtitle style update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubtitleStyleDelta {
    pub font: Option<String>,
    pub font_size: Option<u32>,
    pub color: Option<String>,
    pub border_color: Option<String>,
    pub border_size: Option<u32>,
}

/// UI-originated requests.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Seek { forward: bool },
    /// Progress-bar click; `ratio` in `[0, 1]`.
    SeekToRatio(f64),
    SetVolume(i64),
    StepVolume { increase: bool },
    ToggleMute,
    TogglePlayPause,
    SetSpeed(i64),
    SetZoom(i64),
    SetRotation(i64),
    SetPan { axis: PanAxis, percent: i64 },
    SetCrop { horizontal: i64, vertical: i64 },
    SetColor { control: ColorControl, value: i64 },
    SetSubtitleStyle(SubtitleStyleDelta),
    SelectTrack { kind: TrackKind, id: i64 },
    SelectPlaylistRow(Option<usize>),
    PlaylistRow { key: RowKey, intent: RowIntent },
    /// Single-instance file delivery.
    AppendFiles(Vec<PathBuf>),
}

/// Core-to-UI notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum StateEvent {
    ProgressChanged {
        position_ms: i64,
        duration_ms: i64,
        text: String,
    },
    VolumeChanged {
        volume: i64,
        muted: bool,
        icon: VolumeIcon,
    },
    PlayIconChanged(PlayButtonIcon),
    PhaseChanged(PlaybackPhase),
    EndOfStream,
    TitleChanged(String),
    TracksChanged {
        audio: Vec<TrackMenuItem>,
        subtitles: Vec<TrackMenuItem>,
    },
    ChaptersChanged(Vec<Chapter>),
    PlaylistChanged(PlaylistView),
    /// Rotation input was normalized; the control should show this value.
    RotationNormalized(i64),
    EngineShutdown,
}
