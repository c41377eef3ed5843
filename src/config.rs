//! Persistent application configuration model and defaults.

use crate::playback_state::MAX_VOLUME;

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Transport and volume preferences.
    pub playback: PlaybackConfig,
    #[serde(default)]
    /// Subtitle appearance applied as engine options.
    pub subtitles: SubtitleConfig,
    #[serde(default)]
    /// How the playback engine process is launched.
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_seek_step_secs")]
    pub seek_step_secs: u32,
    #[serde(default = "default_volume_step")]
    pub volume_step: u32,
    /// Last volume, restored at startup.
    #[serde(default = "default_volume")]
    pub volume: i64,
    #[serde(default = "default_speed_percent")]
    pub speed_percent: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct SubtitleConfig {
    #[serde(default = "default_subtitle_font")]
    pub font: String,
    #[serde(default = "default_subtitle_font_size")]
    pub font_size: u32,
    /// `#AARRGGBB`
    #[serde(default = "default_subtitle_color")]
    pub color: String,
    /// `#AARRGGBB`
    #[serde(default = "default_subtitle_border_color")]
    pub border_color: String,
    #[serde(default = "default_subtitle_border_size")]
    pub border_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct EngineConfig {
    #[serde(default = "default_engine_binary")]
    pub binary: String,
    /// Overrides the IPC socket path; a per-process temp path is used otherwise.
    #[serde(default)]
    pub ipc_socket: Option<String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            seek_step_secs: default_seek_step_secs(),
            volume_step: default_volume_step(),
            volume: default_volume(),
            speed_percent: default_speed_percent(),
        }
    }
}

impl Default for SubtitleConfig {
    fn default() -> Self {
        Self {
            font: default_subtitle_font(),
            font_size: default_subtitle_font_size(),
            color: default_subtitle_color(),
            border_color: default_subtitle_border_color(),
            border_size: default_subtitle_border_size(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: default_engine_binary(),
            ipc_socket: None,
            extra_args: Vec::new(),
            startup_timeout_ms: default_startup_timeout_ms(),
        }
    }
}

fn default_seek_step_secs() -> u32 {
    10
}

fn default_volume_step() -> u32 {
    5
}

fn default_volume() -> i64 {
    70
}

fn default_speed_percent() -> i64 {
    100
}

fn default_subtitle_font() -> String {
    "sans-serif".to_string()
}

fn default_subtitle_font_size() -> u32 {
    55
}

fn default_subtitle_color() -> String {
    "#FFFFFF00".to_string()
}

fn default_subtitle_border_color() -> String {
    "#FF000000".to_string()
}

fn default_subtitle_border_size() -> u32 {
    3
}

fn default_engine_binary() -> String {
    "mpv".to_string()
}

fn default_startup_timeout_ms() -> u64 {
    5_000
}

pub const SPEED_PERCENT_RANGE: (i64, i64) = (10, 500);

/// `#AARRGGBB` or `#RRGGBB`.
pub fn is_valid_color(color: &str) -> bool {
    let Some(hex) = color.strip_prefix('#') else {
        return false;
    };
    (hex.len() == 6 || hex.len() == 8) && hex.chars().all(|c| c.is_ascii_hexdigit())
}

/// Clamps every numeric field into its supported range and replaces
/// unusable values with defaults.
pub fn sanitize_config(config: Config) -> Config {
    let subtitles = config.subtitles;
    Config {
        playback: PlaybackConfig {
            seek_step_secs: config.playback.seek_step_secs.clamp(1, 100),
            volume_step: config.playback.volume_step.clamp(1, 20),
            volume: config.playback.volume.clamp(0, MAX_VOLUME),
            speed_percent: config
                .playback
                .speed_percent
                .clamp(SPEED_PERCENT_RANGE.0, SPEED_PERCENT_RANGE.1),
        },
        subtitles: SubtitleConfig {
            font: if subtitles.font.trim().is_empty() {
                default_subtitle_font()
            } else {
                subtitles.font
            },
            font_size: subtitles.font_size.clamp(10, 100),
            color: if is_valid_color(&subtitles.color) {
                subtitles.color
            } else {
                default_subtitle_color()
            },
            border_color: if is_valid_color(&subtitles.border_color) {
                subtitles.border_color
            } else {
                default_subtitle_border_color()
            },
            border_size: subtitles.border_size.min(10),
        },
        engine: EngineConfig {
            startup_timeout_ms: config.engine.startup_timeout_ms.clamp(500, 60_000),
            ..config.engine
        },
    }
}
