//! Translates UI intents into engine property sets and commands.
//!
//! Every call is fire-and-forget: values are clamped before they leave the
//! core and engine failures are only logged by [`EngineHandle`].

use std::path::PathBuf;

use log::{debug, info};

use crate::{
    config::{is_valid_color, PlaybackConfig, SubtitleConfig, SPEED_PERCENT_RANGE},
    engine::{EngineHandle, EngineNode},
    media_file_discovery::{expand_delivered_paths, MediaFileKind},
    playback_state::{PlaybackStateModel, MAX_VOLUME},
    playlist::PlaylistCommand,
    property::{TrackKind, MUTE, PAUSE, TIME_POS, VOLUME},
    protocol::{ColorControl, PanAxis, SubtitleStyleDelta},
};

pub const ZOOM_PERCENT_RANGE: (i64, i64) = (10, 900);
pub const PAN_PERCENT_RANGE: (i64, i64) = (-99, 99);
pub const COLOR_RANGE: (i64, i64) = (-99, 100);

const PLAYLIST_POS: &str = "playlist-pos";
const PLAYLIST_COUNT: &str = "playlist-count";
const TIME_REMAINING: &str = "time-remaining";
const VIDEO_PARAMS: &str = "video-params";
const VIDEO_CROP: &str = "video-crop";

pub fn clamp_volume(volume: i64) -> i64 {
    volume.clamp(0, MAX_VOLUME)
}

/// Maps any integer onto `[0, 360)`.
pub fn normalize_rotation(degrees: i64) -> i64 {
    degrees.rem_euclid(360)
}

/// `WxH+X+Y` geometry removing `horizontal`/`vertical` percent of the display
/// size, split evenly between both edges. At least one pixel always remains.
/// Returns `None` when the display size is unknown.
pub fn crop_geometry(
    display_width: i64,
    display_height: i64,
    horizontal: i64,
    vertical: i64,
) -> Option<String> {
    if display_width <= 0 || display_height <= 0 {
        return None;
    }
    let margin = |size: i64, percent: i64| {
        let requested = size.saturating_mul(percent.clamp(0, 100)) / 100 / 2;
        requested.min((size - 1) / 2)
    };
    let x = margin(display_width, horizontal);
    let y = margin(display_height, vertical);
    Some(format!(
        "{}x{}+{}+{}",
        display_width - 2 * x,
        display_height - 2 * y,
        x,
        y
    ))
}

fn seconds(ms: i64) -> EngineNode {
    EngineNode::Double(ms as f64 / 1000.0)
}

#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    seek_step_ms: i64,
    volume_step: i64,
    /// Last volume sent that the engine has not reported back yet.
    pending_volume: Option<i64>,
}

impl CommandDispatcher {
    pub fn new(playback: &PlaybackConfig) -> Self {
        Self {
            seek_step_ms: i64::from(playback.seek_step_secs) * 1000,
            volume_step: i64::from(playback.volume_step),
            pending_volume: None,
        }
    }

    /// Relative seek by one step. Returns the requested position, or `None`
    /// when the duration is unknown and nothing was sent.
    pub fn seek(
        &self,
        engine: &mut EngineHandle,
        model: &PlaybackStateModel,
        forward: bool,
    ) -> Option<i64> {
        if !model.duration_known() {
            return None;
        }
        let delta = if forward {
            self.seek_step_ms
        } else {
            -self.seek_step_ms
        };
        let target = (model.position_ms() + delta).clamp(0, model.duration_ms());
        engine.set_property(TIME_POS, seconds(target));
        Some(target)
    }

    pub fn seek_to_ratio(
        &self,
        engine: &mut EngineHandle,
        model: &PlaybackStateModel,
        ratio: f64,
    ) -> Option<i64> {
        if !model.duration_known() || !ratio.is_finite() {
            return None;
        }
        let target = (ratio.clamp(0.0, 1.0) * model.duration_ms() as f64) as i64;
        engine.set_property(TIME_POS, seconds(target));
        Some(target)
    }

    /// Sets an absolute volume, unmuting so the change is audible.
    pub fn set_volume(
        &mut self,
        engine: &mut EngineHandle,
        model: &PlaybackStateModel,
        volume: i64,
    ) -> i64 {
        let volume = clamp_volume(volume);
        engine.set_property(VOLUME, EngineNode::Int64(volume));
        if model.is_muted() {
            engine.set_property(MUTE, EngineNode::Flag(false));
        }
        self.pending_volume = Some(volume);
        volume
    }

    /// Steps from the last requested volume so presses queued ahead of the
    /// engine's echo accumulate.
    pub fn step_volume(
        &mut self,
        engine: &mut EngineHandle,
        model: &PlaybackStateModel,
        increase: bool,
    ) -> i64 {
        let delta = if increase {
            self.volume_step
        } else {
            -self.volume_step
        };
        let base = self.pending_volume.unwrap_or_else(|| model.volume());
        self.set_volume(engine, model, base + delta)
    }

    /// The engine reported its volume; the model is authoritative again.
    pub fn volume_reported(&mut self) {
        self.pending_volume = None;
    }

    pub fn toggle_mute(&self, engine: &mut EngineHandle, model: &PlaybackStateModel) {
        engine.set_property(MUTE, EngineNode::Flag(!model.is_muted()));
    }

    /// Play/pause button. Pressing play on a file that was played to the end
    /// replays the last playlist entry once the engine has left the list.
    pub fn toggle_play_pause(&self, engine: &mut EngineHandle, model: &mut PlaybackStateModel) {
        let paused = model.is_core_idle();
        if !(paused && model.duration_known() && Self::played_to_end(engine)) {
            engine.set_property(PAUSE, EngineNode::Flag(!paused));
            if paused {
                model.clear_end_of_stream();
            }
            return;
        }

        let position = engine
            .get_property(PLAYLIST_POS)
            .and_then(|node| node.as_i64())
            .unwrap_or(-1);
        let count = engine
            .get_property(PLAYLIST_COUNT)
            .and_then(|node| node.as_i64())
            .unwrap_or(model.playlist().len() as i64);
        if position == -1 && count > 0 {
            info!("Replaying last playlist entry {}", count - 1);
            engine.set_property(PLAYLIST_POS, EngineNode::Int64(count - 1));
        }
        engine.set_property(PAUSE, EngineNode::Flag(false));
        model.clear_end_of_stream();
    }

    /// Remaining time rounds to zero whole seconds.
    fn played_to_end(engine: &mut EngineHandle) -> bool {
        engine
            .get_property(TIME_REMAINING)
            .and_then(|node| node.as_f64())
            .map(f64::round)
            == Some(0.0)
    }

    /// Returns the clamped percentage that was applied.
    pub fn set_speed(&self, engine: &mut EngineHandle, percent: i64) -> i64 {
        let percent = percent.clamp(SPEED_PERCENT_RANGE.0, SPEED_PERCENT_RANGE.1);
        engine.set_property("speed", EngineNode::Double(percent as f64 / 100.0));
        percent
    }

    pub fn set_zoom(&self, engine: &mut EngineHandle, percent: i64) -> i64 {
        let percent = percent.clamp(ZOOM_PERCENT_RANGE.0, ZOOM_PERCENT_RANGE.1);
        let zoom = (percent as f64 / 100.0).log2();
        engine.set_option("video-zoom", EngineNode::Double(zoom));
        percent
    }

    /// Returns the normalized angle the control should display.
    pub fn set_rotation(&self, engine: &mut EngineHandle, degrees: i64) -> i64 {
        let degrees = normalize_rotation(degrees);
        engine.set_option("video-rotate", EngineNode::Int64(degrees));
        degrees
    }

    pub fn set_pan(&self, engine: &mut EngineHandle, axis: PanAxis, percent: i64) -> i64 {
        let percent = percent.clamp(PAN_PERCENT_RANGE.0, PAN_PERCENT_RANGE.1);
        let option = match axis {
            PanAxis::X => "video-pan-x",
            PanAxis::Y => "video-pan-y",
        };
        engine.set_option(option, EngineNode::Double(percent as f64 / 100.0));
        percent
    }

    pub fn set_crop(&self, engine: &mut EngineHandle, horizontal: i64, vertical: i64) {
        if horizontal <= 0 && vertical <= 0 {
            engine.set_option(VIDEO_CROP, EngineNode::String(String::new()));
            return;
        }
        let Some(params) = engine.get_property(VIDEO_PARAMS) else {
            debug!("Ignoring crop: display size unknown");
            return;
        };
        let dimension = |key: &str| params.get(key).and_then(EngineNode::as_i64).unwrap_or(0);
        match crop_geometry(dimension("dw"), dimension("dh"), horizontal, vertical) {
            Some(geometry) => engine.set_option(VIDEO_CROP, EngineNode::String(geometry)),
            None => debug!("Ignoring crop: display size unknown"),
        }
    }

    pub fn set_color(&self, engine: &mut EngineHandle, control: ColorControl, value: i64) -> i64 {
        let value = value.clamp(COLOR_RANGE.0, COLOR_RANGE.1);
        engine.set_option(control.option_name(), EngineNode::Int64(value));
        value
    }

    /// Sends every subtitle option; used at startup.
    pub fn apply_subtitle_style(&self, engine: &mut EngineHandle, style: &SubtitleConfig) {
        engine.set_option("sub-font", EngineNode::String(style.font.clone()));
        engine.set_option(
            "sub-font-size",
            EngineNode::Int64(i64::from(style.font_size)),
        );
        engine.set_option("sub-color", EngineNode::String(style.color.clone()));
        engine.set_option(
            "sub-border-color",
            EngineNode::String(style.border_color.clone()),
        );
        engine.set_option(
            "sub-border-size",
            EngineNode::Int64(i64::from(style.border_size)),
        );
    }

    /// Merges `delta` into `style` and sends only the options that changed.
    /// Invalid colors and empty fonts are ignored; sizes are clamped. Returns
    /// whether anything changed.
    pub fn update_subtitle_style(
        &self,
        engine: &mut EngineHandle,
        style: &mut SubtitleConfig,
        delta: SubtitleStyleDelta,
    ) -> bool {
        let mut changed = false;

        if let Some(font) = delta.font.filter(|font| !font.trim().is_empty()) {
            if font != style.font {
                engine.set_option("sub-font", EngineNode::String(font.clone()));
                style.font = font;
                changed = true;
            }
        }
        if let Some(font_size) = delta.font_size.map(|size| size.clamp(10, 100)) {
            if font_size != style.font_size {
                engine.set_option("sub-font-size", EngineNode::Int64(i64::from(font_size)));
                style.font_size = font_size;
                changed = true;
            }
        }
        if let Some(color) = delta.color.filter(|color| is_valid_color(color)) {
            if color != style.color {
                engine.set_option("sub-color", EngineNode::String(color.clone()));
                style.color = color;
                changed = true;
            }
        }
        if let Some(border_color) = delta.border_color.filter(|color| is_valid_color(color)) {
            if border_color != style.border_color {
                engine.set_option(
                    "sub-border-color",
                    EngineNode::String(border_color.clone()),
                );
                style.border_color = border_color;
                changed = true;
            }
        }
        if let Some(border_size) = delta.border_size.map(|size| size.min(10)) {
            if border_size != style.border_size {
                engine.set_option(
                    "sub-border-size",
                    EngineNode::Int64(i64::from(border_size)),
                );
                style.border_size = border_size;
                changed = true;
            }
        }

        changed
    }

    pub fn select_track(&self, engine: &mut EngineHandle, kind: TrackKind, id: i64) {
        let option = match kind {
            TrackKind::Audio => "aid",
            TrackKind::Subtitle => "sid",
        };
        engine.set_option(option, EngineNode::Int64(id));
    }

    pub fn run_playlist_command(&self, engine: &mut EngineHandle, command: PlaylistCommand) {
        match command {
            PlaylistCommand::Play { index } => {
                engine.set_property(PLAYLIST_POS, EngineNode::Int64(index as i64));
                engine.set_property(PAUSE, EngineNode::Flag(false));
            }
            other => {
                if let Some(args) = other.args() {
                    engine.command(&args);
                }
            }
        }
    }

    /// Appends delivered files: videos join the playlist, subtitles attach
    /// to the current file. Resumes playback when the engine was idling at
    /// the end of the list. Returns the number of files handed over.
    pub fn append_files(
        &self,
        engine: &mut EngineHandle,
        model: &mut PlaybackStateModel,
        paths: &[PathBuf],
    ) -> usize {
        let files = expand_delivered_paths(paths);
        for (path, kind) in &files {
            let path = path.to_string_lossy().into_owned();
            match kind {
                MediaFileKind::Subtitle => engine.command(&["sub-add", path.as_str()]),
                MediaFileKind::Video => {
                    engine.command(&["loadfile", path.as_str(), "append-play"])
                }
            }
        }
        debug!("Appended {} of {} delivered paths", files.len(), paths.len());

        if model.is_core_idle() && model.end_of_stream() {
            engine.set_property(PAUSE, EngineNode::Flag(false));
            model.clear_end_of_stream();
        }
        files.len()
    }
}
