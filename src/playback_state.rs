//! Mirrored engine state and the routine that applies property deltas to it.

use log::{debug, trace};

use crate::{
    playlist::PlaylistEntry,
    property::{Chapter, ObservedProperty, Track, TrackKind, DURATION, TIME_POS},
};

pub const MAX_VOLUME: i64 = 130;
pub const APP_NAME: &str = "playsync";

/// Visible pause/idle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackPhase {
    Playing,
    Paused,
    /// Engine has no frame to render; the UI offers "resume".
    CoreIdle,
    EndOfStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayButtonIcon {
    Resume,
    Pause,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeIcon {
    Muted,
    Low,
    Medium,
    High,
}

/// Which part of the model an applied property touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelChange {
    Progress,
    Volume,
    PlayState,
    EndOfStream,
    Title,
    Tracks,
    Chapters,
    Playlist,
    Nothing,
}

/// One entry of an audio or subtitle selection menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackMenuItem {
    pub id: Option<i64>,
    pub label: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackStateModel {
    position_ms: i64,
    duration_ms: i64,
    paused: bool,
    core_idle: bool,
    muted: bool,
    volume: i64,
    end_of_stream: bool,
    media_title: Option<String>,
    tracks: Vec<Track>,
    chapters: Vec<Chapter>,
    playlist: Vec<PlaylistEntry>,
}

impl PlaybackStateModel {
    pub fn new(initial_volume: i64) -> Self {
        Self {
            volume: initial_volume.clamp(0, MAX_VOLUME),
            ..Self::default()
        }
    }

    pub fn position_ms(&self) -> i64 {
        self.position_ms
    }

    pub fn duration_ms(&self) -> i64 {
        self.duration_ms
    }

    pub fn duration_known(&self) -> bool {
        self.duration_ms > 0
    }

    pub fn is_core_idle(&self) -> bool {
        self.core_idle
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn volume(&self) -> i64 {
        self.volume
    }

    pub fn end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    #[cfg(test)]
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    pub fn playlist(&self) -> &[PlaylistEntry] {
        &self.playlist
    }

    pub fn phase(&self) -> PlaybackPhase {
        if self.end_of_stream {
            PlaybackPhase::EndOfStream
        } else if self.core_idle {
            PlaybackPhase::CoreIdle
        } else if self.paused {
            PlaybackPhase::Paused
        } else {
            PlaybackPhase::Playing
        }
    }

    /// Driven by `core-idle` alone so seeks don't flicker the icon.
    pub fn play_button_icon(&self) -> PlayButtonIcon {
        if self.core_idle {
            PlayButtonIcon::Resume
        } else {
            PlayButtonIcon::Pause
        }
    }

    pub fn volume_icon(&self) -> VolumeIcon {
        volume_icon(self.volume, self.muted)
    }

    pub fn window_title(&self) -> String {
        match &self.media_title {
            Some(title) => format!("{} - {}", title, APP_NAME),
            None => APP_NAME.to_string(),
        }
    }

    /// "position/duration", with hours only when the duration needs them.
    pub fn progress_text(&self) -> String {
        let with_hour = self.duration_ms >= 60 * 60 * 1000;
        format!(
            "{}/{}",
            format_time(self.position_ms, with_hour),
            format_time(self.duration_ms, with_hour)
        )
    }

    pub fn track_menu(&self, kind: TrackKind) -> Vec<TrackMenuItem> {
        let items: Vec<TrackMenuItem> = self
            .tracks
            .iter()
            .filter(|track| track.kind == kind)
            .map(|track| TrackMenuItem {
                id: Some(track.id),
                label: track_label(track),
                enabled: true,
            })
            .collect();
        if !items.is_empty() {
            return items;
        }
        let placeholder = match kind {
            TrackKind::Audio => "No Audio Tracks",
            TrackKind::Subtitle => "No Subtitles",
        };
        vec![TrackMenuItem {
            id: None,
            label: placeholder.to_string(),
            enabled: false,
        }]
    }

    /// Applies one decoded notification. Numeric fields are last-write-wins;
    /// list-shaped fields are replaced wholesale.
    pub fn apply(&mut self, property: ObservedProperty) -> ModelChange {
        trace!("Applying {:?}", property);
        match property {
            ObservedProperty::TimePos(position_ms) => {
                self.position_ms = self.bounded_position(position_ms);
                ModelChange::Progress
            }
            ObservedProperty::Duration(duration_ms) => {
                self.duration_ms = duration_ms.max(0);
                self.position_ms = self.bounded_position(self.position_ms);
                ModelChange::Progress
            }
            ObservedProperty::Volume(volume) => {
                self.volume = volume.clamp(0, MAX_VOLUME);
                ModelChange::Volume
            }
            ObservedProperty::Mute(muted) => {
                self.muted = muted;
                ModelChange::Volume
            }
            ObservedProperty::CoreIdle(core_idle) => {
                self.core_idle = core_idle;
                ModelChange::PlayState
            }
            ObservedProperty::Pause(paused) => {
                self.paused = paused;
                ModelChange::Nothing
            }
            ObservedProperty::EofReached(true) => {
                if !self.end_of_stream {
                    debug!("End of stream reached");
                }
                self.end_of_stream = true;
                ModelChange::EndOfStream
            }
            // Sticky: only an explicit play action clears end-of-stream.
            ObservedProperty::EofReached(false) => ModelChange::Nothing,
            ObservedProperty::MediaTitle(title) => {
                self.media_title = title;
                ModelChange::Title
            }
            ObservedProperty::TrackList(tracks) => {
                self.tracks = tracks;
                ModelChange::Tracks
            }
            ObservedProperty::ChapterList(chapters) => {
                self.chapters = chapters;
                ModelChange::Chapters
            }
            ObservedProperty::Playlist(entries) => {
                self.playlist = entries;
                ModelChange::Playlist
            }
            ObservedProperty::Unavailable(TIME_POS) => {
                self.position_ms = 0;
                ModelChange::Progress
            }
            ObservedProperty::Unavailable(DURATION) => {
                self.duration_ms = 0;
                ModelChange::Progress
            }
            ObservedProperty::Unavailable(name) => {
                debug!("Property {} unavailable; keeping last value", name);
                ModelChange::Nothing
            }
        }
    }

    /// Called by explicit play/replay actions.
    pub fn clear_end_of_stream(&mut self) {
        self.end_of_stream = false;
    }

    fn bounded_position(&self, position_ms: i64) -> i64 {
        let position_ms = position_ms.max(0);
        if self.duration_known() {
            position_ms.min(self.duration_ms)
        } else {
            position_ms
        }
    }
}

pub fn volume_icon(volume: i64, muted: bool) -> VolumeIcon {
    if volume == 0 || muted {
        VolumeIcon::Muted
    } else if volume < 41 {
        VolumeIcon::Low
    } else if volume < 81 {
        VolumeIcon::Medium
    } else {
        VolumeIcon::High
    }
}

/// Formats milliseconds as `h:mm:ss` or `mm:ss`.
pub fn format_time(time_ms: i64, with_hour: bool) -> String {
    let total_secs = time_ms.max(0) / 1000;
    if with_hour {
        let hours = total_secs / 3600;
        let minutes = (total_secs % 3600) / 60;
        let seconds = total_secs % 60;
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", total_secs / 60, total_secs % 60)
    }
}

fn track_label(track: &Track) -> String {
    let mut label = String::new();
    if let Some(lang) = &track.lang {
        label.push_str(&format!("[{}]", lang));
    }
    if let Some(title) = &track.title {
        label.push_str(&format!(" {}", title));
    }
    if label.is_empty() {
        label = format!("id: {}", track.id);
    }
    if track.selected {
        label = format!("* {}", label);
    }
    label
}
