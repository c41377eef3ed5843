//! Property-change notifications and their typed decoding.
//!
//! Raw notifications carry a name and an untyped [`EngineNode`]. They are
//! decoded exactly once, at the bus boundary, into [`ObservedProperty`] so
//! downstream code matches exhaustively instead of comparing strings.

use crate::{
    engine::{EngineNode, PropertyFormat},
    playlist::{decode_playlist, PlaylistEntry},
};

pub const TIME_POS: &str = "time-pos";
pub const DURATION: &str = "duration";
pub const VOLUME: &str = "volume";
pub const MUTE: &str = "mute";
pub const CORE_IDLE: &str = "core-idle";
pub const PAUSE: &str = "pause";
pub const EOF_REACHED: &str = "eof-reached";
pub const TRACK_LIST: &str = "track-list";
pub const CHAPTER_LIST: &str = "chapter-list";
pub const MEDIA_TITLE: &str = "media-title";
pub const PLAYLIST: &str = "playlist";

/// Every property the core subscribes to, with its declared kind.
pub const OBSERVED_PROPERTIES: [(&str, PropertyFormat); 11] = [
    (DURATION, PropertyFormat::Int64),
    (TIME_POS, PropertyFormat::Int64),
    (VOLUME, PropertyFormat::Int64),
    (MUTE, PropertyFormat::Flag),
    (CORE_IDLE, PropertyFormat::Flag),
    (PAUSE, PropertyFormat::Flag),
    (EOF_REACHED, PropertyFormat::Flag),
    (TRACK_LIST, PropertyFormat::Node),
    (CHAPTER_LIST, PropertyFormat::Node),
    (MEDIA_TITLE, PropertyFormat::String),
    (PLAYLIST, PropertyFormat::Node),
];

/// Raw notification as produced by the engine. Consumed once.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyChange {
    pub name: String,
    pub value: EngineNode,
}

impl PropertyChange {
    pub fn new(name: impl Into<String>, value: EngineNode) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Subtitle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub id: i64,
    pub kind: TrackKind,
    pub lang: Option<String>,
    pub title: Option<String>,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    pub title: Option<String>,
    pub time_ms: i64,
}

/// Closed set of observed properties, decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum ObservedProperty {
    TimePos(i64),
    Duration(i64),
    Volume(i64),
    Mute(bool),
    CoreIdle(bool),
    Pause(bool),
    EofReached(bool),
    /// `None` when the engine reports no media title.
    MediaTitle(Option<String>),
    TrackList(Vec<Track>),
    ChapterList(Vec<Chapter>),
    Playlist(Vec<PlaylistEntry>),
    /// Property was reset to "unavailable" by the engine (e.g. no file).
    Unavailable(&'static str),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown property '{0}'")]
    UnknownProperty(String),
    #[error("property '{name}' expected {expected} but found {found}")]
    UnexpectedFormat {
        name: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("property '{name}' is malformed: {reason}")]
    Malformed { name: String, reason: String },
}

/// Converts an engine time value in seconds into milliseconds.
fn seconds_to_ms(value: &EngineNode) -> Option<i64> {
    match value {
        EngineNode::Int64(seconds) => Some(seconds.saturating_mul(1000)),
        EngineNode::Double(seconds) if seconds.is_finite() => {
            Some((seconds * 1000.0).round() as i64)
        }
        _ => None,
    }
}

fn unexpected(name: &str, expected: PropertyFormat, found: &EngineNode) -> DecodeError {
    DecodeError::UnexpectedFormat {
        name: name.to_string(),
        expected: expected.as_str(),
        found: found.format().as_str(),
    }
}

fn static_name(name: &str) -> Option<&'static str> {
    OBSERVED_PROPERTIES
        .iter()
        .find(|(observed, _)| *observed == name)
        .map(|(observed, _)| *observed)
}

impl TryFrom<PropertyChange> for ObservedProperty {
    type Error = DecodeError;

    fn try_from(change: PropertyChange) -> Result<Self, Self::Error> {
        let PropertyChange { name, value } = change;
        let Some(name) = static_name(&name) else {
            return Err(DecodeError::UnknownProperty(name));
        };

        // A `None` value means the property is currently unavailable; only the
        // title has a meaningful "none" state of its own.
        if value == EngineNode::None {
            return Ok(match name {
                MEDIA_TITLE => ObservedProperty::MediaTitle(None),
                other => ObservedProperty::Unavailable(other),
            });
        }

        match name {
            TIME_POS => seconds_to_ms(&value)
                .map(ObservedProperty::TimePos)
                .ok_or_else(|| unexpected(name, PropertyFormat::Int64, &value)),
            DURATION => seconds_to_ms(&value)
                .map(ObservedProperty::Duration)
                .ok_or_else(|| unexpected(name, PropertyFormat::Int64, &value)),
            VOLUME => value
                .as_i64()
                .map(ObservedProperty::Volume)
                .ok_or_else(|| unexpected(name, PropertyFormat::Int64, &value)),
            MUTE | CORE_IDLE | PAUSE | EOF_REACHED => {
                let flag = value
                    .as_bool()
                    .ok_or_else(|| unexpected(name, PropertyFormat::Flag, &value))?;
                Ok(match name {
                    MUTE => ObservedProperty::Mute(flag),
                    CORE_IDLE => ObservedProperty::CoreIdle(flag),
                    PAUSE => ObservedProperty::Pause(flag),
                    _ => ObservedProperty::EofReached(flag),
                })
            }
            MEDIA_TITLE => value
                .as_str()
                .map(|title| ObservedProperty::MediaTitle(Some(title.to_string())))
                .ok_or_else(|| unexpected(name, PropertyFormat::String, &value)),
            TRACK_LIST => decode_tracks(&value).map(ObservedProperty::TrackList),
            CHAPTER_LIST => decode_chapters(&value).map(ObservedProperty::ChapterList),
            PLAYLIST => decode_playlist(&value).map(ObservedProperty::Playlist),
            other => Err(DecodeError::UnknownProperty(other.to_string())),
        }
    }
}

fn optional_text(node: &EngineNode, key: &str) -> Option<String> {
    node.get(key)
        .and_then(EngineNode::as_str)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

/// Decodes a full `track-list` snapshot. Track types other than audio and
/// subtitle (video, unknown) are skipped.
pub fn decode_tracks(node: &EngineNode) -> Result<Vec<Track>, DecodeError> {
    let items = node
        .as_array()
        .ok_or_else(|| unexpected(TRACK_LIST, PropertyFormat::Node, node))?;

    let mut tracks = Vec::with_capacity(items.len());
    for item in items {
        let kind = match item.get("type").and_then(EngineNode::as_str) {
            Some("audio") => TrackKind::Audio,
            Some("sub") => TrackKind::Subtitle,
            _ => continue,
        };
        let id = item
            .get("id")
            .and_then(EngineNode::as_i64)
            .ok_or_else(|| DecodeError::Malformed {
                name: TRACK_LIST.to_string(),
                reason: "track entry without id".to_string(),
            })?;
        tracks.push(Track {
            id,
            kind,
            lang: optional_text(item, "lang"),
            title: optional_text(item, "title"),
            selected: item
                .get("selected")
                .and_then(EngineNode::as_bool)
                .unwrap_or(false),
        });
    }
    Ok(tracks)
}

pub fn decode_chapters(node: &EngineNode) -> Result<Vec<Chapter>, DecodeError> {
    let items = node
        .as_array()
        .ok_or_else(|| unexpected(CHAPTER_LIST, PropertyFormat::Node, node))?;
    Ok(items
        .iter()
        .map(|item| Chapter {
            title: optional_text(item, "title"),
            time_ms: item.get("time").and_then(seconds_to_ms).unwrap_or(0).max(0),
        })
        .collect())
}
