//! Playlist snapshots and their reconciliation into a displayed list.

use std::path::Path;

use log::debug;

use crate::{
    engine::{EngineNode, PropertyFormat},
    property::{DecodeError, PLAYLIST},
};

/// One entry of a full playlist snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistEntry {
    pub index: usize,
    pub filename: String,
    pub is_current: bool,
    /// Stable entry identity, when the engine supplies one.
    pub id: Option<i64>,
}

/// Decodes a `playlist` node into entries in snapshot order.
pub fn decode_playlist(node: &EngineNode) -> Result<Vec<PlaylistEntry>, DecodeError> {
    let items = node.as_array().ok_or_else(|| DecodeError::UnexpectedFormat {
        name: PLAYLIST.to_string(),
        expected: PropertyFormat::Node.as_str(),
        found: node.format().as_str(),
    })?;

    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let filename = item
                .get("filename")
                .and_then(EngineNode::as_str)
                .ok_or_else(|| DecodeError::Malformed {
                    name: PLAYLIST.to_string(),
                    reason: format!("entry {} has no filename", index),
                })?;
            Ok(PlaylistEntry {
                index,
                filename: filename.to_string(),
                is_current: item
                    .get("current")
                    .and_then(EngineNode::as_bool)
                    .unwrap_or(false),
                id: item.get("id").and_then(EngineNode::as_i64),
            })
        })
        .collect()
}

/// Human-readable title for a playlist filename: local files lose their
/// directory and final extension, anything else (URLs, missing files) is
/// shown verbatim.
pub fn display_title(filename: &str) -> String {
    let path = Path::new(filename);
    if path.exists() {
        if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
            return stem.to_string();
        }
    }
    filename.to_string()
}

/// Identity captured by a row affordance at render time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowKey {
    pub index: usize,
    pub id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowIntent {
    MoveUp,
    MoveDown,
    Remove,
    /// Make this row the playing entry.
    Play,
}

/// One rendered playlist row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistRow {
    pub key: RowKey,
    pub title: String,
    /// Current-entry indicator is shown.
    pub is_current: bool,
    pub can_move_up: bool,
    pub can_move_down: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaylistView {
    pub rows: Vec<PlaylistRow>,
    pub selected: Option<usize>,
}

/// Clamps a previous selection into a snapshot of `new_count` rows.
pub fn clamp_selection(selected: Option<usize>, new_count: usize) -> Option<usize> {
    let row = selected?;
    if new_count == 0 {
        return None;
    }
    Some(row.min(new_count - 1))
}

/// Rebuilds the displayed playlist from full snapshots while keeping the
/// user's selected row stable under shrink and grow.
#[derive(Debug, Default)]
pub struct PlaylistReconciler {
    selected_index: Option<usize>,
    entries: Vec<PlaylistEntry>,
}

impl PlaylistReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn selected_index(&self) -> Option<usize> {
        self.selected_index
    }

    /// User selection. Out-of-range rows clear the selection.
    pub fn select(&mut self, row: Option<usize>) {
        self.selected_index = row.filter(|row| *row < self.entries.len());
    }

    pub fn reconcile(&mut self, snapshot: &[PlaylistEntry]) -> PlaylistView {
        let selected = clamp_selection(self.selected_index, snapshot.len());
        let last = snapshot.len().saturating_sub(1);

        let rows = snapshot
            .iter()
            .enumerate()
            .map(|(row, entry)| PlaylistRow {
                key: RowKey {
                    index: row,
                    id: entry.id,
                },
                title: display_title(&entry.filename),
                is_current: entry.is_current,
                can_move_up: row > 0,
                can_move_down: row < last,
            })
            .collect();

        self.entries = snapshot.to_vec();
        self.selected_index = selected;
        PlaylistView { rows, selected }
    }

    /// Resolves a captured row key against the current snapshot.
    ///
    /// With an engine-supplied id the row's present index is used; a key whose
    /// entry has vanished resolves to `None`. Without an id the captured index
    /// is trusted as-is, which can hit a different row if the snapshot changed
    /// between render and click.
    pub fn resolve(&self, key: RowKey) -> Option<usize> {
        match key.id {
            Some(id) => self.entries.iter().position(|entry| entry.id == Some(id)),
            None => (key.index < self.entries.len()).then_some(key.index),
        }
    }

    /// Translates a row intent into engine command arguments. Edge rows
    /// produce nothing for moves that would leave the list.
    pub fn command_for(&self, key: RowKey, intent: RowIntent) -> Option<PlaylistCommand> {
        let Some(index) = self.resolve(key) else {
            debug!("Dropping {:?} for stale playlist row {:?}", intent, key);
            return None;
        };
        let count = self.entries.len();
        match intent {
            RowIntent::MoveUp if index > 0 => Some(PlaylistCommand::Move {
                from: index,
                to: index - 1,
            }),
            // The engine inserts before `to`, so moving one row down targets
            // the slot after the next entry.
            RowIntent::MoveDown if index + 1 < count => Some(PlaylistCommand::Move {
                from: index,
                to: index + 2,
            }),
            RowIntent::Remove => Some(PlaylistCommand::Remove { index }),
            RowIntent::Play => Some(PlaylistCommand::Play { index }),
            RowIntent::MoveUp | RowIntent::MoveDown => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistCommand {
    Move { from: usize, to: usize },
    Remove { index: usize },
    Play { index: usize },
}

impl PlaylistCommand {
    /// Command arguments; `Play` is a property set and has none.
    pub fn args(&self) -> Option<Vec<String>> {
        match self {
            PlaylistCommand::Move { from, to } => Some(vec![
                "playlist-move".to_string(),
                from.to_string(),
                to.to_string(),
            ]),
            PlaylistCommand::Remove { index } => {
                Some(vec!["playlist-remove".to_string(), index.to_string()])
            }
            PlaylistCommand::Play { .. } => None,
        }
    }
}
