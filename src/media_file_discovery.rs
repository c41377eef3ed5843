use std::path::{Path, PathBuf};

use log::debug;

pub const VIDEO_EXTENSIONS: [&str; 24] = [
    "webm", "mkv", "flv", "vob", "ogv", "gif", "avi", "mov", "qt", "wmv", "rm", "rmvb", "asf",
    "amv", "mp4", "m4v", "mp4v", "mpg", "mp2", "mpeg", "3gp", "mpts", "m2ts", "ts",
];

pub const SUBTITLE_EXTENSIONS: [&str; 17] = [
    "ass", "idx", "lrc", "mks", "pgs", "rt", "sbv", "scc", "smi", "srt", "ssa", "sub", "sup",
    "utf", "utf-8", "utf8", "vtt",
];

/// How a delivered file is handed to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MediaFileKind {
    /// Appended to the playlist.
    Video,
    /// Attached to the current file.
    Subtitle,
}

fn has_extension_in(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            extensions
                .iter()
                .any(|supported| ext.eq_ignore_ascii_case(supported))
        })
        .unwrap_or(false)
}

pub fn classify_media_file(path: &Path) -> Option<MediaFileKind> {
    if has_extension_in(path, &SUBTITLE_EXTENSIONS) {
        Some(MediaFileKind::Subtitle)
    } else if has_extension_in(path, &VIDEO_EXTENSIONS) {
        Some(MediaFileKind::Video)
    } else {
        None
    }
}

/// Recursively lists recognised media files below `folder_path`, sorted.
pub fn collect_media_files_from_folder(folder_path: &Path) -> Vec<(PathBuf, MediaFileKind)> {
    let mut pending_directories = vec![folder_path.to_path_buf()];
    let mut files = Vec::new();

    while let Some(directory) = pending_directories.pop() {
        let entries = match std::fs::read_dir(&directory) {
            Ok(entries) => entries,
            Err(err) => {
                debug!("Failed to read directory {}: {}", directory.display(), err);
                continue;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!(
                        "Failed to read a directory entry in {}: {}",
                        directory.display(),
                        err
                    );
                    continue;
                }
            };

            let path = entry.path();
            let file_type = match entry.file_type() {
                Ok(file_type) => file_type,
                Err(err) => {
                    debug!("Failed to inspect {}: {}", path.display(), err);
                    continue;
                }
            };

            if file_type.is_dir() {
                pending_directories.push(path);
                continue;
            }

            if file_type.is_file() {
                if let Some(kind) = classify_media_file(&path) {
                    files.push((path, kind));
                }
            }
        }
    }

    files.sort_unstable();
    files
}

/// Expands externally delivered paths in delivery order. Missing paths and
/// unrecognised extensions are skipped; directories contribute their
/// contents in sorted order.
pub fn expand_delivered_paths(paths: &[PathBuf]) -> Vec<(PathBuf, MediaFileKind)> {
    let mut files = Vec::new();
    for path in paths {
        if !path.exists() {
            debug!("Skipping missing path {}", path.display());
            continue;
        }
        if path.is_dir() {
            files.extend(collect_media_files_from_folder(path));
            continue;
        }
        match classify_media_file(path) {
            Some(kind) => files.push((path.clone(), kind)),
            None => debug!("Skipping unsupported file {}", path.display()),
        }
    }
    files
}
