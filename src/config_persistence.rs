//! Loading and saving `config.toml` while keeping user comments intact.

use std::path::{Path, PathBuf};

use log::{info, warn};
use toml_edit::{value, Array, DocumentMut, Item, Table};

use crate::config::{sanitize_config, Config};

/// Load-at-start, save-on-change persistence port.
pub trait SettingsStore {
    fn load(&self) -> Config;
    fn save(&mut self, config: &Config);
}

fn set_table_value_preserving_decor(table: &mut Table, key: &str, item: Item) {
    let existing_value_decor = table
        .get(key)
        .and_then(|current| current.as_value().map(|value| value.decor().clone()));
    table[key] = item;
    if let Some(existing_value_decor) = existing_value_decor {
        if let Some(next_value) = table[key].as_value_mut() {
            *next_value.decor_mut() = existing_value_decor;
        }
    }
}

fn set_table_scalar_if_changed<T, F>(
    table: &mut Table,
    key: &str,
    previous_value: T,
    next_value: T,
    to_item: F,
) where
    T: PartialEq,
    F: FnOnce(T) -> Item,
{
    if table.contains_key(key) && previous_value == next_value {
        return;
    }
    set_table_value_preserving_decor(table, key, to_item(next_value));
}

fn ensure_section_table<'a>(document: &'a mut DocumentMut, key: &str) -> &'a mut Table {
    let root = document.as_table_mut();
    let should_replace = !matches!(root.get(key), Some(item) if item.is_table());
    if should_replace {
        root.insert(key, Item::Table(Table::new()));
    }
    root[key]
        .as_table_mut()
        .unwrap_or_else(|| unreachable!("section {} was just ensured to be a table", key))
}

fn string_array(values: &[String]) -> Item {
    let mut array = Array::new();
    for entry in values {
        array.push(entry.as_str());
    }
    value(array)
}

fn write_config_to_document(document: &mut DocumentMut, previous: &Config, config: &Config) {
    {
        let playback = ensure_section_table(document, "playback");
        set_table_scalar_if_changed(
            playback,
            "seek_step_secs",
            i64::from(previous.playback.seek_step_secs),
            i64::from(config.playback.seek_step_secs),
            value,
        );
        set_table_scalar_if_changed(
            playback,
            "volume_step",
            i64::from(previous.playback.volume_step),
            i64::from(config.playback.volume_step),
            value,
        );
        set_table_scalar_if_changed(
            playback,
            "volume",
            previous.playback.volume,
            config.playback.volume,
            value,
        );
        set_table_scalar_if_changed(
            playback,
            "speed_percent",
            previous.playback.speed_percent,
            config.playback.speed_percent,
            value,
        );
    }

    {
        let subtitles = ensure_section_table(document, "subtitles");
        set_table_scalar_if_changed(
            subtitles,
            "font",
            previous.subtitles.font.clone(),
            config.subtitles.font.clone(),
            value,
        );
        set_table_scalar_if_changed(
            subtitles,
            "font_size",
            i64::from(previous.subtitles.font_size),
            i64::from(config.subtitles.font_size),
            value,
        );
        set_table_scalar_if_changed(
            subtitles,
            "color",
            previous.subtitles.color.clone(),
            config.subtitles.color.clone(),
            value,
        );
        set_table_scalar_if_changed(
            subtitles,
            "border_color",
            previous.subtitles.border_color.clone(),
            config.subtitles.border_color.clone(),
            value,
        );
        set_table_scalar_if_changed(
            subtitles,
            "border_size",
            i64::from(previous.subtitles.border_size),
            i64::from(config.subtitles.border_size),
            value,
        );
    }

    {
        let engine = ensure_section_table(document, "engine");
        set_table_scalar_if_changed(
            engine,
            "binary",
            previous.engine.binary.clone(),
            config.engine.binary.clone(),
            value,
        );
        match &config.engine.ipc_socket {
            Some(socket) => set_table_scalar_if_changed(
                engine,
                "ipc_socket",
                previous.engine.ipc_socket.clone(),
                Some(socket.clone()),
                |socket| value(socket.unwrap_or_default()),
            ),
            None => {
                engine.remove("ipc_socket");
            }
        }
        if !engine.contains_key("extra_args")
            || previous.engine.extra_args != config.engine.extra_args
        {
            set_table_value_preserving_decor(
                engine,
                "extra_args",
                string_array(&config.engine.extra_args),
            );
        }
        set_table_scalar_if_changed(
            engine,
            "startup_timeout_ms",
            previous.engine.startup_timeout_ms as i64,
            config.engine.startup_timeout_ms as i64,
            value,
        );
    }
}

pub fn serialize_config_with_preserved_comments(
    existing_text: &str,
    config: &Config,
) -> Result<String, String> {
    let previous = toml::from_str::<Config>(existing_text)
        .map_err(|err| format!("failed to parse existing config as Config: {}", err))?;
    let mut document = existing_text
        .parse::<DocumentMut>()
        .map_err(|err| format!("failed to parse existing config as TOML document: {}", err))?;
    write_config_to_document(&mut document, &previous, config);
    Ok(document.to_string())
}

pub fn persist_config_file(config: &Config, path: &Path) {
    let existing_text = std::fs::read_to_string(path).ok();
    let config_text = if let Some(existing_text) = existing_text {
        match serialize_config_with_preserved_comments(&existing_text, config) {
            Ok(updated_text) => Some(updated_text),
            Err(err) => {
                warn!(
                    "Failed to preserve config comments for {} ({}). Falling back to plain serialization.",
                    path.display(),
                    err
                );
                toml::to_string(config).ok()
            }
        }
    } else {
        toml::to_string(config).ok()
    };

    let Some(config_text) = config_text else {
        log::error!("Failed to serialize config for {}", path.display());
        return;
    };

    if let Err(err) = std::fs::write(path, config_text) {
        log::error!("Failed to persist config to {}: {}", path.display(), err);
    }
}

/// Reads and sanitizes `path`, falling back to defaults when the file is
/// missing or unparsable.
pub fn load_config_file(path: &Path) -> Config {
    let config_content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            warn!(
                "Failed to read config file {}. Using defaults. error={}",
                path.display(),
                err
            );
            return sanitize_config(Config::default());
        }
    };

    match toml::from_str::<Config>(&config_content) {
        Ok(config) => sanitize_config(config),
        Err(err) => {
            warn!(
                "Failed to parse config file {}. Using defaults. error={}",
                path.display(),
                err
            );
            sanitize_config(Config::default())
        }
    }
}

/// Default location: `<config dir>/playsync/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|root| root.join("playsync").join("config.toml"))
}

/// `SettingsStore` backed by a TOML file.
pub struct TomlSettingsStore {
    path: PathBuf,
}

impl TomlSettingsStore {
    /// Creates the parent directory and a default file when missing.
    pub fn open(path: PathBuf) -> Result<Self, String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| {
                format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    err
                )
            })?;
        }
        if !path.exists() {
            info!(
                "Config file not found. Creating default config. path={}",
                path.display()
            );
            let default_text = toml::to_string(&sanitize_config(Config::default()))
                .map_err(|err| format!("Failed to serialize default config: {}", err))?;
            std::fs::write(&path, default_text)
                .map_err(|err| format!("Failed to write {}: {}", path.display(), err))?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for TomlSettingsStore {
    fn load(&self) -> Config {
        load_config_file(&self.path)
    }

    fn save(&mut self, config: &Config) {
        persist_config_file(config, &self.path);
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_update_preserves_comments_and_untouched_keys() {
        let existing = r#"# playsync settings
[playback]
# remembered between runs
volume = 70 # percent
seek_step_secs = 15

[subtitles]
font = "Noto Sans" # custom font
"#;
        let mut config: Config = toml::from_str(existing).expect("parses");
        config.playback.volume = 35;

        let updated =
            serialize_config_with_preserved_comments(existing, &config).expect("serializes");
        assert!(updated.contains("# playsync settings"));
        assert!(updated.contains("# remembered between runs"));
        assert!(updated.contains("volume = 35 # percent"));
        assert!(updated.contains("seek_step_secs = 15"));
        assert!(updated.contains("font = \"Noto Sans\" # custom font"));

        let reparsed: Config = toml::from_str(&updated).expect("reparses");
        assert_eq!(reparsed, config);
    }

    #[test]
    fn test_unset_socket_override_is_removed() {
        let existing = r#"
[engine]
binary = "mpv"
ipc_socket = "/tmp/custom.sock"
"#;
        let mut config: Config = toml::from_str(existing).expect("parses");
        config.engine.ipc_socket = None;
        let updated =
            serialize_config_with_preserved_comments(existing, &config).expect("serializes");
        assert!(!updated.contains("ipc_socket"));
    }

    #[test]
    fn test_store_creates_default_file_and_round_trips_saves() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");

        let mut store = TomlSettingsStore::open(path.clone()).expect("opens");
        assert!(path.exists());
        assert_eq!(store.load(), sanitize_config(Config::default()));

        let mut config = store.load();
        config.playback.volume = 12;
        config.playback.speed_percent = 150;
        config.engine.extra_args = vec!["--hwdec=auto".to_string()];
        store.save(&config);

        assert_eq!(store.load(), config);
    }

    #[test]
    fn test_malformed_file_loads_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[playback\nvolume = ").expect("write");
        assert_eq!(load_config_file(&path), sanitize_config(Config::default()));
    }

    #[test]
    fn test_loaded_values_are_sanitized() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[playback]\nvolume = 999\n").expect("write");
        assert_eq!(load_config_file(&path).playback.volume, 130);
    }
}
