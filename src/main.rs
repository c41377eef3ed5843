mod command_dispatcher;
mod config;
mod config_persistence;
mod console_control;
mod engine;
mod media_file_discovery;
#[cfg(unix)]
mod mpv_ipc;
mod playback_state;
mod playlist;
mod property;
mod property_bus;
mod protocol;
mod session;

use std::{
    path::PathBuf,
    sync::{mpsc, Arc, Mutex},
};

use config::Config;
use config_persistence::{default_config_path, SettingsStore, TomlSettingsStore};
use console_control::{spawn_state_printer, spawn_stdin_forwarder, RenderedRows};
use engine::{Engine, EngineError};
use log::info;
use protocol::Intent;
use session::PlaybackSession;
use tokio::sync::broadcast;

fn log_level_from_env() -> log::LevelFilter {
    std::env::var("PLAYSYNC_LOG")
        .ok()
        .and_then(|level| level.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Debug)
}

#[cfg(unix)]
fn create_engine(config: &Config) -> Result<Box<dyn Engine>, EngineError> {
    Ok(Box::new(mpv_ipc::MpvIpcEngine::spawn(&config.engine)?))
}

#[cfg(not(unix))]
fn create_engine(_config: &Config) -> Result<Box<dyn Engine>, EngineError> {
    Err(EngineError::Create(
        "the mpv IPC engine requires unix domain sockets".to_string(),
    ))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut clog = colog::default_builder();
    clog.filter(None, log_level_from_env());
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let config_file = default_config_path().ok_or("could not determine the config directory")?;
    let settings = TomlSettingsStore::open(config_file)?;
    let config = settings.load();
    info!("Loaded config from {}", settings.path().display());

    let files: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();

    // Intents and engine wakeups share one queue so the session sees them in order
    let (input_sender, inputs) = mpsc::channel();
    // Bus for state updates to renderers
    let (bus_sender, _) = broadcast::channel(1024);
    let rendered_rows: RenderedRows = Arc::new(Mutex::new(Vec::new()));
    let _printer = spawn_state_printer(bus_sender.subscribe(), Arc::clone(&rendered_rows))?;

    let engine = create_engine(&config)?;
    let mut session = PlaybackSession::new(
        engine,
        config,
        Box::new(settings),
        input_sender.clone(),
        bus_sender,
    )?;

    if !files.is_empty() {
        session.handle_intent(Intent::AppendFiles(files));
    }

    let _input = spawn_stdin_forwarder(input_sender, rendered_rows)?;
    session.run(inputs);
    info!("Playback session ended");
    Ok(())
}
