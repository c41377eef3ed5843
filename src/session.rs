//! The consumer context: owns the engine and all mirrored state.
//!
//! Every [`SessionInput`] is handled here on one thread, so wakeup drains and
//! UI intents are serialised without locks.

use std::sync::mpsc::{Receiver, Sender};

use log::{debug, info};
use tokio::sync::broadcast;

use crate::{
    command_dispatcher::CommandDispatcher,
    config::Config,
    config_persistence::SettingsStore,
    engine::{Engine, EngineError, EngineHandle, EngineNode},
    playback_state::{ModelChange, PlaybackStateModel},
    playlist::PlaylistReconciler,
    property::{TrackKind, OBSERVED_PROPERTIES, VOLUME},
    property_bus::{PropertyBus, WakeSignal},
    protocol::{Intent, SessionInput, StateEvent},
};

/// Options applied before the engine is initialized.
const STARTUP_OPTIONS: [(&str, &str); 3] = [
    ("idle", "yes"),
    ("keep-open", "yes"),
    ("input-default-bindings", "no"),
];

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to set up playback engine: {0}")]
    Engine(#[from] EngineError),
}

pub struct PlaybackSession {
    bus: PropertyBus,
    model: PlaybackStateModel,
    reconciler: PlaylistReconciler,
    dispatcher: CommandDispatcher,
    config: Config,
    settings: Box<dyn SettingsStore>,
    bus_producer: broadcast::Sender<StateEvent>,
    shutdown_announced: bool,
}

impl PlaybackSession {
    /// Configures, subscribes and initializes `engine`. Any failure here is
    /// fatal for the session.
    pub fn new(
        engine: Box<dyn Engine>,
        config: Config,
        settings: Box<dyn SettingsStore>,
        input_sender: Sender<SessionInput>,
        bus_producer: broadcast::Sender<StateEvent>,
    ) -> Result<Self, SessionError> {
        let mut bus = PropertyBus::new(EngineHandle::new(engine), WakeSignal::new(input_sender));

        {
            let engine = bus
                .engine()
                .engine_mut()
                .ok_or(EngineError::Unavailable)?;
            for (name, value) in STARTUP_OPTIONS {
                engine.set_option(name, EngineNode::String(value.to_string()))?;
            }
        }
        for (name, format) in OBSERVED_PROPERTIES {
            bus.subscribe(name, format)?;
        }
        bus.install_wakeup();
        bus.engine()
            .engine_mut()
            .ok_or(EngineError::Unavailable)?
            .initialize()?;
        info!(
            "Engine initialized with {} observed properties",
            bus.subscriptions().len()
        );

        let dispatcher = CommandDispatcher::new(&config.playback);
        bus.engine()
            .set_property(VOLUME, EngineNode::Int64(config.playback.volume));
        dispatcher.apply_subtitle_style(bus.engine(), &config.subtitles);
        dispatcher.set_speed(bus.engine(), config.playback.speed_percent);

        Ok(Self {
            bus,
            model: PlaybackStateModel::new(config.playback.volume),
            reconciler: PlaylistReconciler::new(),
            dispatcher,
            config,
            settings,
            bus_producer,
            shutdown_announced: false,
        })
    }

    #[cfg(test)]
    pub fn model(&self) -> &PlaybackStateModel {
        &self.model
    }

    #[cfg(test)]
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_engine_available(&self) -> bool {
        self.bus.is_engine_available()
    }

    /// Handles inputs until `Quit`, a closed channel, or engine shutdown.
    pub fn run(&mut self, inputs: Receiver<SessionInput>) {
        while let Ok(input) = inputs.recv() {
            match input {
                SessionInput::EngineWakeup => {
                    self.process_engine_events();
                }
                SessionInput::Intent(intent) => self.handle_intent(intent),
                SessionInput::Quit => {
                    info!("Quit requested");
                    break;
                }
            }
            if !self.is_engine_available() {
                info!("Engine is gone; leaving session loop");
                break;
            }
        }
        self.bus.engine().release();
    }

    /// Drains pending engine events into the model and publishes what
    /// changed, in the order the engine reported it. Returns the number of
    /// properties applied.
    pub fn process_engine_events(&mut self) -> usize {
        let mut events = Vec::new();
        let Self {
            bus,
            model,
            reconciler,
            dispatcher,
            config,
            settings,
            ..
        } = self;
        let applied = bus.drain_events(|property| {
            let phase = model.phase();
            let change = model.apply(property);
            if change == ModelChange::Volume {
                dispatcher.volume_reported();
                persist_volume(config, &mut **settings, model.volume());
            }
            events.extend(state_event_for(change, model, reconciler));
            if model.phase() != phase {
                events.push(StateEvent::PhaseChanged(model.phase()));
            }
        });

        for event in events {
            self.publish(event);
        }

        if !self.bus.is_engine_available() && !self.shutdown_announced {
            self.shutdown_announced = true;
            self.publish(StateEvent::EngineShutdown);
        }
        applied
    }

    pub fn handle_intent(&mut self, intent: Intent) {
        debug!("Handling intent {:?}", intent);
        let phase = self.model.phase();
        let engine = self.bus.engine();
        match intent {
            Intent::Seek { forward } => {
                self.dispatcher.seek(engine, &self.model, forward);
            }
            Intent::SeekToRatio(ratio) => {
                self.dispatcher.seek_to_ratio(engine, &self.model, ratio);
            }
            Intent::SetVolume(volume) => {
                self.dispatcher.set_volume(engine, &self.model, volume);
            }
            Intent::StepVolume { increase } => {
                self.dispatcher.step_volume(engine, &self.model, increase);
            }
            Intent::ToggleMute => self.dispatcher.toggle_mute(engine, &self.model),
            Intent::TogglePlayPause => {
                self.dispatcher.toggle_play_pause(engine, &mut self.model)
            }
            Intent::SetSpeed(percent) => {
                let percent = self.dispatcher.set_speed(engine, percent);
                if percent != self.config.playback.speed_percent {
                    self.config.playback.speed_percent = percent;
                    self.settings.save(&self.config);
                }
            }
            Intent::SetZoom(percent) => {
                self.dispatcher.set_zoom(engine, percent);
            }
            Intent::SetRotation(degrees) => {
                let normalized = self.dispatcher.set_rotation(engine, degrees);
                if normalized != degrees {
                    self.publish(StateEvent::RotationNormalized(normalized));
                }
            }
            Intent::SetPan { axis, percent } => {
                self.dispatcher.set_pan(engine, axis, percent);
            }
            Intent::SetCrop {
                horizontal,
                vertical,
            } => self.dispatcher.set_crop(engine, horizontal, vertical),
            Intent::SetColor { control, value } => {
                self.dispatcher.set_color(engine, control, value);
            }
            Intent::SetSubtitleStyle(delta) => {
                if self
                    .dispatcher
                    .update_subtitle_style(engine, &mut self.config.subtitles, delta)
                {
                    self.settings.save(&self.config);
                }
            }
            Intent::SelectTrack { kind, id } => self.dispatcher.select_track(engine, kind, id),
            Intent::SelectPlaylistRow(row) => self.reconciler.select(row),
            Intent::PlaylistRow { key, intent } => {
                if let Some(command) = self.reconciler.command_for(key, intent) {
                    self.dispatcher.run_playlist_command(engine, command);
                }
            }
            Intent::AppendFiles(paths) => {
                let appended = self.dispatcher.append_files(engine, &mut self.model, &paths);
                info!("Appended {} files", appended);
            }
        }
        if self.model.phase() != phase {
            self.publish(StateEvent::PhaseChanged(self.model.phase()));
        }
    }

    fn publish(&self, event: StateEvent) {
        // Err only means no renderer is subscribed.
        let _ = self.bus_producer.send(event);
    }
}

/// The event announcing `change`, built from the model as it is right after
/// the change was applied.
fn state_event_for(
    change: ModelChange,
    model: &PlaybackStateModel,
    reconciler: &mut PlaylistReconciler,
) -> Option<StateEvent> {
    let event = match change {
        ModelChange::Progress => StateEvent::ProgressChanged {
            position_ms: model.position_ms(),
            duration_ms: model.duration_ms(),
            text: model.progress_text(),
        },
        ModelChange::Volume => StateEvent::VolumeChanged {
            volume: model.volume(),
            muted: model.is_muted(),
            icon: model.volume_icon(),
        },
        ModelChange::PlayState => StateEvent::PlayIconChanged(model.play_button_icon()),
        ModelChange::EndOfStream => StateEvent::EndOfStream,
        ModelChange::Title => StateEvent::TitleChanged(model.window_title()),
        ModelChange::Tracks => StateEvent::TracksChanged {
            audio: model.track_menu(TrackKind::Audio),
            subtitles: model.track_menu(TrackKind::Subtitle),
        },
        ModelChange::Chapters => StateEvent::ChaptersChanged(model.chapters().to_vec()),
        ModelChange::Playlist => StateEvent::PlaylistChanged(reconciler.reconcile(model.playlist())),
        ModelChange::Nothing => return None,
    };
    Some(event)
}

fn persist_volume(config: &mut Config, settings: &mut dyn SettingsStore, volume: i64) {
    if volume == config.playback.volume {
        return;
    }
    config.playback.volume = volume;
    settings.save(config);
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, sync::mpsc};

    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;
    use crate::{
        config_persistence::testing::MemorySettingsStore,
        engine::{testing::FakeEngine, EngineEvent, PropertyFormat},
        playback_state::{PlayButtonIcon, PlaybackPhase, VolumeIcon},
        playlist::{RowIntent, RowKey},
        property::{CORE_IDLE, DURATION, EOF_REACHED, MUTE, PAUSE, PLAYLIST, TIME_POS},
        protocol::SubtitleStyleDelta,
    };

    struct Harness {
        fake: FakeEngine,
        store: MemorySettingsStore,
        session: PlaybackSession,
        inputs: mpsc::Receiver<SessionInput>,
        input_sender: mpsc::Sender<SessionInput>,
        events: broadcast::Receiver<StateEvent>,
    }

    fn harness_with(fake: FakeEngine) -> Harness {
        let store = MemorySettingsStore::default();
        let (input_sender, inputs) = mpsc::channel();
        let (bus_producer, events) = broadcast::channel(256);
        let session = PlaybackSession::new(
            Box::new(fake.clone()),
            Config::default(),
            Box::new(store.clone()),
            input_sender.clone(),
            bus_producer,
        )
        .expect("session starts");
        fake.clear_calls();
        Harness {
            fake,
            store,
            session,
            inputs,
            input_sender,
            events,
        }
    }

    fn harness() -> Harness {
        harness_with(FakeEngine::new())
    }

    fn drain_state_events(receiver: &mut broadcast::Receiver<StateEvent>) -> Vec<StateEvent> {
        let mut events = Vec::new();
        loop {
            match receiver.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Closed) => break,
            }
        }
        events
    }

    fn playlist_node(names: &[(&str, i64)], current: usize) -> EngineNode {
        EngineNode::Array(
            names
                .iter()
                .enumerate()
                .map(|(index, (name, id))| {
                    EngineNode::map([
                        ("filename", EngineNode::String(name.to_string())),
                        ("current", EngineNode::Flag(index == current)),
                        ("id", EngineNode::Int64(*id)),
                    ])
                })
                .collect(),
        )
    }

    #[test]
    fn test_startup_configures_subscribes_and_initializes() {
        let fake = FakeEngine::new();
        let (input_sender, _inputs) = mpsc::channel();
        let (bus_producer, _events) = broadcast::channel(16);
        let _session = PlaybackSession::new(
            Box::new(fake.clone()),
            Config::default(),
            Box::new(MemorySettingsStore::default()),
            input_sender,
            bus_producer,
        )
        .expect("session starts");

        let log = fake.lock();
        assert!(log.initialized);
        assert!(log.wakeup.is_some());
        let observed: Vec<(String, PropertyFormat)> = OBSERVED_PROPERTIES
            .iter()
            .map(|(name, format)| (name.to_string(), *format))
            .collect();
        assert_eq!(log.observed, observed);
        assert_eq!(
            log.options[..3],
            [
                ("idle".to_string(), EngineNode::String("yes".into())),
                ("keep-open".to_string(), EngineNode::String("yes".into())),
                (
                    "input-default-bindings".to_string(),
                    EngineNode::String("no".into())
                ),
            ]
        );
        assert!(log
            .options
            .contains(&("sub-font-size".to_string(), EngineNode::Int64(55))));
        assert_eq!(
            log.sets,
            vec![
                (VOLUME.to_string(), EngineNode::Int64(70)),
                ("speed".to_string(), EngineNode::Double(1.0)),
            ]
        );
    }

    #[test]
    fn test_initialization_failure_is_fatal_and_releases_engine() {
        let fake = FakeEngine::new();
        fake.lock().fail_initialize = true;
        let (input_sender, _inputs) = mpsc::channel();
        let (bus_producer, _events) = broadcast::channel(16);

        let result = PlaybackSession::new(
            Box::new(fake.clone()),
            Config::default(),
            Box::new(MemorySettingsStore::default()),
            input_sender,
            bus_producer,
        );

        assert!(matches!(
            result,
            Err(SessionError::Engine(EngineError::Initialize(_)))
        ));
        assert!(fake.lock().terminated);
    }

    #[test]
    fn test_wakeup_drain_publishes_state_events() {
        let mut h = harness();
        h.fake.push_change(DURATION, EngineNode::Int64(120));
        h.fake.push_change(TIME_POS, EngineNode::Double(65.0));
        h.fake.push_change(CORE_IDLE, EngineNode::Flag(true));
        h.fake
            .push_change("media-title", EngineNode::String("Clip".into()));

        assert!(matches!(h.inputs.try_recv(), Ok(SessionInput::EngineWakeup)));
        assert_eq!(h.session.process_engine_events(), 4);

        let events = drain_state_events(&mut h.events);
        assert_eq!(
            events,
            vec![
                StateEvent::ProgressChanged {
                    position_ms: 0,
                    duration_ms: 120_000,
                    text: "00:00/02:00".into(),
                },
                StateEvent::ProgressChanged {
                    position_ms: 65_000,
                    duration_ms: 120_000,
                    text: "01:05/02:00".into(),
                },
                StateEvent::PlayIconChanged(PlayButtonIcon::Resume),
                StateEvent::PhaseChanged(PlaybackPhase::CoreIdle),
                StateEvent::TitleChanged("Clip - playsync".into()),
            ]
        );
    }

    #[test]
    fn test_each_event_carries_the_value_it_announces() {
        let mut h = harness();
        h.fake.push_change(VOLUME, EngineNode::Int64(20));
        h.fake.push_change(VOLUME, EngineNode::Int64(90));
        h.session.process_engine_events();

        let volumes: Vec<i64> = drain_state_events(&mut h.events)
            .into_iter()
            .filter_map(|event| match event {
                StateEvent::VolumeChanged { volume, .. } => Some(volume),
                _ => None,
            })
            .collect();
        assert_eq!(volumes, vec![20, 90]);
        assert_eq!(h.store.save_count(), 2);
    }

    #[test]
    fn test_queued_volume_steps_accumulate_before_engine_echo() {
        let mut h = harness_with(FakeEngine::echoing());
        h.session.process_engine_events();
        assert_eq!(h.session.model().volume(), 70);

        h.session
            .handle_intent(Intent::StepVolume { increase: true });
        h.session
            .handle_intent(Intent::StepVolume { increase: true });
        h.session.process_engine_events();

        assert_eq!(
            h.fake.sets(),
            vec![
                (VOLUME.to_string(), EngineNode::Int64(75)),
                (VOLUME.to_string(), EngineNode::Int64(80)),
            ]
        );
        assert_eq!(h.session.model().volume(), 80);
        assert_eq!(
            h.store.last_saved().map(|config| config.playback.volume),
            Some(80)
        );
    }

    #[test]
    fn test_phase_changes_are_published() {
        let mut h = harness();
        h.fake.push_change(PAUSE, EngineNode::Flag(true));
        h.fake.push_change(EOF_REACHED, EngineNode::Flag(true));
        h.fake.push_change(CORE_IDLE, EngineNode::Flag(true));
        h.session.process_engine_events();

        let phases: Vec<PlaybackPhase> = drain_state_events(&mut h.events)
            .into_iter()
            .filter_map(|event| match event {
                StateEvent::PhaseChanged(phase) => Some(phase),
                _ => None,
            })
            .collect();
        assert_eq!(
            phases,
            vec![PlaybackPhase::Paused, PlaybackPhase::EndOfStream]
        );

        h.session.handle_intent(Intent::TogglePlayPause);
        assert_eq!(
            drain_state_events(&mut h.events),
            vec![StateEvent::PhaseChanged(PlaybackPhase::CoreIdle)]
        );
    }

    #[test]
    fn test_volume_notifications_persist_only_on_change() {
        let mut h = harness();
        h.fake.push_change(VOLUME, EngineNode::Int64(70));
        h.fake.push_change(VOLUME, EngineNode::Int64(42));
        h.fake.push_change(MUTE, EngineNode::Flag(true));
        h.session.process_engine_events();

        assert_eq!(h.store.save_count(), 1);
        assert_eq!(
            h.store.last_saved().map(|config| config.playback.volume),
            Some(42)
        );
        let events = drain_state_events(&mut h.events);
        assert_eq!(
            events.last(),
            Some(&StateEvent::VolumeChanged {
                volume: 42,
                muted: true,
                icon: VolumeIcon::Muted,
            })
        );
    }

    #[test]
    fn test_playlist_shrink_keeps_selection_on_last_row() {
        let mut h = harness();
        h.fake.push_change(
            PLAYLIST,
            playlist_node(&[("a.mkv", 1), ("b.mkv", 2), ("c.mkv", 3)], 0),
        );
        h.session.process_engine_events();
        h.session.handle_intent(Intent::SelectPlaylistRow(Some(2)));

        h.fake
            .push_change(PLAYLIST, playlist_node(&[("a.mkv", 1)], 0));
        h.session.process_engine_events();

        let events = drain_state_events(&mut h.events);
        let Some(StateEvent::PlaylistChanged(view)) = events.last() else {
            panic!("expected a playlist event, got {:?}", events);
        };
        assert_eq!(view.rows.len(), 1);
        assert_eq!(view.selected, Some(0));
        assert!(!view.rows[0].can_move_up);
        assert!(!view.rows[0].can_move_down);
    }

    #[test]
    fn test_row_intent_follows_entry_identity_after_reorder() {
        let mut h = harness();
        h.fake.push_change(
            PLAYLIST,
            playlist_node(&[("a.mkv", 10), ("b.mkv", 20), ("c.mkv", 30)], 0),
        );
        h.session.process_engine_events();

        // Captured when "c" was rendered at row 2, clicked after it moved.
        let key = RowKey {
            index: 2,
            id: Some(30),
        };
        h.fake.push_change(
            PLAYLIST,
            playlist_node(&[("c.mkv", 30), ("a.mkv", 10), ("b.mkv", 20)], 1),
        );
        h.session.process_engine_events();
        h.session.handle_intent(Intent::PlaylistRow {
            key,
            intent: RowIntent::Remove,
        });

        assert_eq!(
            h.fake.commands(),
            vec![vec!["playlist-remove".to_string(), "0".to_string()]]
        );
    }

    #[test]
    fn test_speed_and_subtitle_changes_are_persisted() {
        let mut h = harness();
        h.session.handle_intent(Intent::SetSpeed(150));
        h.session.handle_intent(Intent::SetSpeed(150));
        assert_eq!(h.store.save_count(), 1);

        h.session
            .handle_intent(Intent::SetSubtitleStyle(SubtitleStyleDelta {
                font_size: Some(40),
                ..SubtitleStyleDelta::default()
            }));
        assert_eq!(h.store.save_count(), 2);
        let saved = h.store.last_saved().expect("saved config");
        assert_eq!(saved.playback.speed_percent, 150);
        assert_eq!(saved.subtitles.font_size, 40);
        assert_eq!(h.session.config(), &saved);
    }

    #[test]
    fn test_rotation_correction_is_published() {
        let mut h = harness();
        h.session.handle_intent(Intent::SetRotation(90));
        h.session.handle_intent(Intent::SetRotation(-90));
        assert_eq!(
            drain_state_events(&mut h.events),
            vec![StateEvent::RotationNormalized(270)]
        );
    }

    #[test]
    fn test_end_of_stream_clears_only_on_play() {
        let mut h = harness();
        h.fake.push_change(EOF_REACHED, EngineNode::Flag(true));
        h.fake.push_change(VOLUME, EngineNode::Int64(10));
        h.session.process_engine_events();
        assert!(h.session.model().end_of_stream());

        h.fake.push_change(CORE_IDLE, EngineNode::Flag(true));
        h.session.process_engine_events();
        h.session.handle_intent(Intent::TogglePlayPause);
        assert!(!h.session.model().end_of_stream());
    }

    #[test]
    fn test_shutdown_ends_run_loop_and_is_announced_once() {
        let mut h = harness();
        h.fake.push_change(VOLUME, EngineNode::Int64(30));
        h.fake.push_event(EngineEvent::Shutdown);
        h.input_sender
            .send(SessionInput::Intent(Intent::ToggleMute))
            .expect("send");

        let inputs = std::mem::replace(&mut h.inputs, mpsc::channel().1);
        h.session.run(inputs);

        assert!(!h.session.is_engine_available());
        assert!(h.fake.lock().terminated);
        let events = drain_state_events(&mut h.events);
        assert_eq!(
            events
                .iter()
                .filter(|event| **event == StateEvent::EngineShutdown)
                .count(),
            1
        );
        assert!(h.fake.sets().is_empty());
    }

    #[test]
    fn test_run_handles_intents_until_quit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let video = dir.path().join("movie.mp4");
        std::fs::write(&video, b"").expect("write");

        let mut h = harness();
        h.input_sender
            .send(SessionInput::Intent(Intent::AppendFiles(vec![
                video.clone(),
                PathBuf::from("/nonexistent/file.mkv"),
            ])))
            .expect("send");
        h.input_sender.send(SessionInput::Quit).expect("send");
        h.input_sender
            .send(SessionInput::Intent(Intent::ToggleMute))
            .expect("send");

        let inputs = std::mem::replace(&mut h.inputs, mpsc::channel().1);
        h.session.run(inputs);

        assert_eq!(
            h.fake.commands(),
            vec![vec![
                "loadfile".to_string(),
                video.to_string_lossy().to_string(),
                "append-play".to_string(),
            ]]
        );
        assert!(h.fake.sets().is_empty());
        assert!(h.fake.lock().terminated);
    }
}
