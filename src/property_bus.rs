//! Bridge from engine worker threads to the single consumer context.
//!
//! Producer threads only ever run the wakeup callback, which flips an atomic
//! flag and posts at most one [`SessionInput::EngineWakeup`]. The consumer
//! then drains the engine queue in arrival order. No model data crosses the
//! thread boundary.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc::Sender,
    Arc,
};

use log::{debug, info, trace, warn};

use crate::{
    engine::{EngineError, EngineEvent, EngineHandle, PropertyFormat},
    property::{DecodeError, ObservedProperty, PropertyChange},
    protocol::SessionInput,
};

/// Coalescing "events may be pending" signal shared with producer threads.
#[derive(Clone)]
pub struct WakeSignal {
    pending: Arc<AtomicBool>,
    sender: Sender<SessionInput>,
}

impl WakeSignal {
    pub fn new(sender: Sender<SessionInput>) -> Self {
        Self {
            pending: Arc::new(AtomicBool::new(false)),
            sender,
        }
    }

    /// Safe from any thread, any number of times. Never blocks.
    pub fn notify(&self) {
        if !self.pending.swap(true, Ordering::AcqRel) {
            let _ = self.sender.send(SessionInput::EngineWakeup);
        }
    }

    /// Re-arms the signal. Must run before draining so that events enqueued
    /// during the drain produce a fresh wakeup.
    fn acknowledge(&self) {
        self.pending.store(false, Ordering::Release);
    }
}

pub struct PropertyBus {
    engine: EngineHandle,
    wake_signal: WakeSignal,
    subscriptions: Vec<(String, PropertyFormat)>,
}

impl PropertyBus {
    pub fn new(engine: EngineHandle, wake_signal: WakeSignal) -> Self {
        Self {
            engine,
            wake_signal,
            subscriptions: Vec::new(),
        }
    }

    /// Registers interest in `name`. Must happen before the engine starts
    /// producing events for it.
    pub fn subscribe(&mut self, name: &str, format: PropertyFormat) -> Result<(), EngineError> {
        if let Some(engine) = self.engine.engine_mut() {
            engine.observe_property(name, format)?;
        }
        self.subscriptions.push((name.to_string(), format));
        Ok(())
    }

    pub fn subscriptions(&self) -> &[(String, PropertyFormat)] {
        &self.subscriptions
    }

    /// Hands the engine a callback that only signals the consumer.
    pub fn install_wakeup(&mut self) {
        let wake_signal = self.wake_signal.clone();
        if let Some(engine) = self.engine.engine_mut() {
            engine.set_wakeup_callback(Box::new(move || wake_signal.notify()));
        }
    }

    pub fn engine(&mut self) -> &mut EngineHandle {
        &mut self.engine
    }

    pub fn is_engine_available(&self) -> bool {
        self.engine.is_available()
    }

    /// Drains every queued engine event in arrival order, handing each decoded
    /// property to `apply`. Returns the number of properties applied.
    ///
    /// Returns immediately once the engine handle has been released. A
    /// shutdown event releases the handle and stops the drain.
    pub fn drain_events<F>(&mut self, mut apply: F) -> usize
    where
        F: FnMut(ObservedProperty),
    {
        self.wake_signal.acknowledge();
        let mut applied = 0;
        loop {
            let Some(engine) = self.engine.engine_mut() else {
                break;
            };
            match engine.wait_event(0.0) {
                EngineEvent::None => break,
                EngineEvent::PropertyChange { name, value } => {
                    match ObservedProperty::try_from(PropertyChange::new(name, value)) {
                        Ok(property) => {
                            apply(property);
                            applied += 1;
                        }
                        Err(DecodeError::UnknownProperty(name)) => {
                            debug!("Ignoring change for unobserved property {}", name);
                        }
                        Err(err) => {
                            warn!("Ignoring property notification: {}", err);
                        }
                    }
                }
                EngineEvent::Shutdown => {
                    info!("Engine shut down; releasing handle");
                    self.engine.release();
                    break;
                }
                EngineEvent::Other(name) => {
                    trace!("Unhandled engine event {}", name);
                }
            }
        }
        trace!("Drained {} property changes", applied);
        applied
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::mpsc, thread};

    use super::*;
    use crate::{
        engine::{testing::FakeEngine, EngineNode},
        property::{TIME_POS, VOLUME},
    };

    fn bus_with(fake: &FakeEngine) -> (PropertyBus, mpsc::Receiver<SessionInput>) {
        let (sender, receiver) = mpsc::channel();
        let mut bus = PropertyBus::new(
            EngineHandle::new(Box::new(fake.clone())),
            WakeSignal::new(sender),
        );
        bus.install_wakeup();
        (bus, receiver)
    }

    #[test]
    fn test_subscribe_registers_with_engine() {
        let fake = FakeEngine::new();
        let (mut bus, _receiver) = bus_with(&fake);
        bus.subscribe(VOLUME, PropertyFormat::Int64)
            .expect("subscribe");
        assert_eq!(
            fake.lock().observed,
            vec![(VOLUME.to_string(), PropertyFormat::Int64)]
        );
        assert_eq!(bus.subscriptions().len(), 1);
    }

    #[test]
    fn test_drain_applies_all_queued_events_in_order_exactly_once() {
        let fake = FakeEngine::new();
        let (mut bus, _receiver) = bus_with(&fake);
        for second in 0..50 {
            fake.push_change(TIME_POS, EngineNode::Int64(second));
        }

        let mut seen = Vec::new();
        let applied = bus.drain_events(|property| seen.push(property));
        assert_eq!(applied, 50);
        let expected: Vec<ObservedProperty> = (0..50)
            .map(|second| ObservedProperty::TimePos(second * 1000))
            .collect();
        assert_eq!(seen, expected);

        assert_eq!(bus.drain_events(|_| panic!("nothing left to apply")), 0);
    }

    #[test]
    fn test_malformed_and_unknown_events_are_skipped() {
        let fake = FakeEngine::new();
        let (mut bus, _receiver) = bus_with(&fake);
        fake.push_change(VOLUME, EngineNode::String("x".into()));
        fake.push_change("filename", EngineNode::String("a.mkv".into()));
        fake.push_event(EngineEvent::Other("file-loaded".into()));
        fake.push_change(VOLUME, EngineNode::Int64(40));

        let mut seen = Vec::new();
        bus.drain_events(|property| seen.push(property));
        assert_eq!(seen, vec![ObservedProperty::Volume(40)]);
    }

    #[test]
    fn test_shutdown_releases_handle_and_stops_further_drains() {
        let fake = FakeEngine::new();
        let (mut bus, _receiver) = bus_with(&fake);
        fake.push_change(VOLUME, EngineNode::Int64(10));
        fake.push_event(EngineEvent::Shutdown);
        fake.push_change(VOLUME, EngineNode::Int64(20));

        let mut seen = Vec::new();
        bus.drain_events(|property| seen.push(property));
        assert_eq!(seen, vec![ObservedProperty::Volume(10)]);
        assert!(!bus.is_engine_available());
        assert!(fake.lock().terminated);

        fake.push_change(VOLUME, EngineNode::Int64(30));
        assert_eq!(bus.drain_events(|property| seen.push(property)), 0);
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn test_wakeups_from_many_threads_coalesce_until_drained() {
        let fake = FakeEngine::new();
        let (mut bus, receiver) = bus_with(&fake);

        let producers: Vec<_> = (0..8)
            .map(|_| {
                let fake = fake.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        fake.push_change(VOLUME, EngineNode::Int64(5));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().expect("producer thread");
        }

        assert!(matches!(receiver.try_recv(), Ok(SessionInput::EngineWakeup)));
        assert!(receiver.try_recv().is_err());

        assert_eq!(bus.drain_events(|_| {}), 200);

        fake.push_change(VOLUME, EngineNode::Int64(6));
        assert!(matches!(receiver.try_recv(), Ok(SessionInput::EngineWakeup)));
    }
}
