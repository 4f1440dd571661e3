//! The frame loop tying collector, classifier, matcher and handler
//! together.
//!
//! Each tick moves a typestate machine through one full cycle: drain the
//! raw edge queue (Waiting), feed every edge through the classifier and
//! chord matcher and publish the resulting semantic events (Processing),
//! then run the per-frame motion update with the measured dt (Updating).
//! Edges keep their collector timestamps, so classification stays accurate
//! even when a tick runs late.

use chrono::{DateTime, Local};
use statum::{machine, state};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::config::{StickEventKind, StickId};
use crate::controller::event_collector::RawControllerEvent;

use super::chords::{ChordEvent, ChordMatcher};
use super::classifier::{ButtonClassifier, ButtonEvent};
use super::handler::InputHandler;
use super::{InputBus, InputEvent, InputTrigger};

/// The raw edges drained from the collector queue for one tick.
#[derive(Debug, Clone)]
pub struct EdgeBatch {
    pub events: Vec<RawControllerEvent>,
}

#[derive(Clone, Debug)]
pub struct EngineSettings {
    pub tick_interval_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 10,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Failed to receive controller events: {0}")]
    EventReceiveError(String),
}

#[state]
#[derive(Debug, Clone)]
pub enum EngineState {
    Waiting,
    Processing(EdgeBatch),
    Updating,
}

#[machine]
pub struct InputEngine<S: EngineState> {
    event_receiver: mpsc::Receiver<RawControllerEvent>,
    settings: EngineSettings,
    bus: Rc<InputBus>,
    classifier: Rc<RefCell<ButtonClassifier>>,
    matcher: Rc<RefCell<ChordMatcher>>,
    handler: Rc<RefCell<InputHandler>>,
    /// Last known sample per stick, kept across frames.
    sticks: HashMap<StickId, (f32, f32)>,
    last_frame: DateTime<Local>,
}

impl<S: EngineState> InputEngine<S> {
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }
}

impl InputEngine<Waiting> {
    pub fn create(
        event_receiver: mpsc::Receiver<RawControllerEvent>,
        settings: Option<EngineSettings>,
        bus: Rc<InputBus>,
        classifier: Rc<RefCell<ButtonClassifier>>,
        matcher: Rc<RefCell<ChordMatcher>>,
        handler: Rc<RefCell<InputHandler>>,
    ) -> Result<Self, EngineError> {
        let settings = settings.unwrap_or_default();
        info!("Creating input engine with settings: {:?}", settings);
        Ok(Self::new(
            event_receiver,
            settings,
            bus,
            classifier,
            matcher,
            handler,
            HashMap::new(),
            Local::now(),
        ))
    }

    /// Drains every queued edge without blocking and carries the batch
    /// into the processing state.
    pub fn collect_edges(mut self) -> Result<InputEngine<Processing>, EngineError> {
        let mut events = Vec::new();
        loop {
            match self.event_receiver.try_recv() {
                Ok(event) => events.push(event),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    error!("Controller event channel disconnected");
                    return Err(EngineError::EventReceiveError(
                        "event channel disconnected".to_string(),
                    ));
                }
            }
        }

        if !events.is_empty() {
            debug!("Collected batch of {} edge(s)", events.len());
        }
        Ok(self.transition_with(EdgeBatch { events }))
    }
}

impl InputEngine<Processing> {
    /// Feeds the batch through classifier and matcher, publishes whatever
    /// they emit and then advances their timers to now.
    pub fn process_events(mut self) -> Result<InputEngine<Updating>, EngineError> {
        let edges = self
            .get_state_data()
            .map(|batch| batch.events.clone())
            .unwrap_or_default();

        for edge in &edges {
            match edge {
                RawControllerEvent::ButtonEdge {
                    button,
                    pressed,
                    timestamp,
                } => {
                    // Borrows end before publishing: a listener may switch
                    // modes and reset classifier and matcher underneath us.
                    let (button_events, chord_events) = {
                        let mut classifier = self.classifier.borrow_mut();
                        let mut matcher = self.matcher.borrow_mut();
                        if *pressed {
                            (
                                classifier.press(*button, *timestamp),
                                matcher.press(*button, *timestamp),
                            )
                        } else {
                            (
                                classifier.release(*button, *timestamp),
                                matcher.release(*button, *timestamp),
                            )
                        }
                    };
                    self.publish_button_events(button_events);
                    self.publish_chord_events(chord_events);
                }
                RawControllerEvent::StickMove { stick, x, y, .. } => {
                    let previous = self.sticks.insert(*stick, (*x, *y)).unwrap_or((0.0, 0.0));
                    // A discrete move event fires once per deflection, not
                    // on every sample while the stick is held off-center.
                    let was_centered = previous == (0.0, 0.0);
                    let deflected = *x != 0.0 || *y != 0.0;
                    if was_centered && deflected {
                        self.bus.publish(
                            &InputTrigger::Stick(*stick, StickEventKind::Move),
                            &InputEvent::Stick {
                                stick: *stick,
                                x: *x,
                                y: *y,
                            },
                        );
                    }
                }
            }
        }

        let now = Local::now();
        let expired = self.classifier.borrow_mut().tick(now);
        self.publish_button_events(expired);
        let expired = self.matcher.borrow_mut().tick(now);
        self.publish_chord_events(expired);

        Ok(self.transition())
    }

    fn publish_button_events(&self, events: Vec<ButtonEvent>) {
        for event in events {
            self.bus.publish(
                &InputTrigger::Button(event.button, event.kind),
                &InputEvent::Button {
                    button: event.button,
                    kind: event.kind,
                },
            );
        }
    }

    fn publish_chord_events(&self, events: Vec<ChordEvent>) {
        for event in events {
            self.bus.publish(
                &InputTrigger::Chord(event.chord.clone(), event.kind),
                &InputEvent::Chord {
                    chord: event.chord,
                    kind: event.kind,
                },
            );
        }
    }
}

impl InputEngine<Updating> {
    /// Runs the navigation bindings for this frame and rolls back to
    /// Waiting for the next tick.
    pub fn update_motion(mut self) -> Result<InputEngine<Waiting>, EngineError> {
        let now = Local::now();
        let dt = (now - self.last_frame)
            .num_microseconds()
            .unwrap_or(0)
            .max(0) as f64
            / 1_000_000.0;
        self.last_frame = now;

        self.handler.borrow_mut().update_frame(&self.sticks, dt, now);
        Ok(self.transition())
    }
}

/// Drives the engine until the collector goes away.
pub async fn run_engine_loop(mut engine: InputEngine<Waiting>) -> Result<(), EngineError> {
    let interval_ms = engine.settings().tick_interval_ms;
    info!("Starting input engine loop with {}ms tick", interval_ms);

    let mut ticker = tokio::time::interval(tokio::time::Duration::from_millis(interval_ms));
    loop {
        ticker.tick().await;

        let processing = engine.collect_edges()?;
        let updating = processing.process_events()?;
        engine = updating.update_motion()?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ButtonEventKind, ButtonId, Config, ControllerSettings, Mode, Settings};
    use crate::outputs::{LoggingKeyboard, LoggingMouse, LoggingOverlay};
    use std::collections::BTreeMap;

    fn empty_config() -> Config {
        Config {
            settings: Settings::default(),
            modes: BTreeMap::from([
                ("global".to_string(), Mode::named("global")),
                ("default".to_string(), Mode::named("default")),
            ]),
        }
    }

    struct Harness {
        engine: Option<InputEngine<Waiting>>,
        sender: Option<mpsc::Sender<RawControllerEvent>>,
        bus: Rc<InputBus>,
    }

    impl Harness {
        fn new() -> Self {
            let (sender, receiver) = mpsc::channel(64);
            let bus = Rc::new(InputBus::new());
            let settings = ControllerSettings::default();
            let classifier = Rc::new(RefCell::new(ButtonClassifier::new(&settings)));
            let matcher = Rc::new(RefCell::new(ChordMatcher::new(&settings)));
            let handler = InputHandler::new(
                empty_config(),
                Rc::clone(&bus),
                Rc::clone(&classifier),
                Rc::clone(&matcher),
                Rc::new(LoggingKeyboard),
                Rc::new(LoggingMouse),
                Rc::new(LoggingOverlay),
            )
            .unwrap();

            let engine = InputEngine::create(
                receiver,
                None,
                Rc::clone(&bus),
                classifier,
                matcher,
                handler,
            )
            .unwrap();

            Self {
                engine: Some(engine),
                sender: Some(sender),
                bus,
            }
        }

        fn send(&self, event: RawControllerEvent) {
            self.sender
                .as_ref()
                .unwrap()
                .try_send(event)
                .expect("queue full");
        }

        fn cycle(&mut self) -> Result<(), EngineError> {
            let engine = self.engine.take().unwrap();
            let updating = engine.collect_edges()?.process_events()?;
            self.engine = Some(updating.update_motion()?);
            Ok(())
        }

        fn record_all(&self) -> Rc<RefCell<Vec<InputEvent>>> {
            let seen = Rc::new(RefCell::new(Vec::new()));
            let seen2 = Rc::clone(&seen);
            self.bus.subscribe(
                None,
                move |event: &InputEvent| seen2.borrow_mut().push(event.clone()),
                None,
                false,
            );
            seen
        }
    }

    #[test]
    fn button_edges_become_classified_bus_events() {
        let mut h = Harness::new();
        let seen = h.record_all();
        let t0 = Local::now();

        h.send(RawControllerEvent::ButtonEdge {
            button: ButtonId::FaceDown,
            pressed: true,
            timestamp: t0,
        });
        h.send(RawControllerEvent::ButtonEdge {
            button: ButtonId::FaceDown,
            pressed: false,
            timestamp: t0 + chrono::Duration::milliseconds(30),
        });
        h.cycle().unwrap();

        let kinds: Vec<ButtonEventKind> = seen
            .borrow()
            .iter()
            .filter_map(|event| match event {
                InputEvent::Button { kind, .. } => Some(*kind),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec![ButtonEventKind::Down, ButtonEventKind::Up]);
    }

    #[test]
    fn stick_deflection_publishes_one_move_until_recentered() {
        let mut h = Harness::new();
        let seen = h.record_all();
        let t0 = Local::now();

        let sample = |x: f32, y: f32| RawControllerEvent::StickMove {
            stick: StickId::StickLeft,
            x,
            y,
            timestamp: t0,
        };

        h.send(sample(0.5, 0.0));
        h.cycle().unwrap();
        h.send(sample(0.6, 0.1));
        h.cycle().unwrap();
        assert_eq!(seen.borrow().len(), 1);

        h.send(sample(0.0, 0.0));
        h.cycle().unwrap();
        h.send(sample(0.4, 0.0));
        h.cycle().unwrap();
        assert_eq!(seen.borrow().len(), 2);
    }

    #[test]
    fn disconnected_collector_stops_the_engine() {
        let mut h = Harness::new();
        h.sender = None;

        assert!(h.cycle().is_err());
    }
}
