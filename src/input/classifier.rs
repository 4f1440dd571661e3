//! Per-button press-duration classification.
//!
//! Every physical press/release edge is turned into `down`/`up` events
//! immediately; in addition, at most one of `click`, `double_click`,
//! `triple_click` or `long_press` is emitted per resolved chain. The state
//! machine is advanced by explicit time checks (`tick`), never by wall
//! clock timers, so it is fully deterministic under test. All deadline
//! comparisons use `>=`: a timer whose deadline equals "now" fires.

use chrono::{DateTime, Duration, Local};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::config::{ButtonEventKind, ButtonId, ControllerSettings};

/// A classified button event ready for publication.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ButtonEvent {
    pub button: ButtonId,
    pub kind: ButtonEventKind,
}

impl ButtonEvent {
    fn new(button: ButtonId, kind: ButtonEventKind) -> Self {
        Self { button, kind }
    }
}

/// Runtime state of one button. A button without an entry is idle.
#[derive(Clone, Debug)]
enum PressPhase {
    /// Button is held; the single-click timer decides click vs long press.
    /// `chain` counts the clicks completed so far in the current chain.
    DownWaiting {
        pressed_at: DateTime<Local>,
        chain: u8,
    },
    /// Long press already fired; only the closing `up` is still owed.
    HeldPastClick,
    /// Released; waiting to see whether another press extends the chain.
    ReleasedWaitingChain {
        deadline: DateTime<Local>,
        chain: u8,
    },
}

pub struct ButtonClassifier {
    single_click: Duration,
    double_click: Duration,
    states: HashMap<ButtonId, PressPhase>,
}

impl ButtonClassifier {
    pub fn new(settings: &ControllerSettings) -> Self {
        Self {
            single_click: settings.single_click(),
            double_click: settings.double_click(),
            states: HashMap::new(),
        }
    }

    /// Feeds a press edge. Returns the events to publish, `down` first.
    pub fn press(&mut self, button: ButtonId, now: DateTime<Local>) -> Vec<ButtonEvent> {
        let chain = match self.states.get(&button) {
            None => 0,
            Some(PressPhase::ReleasedWaitingChain { chain, .. }) => {
                // A new press inside the chain window keeps the chain
                // alive and cancels its timer.
                *chain
            }
            Some(_) => {
                warn!("Ignoring duplicate press edge for {:?}", button);
                return Vec::new();
            }
        };

        self.states.insert(
            button,
            PressPhase::DownWaiting {
                pressed_at: now,
                chain,
            },
        );
        vec![ButtonEvent::new(button, ButtonEventKind::Down)]
    }

    /// Feeds a release edge. Returns the events to publish, `up` last so a
    /// long press that resolves on the release edge is ordered before it.
    pub fn release(&mut self, button: ButtonId, now: DateTime<Local>) -> Vec<ButtonEvent> {
        match self.states.get(&button).cloned() {
            None | Some(PressPhase::ReleasedWaitingChain { .. }) => {
                warn!("Ignoring release edge without a press for {:?}", button);
                Vec::new()
            }
            Some(PressPhase::HeldPastClick) => {
                self.states.remove(&button);
                vec![ButtonEvent::new(button, ButtonEventKind::Up)]
            }
            Some(PressPhase::DownWaiting { pressed_at, chain }) => {
                if now - pressed_at >= self.single_click {
                    // The hold outlasted the click threshold before the
                    // tick noticed; classify it here and drop the chain.
                    self.states.remove(&button);
                    return vec![
                        ButtonEvent::new(button, ButtonEventKind::LongPress),
                        ButtonEvent::new(button, ButtonEventKind::Up),
                    ];
                }
                let chain = (chain + 1).min(3);
                self.states.insert(
                    button,
                    PressPhase::ReleasedWaitingChain {
                        deadline: now + self.double_click,
                        chain,
                    },
                );
                vec![ButtonEvent::new(button, ButtonEventKind::Up)]
            }
        }
    }

    /// Advances all running timers to `now` and returns the events whose
    /// deadlines expired.
    pub fn tick(&mut self, now: DateTime<Local>) -> Vec<ButtonEvent> {
        let mut events = Vec::new();
        let buttons: Vec<ButtonId> = self.states.keys().copied().collect();

        for button in buttons {
            match self.states.get(&button) {
                Some(PressPhase::DownWaiting { pressed_at, .. })
                    if now - *pressed_at >= self.single_click =>
                {
                    debug!("Long press on {:?}", button);
                    // Still held; chain is discarded, only `up` follows.
                    self.states.insert(button, PressPhase::HeldPastClick);
                    events.push(ButtonEvent::new(button, ButtonEventKind::LongPress));
                }
                Some(PressPhase::ReleasedWaitingChain { deadline, chain }) if now >= *deadline => {
                    let kind = match chain {
                        1 => ButtonEventKind::Click,
                        2 => ButtonEventKind::DoubleClick,
                        _ => ButtonEventKind::TripleClick,
                    };
                    debug!("Chain of {} on {:?} resolved to {:?}", chain, button, kind);
                    self.states.remove(&button);
                    events.push(ButtonEvent::new(button, kind));
                }
                _ => {}
            }
        }

        events
    }

    /// Drops all per-button state and timers. Called on mode switches so
    /// no chain or pending long press leaks into the new mode.
    pub fn reset(&mut self) {
        self.states.clear();
    }
}
