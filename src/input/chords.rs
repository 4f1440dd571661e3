//! Chord accumulation and matching.
//!
//! Buttons that appear in at least one configured chord are collected into
//! a candidate set during a short window after the first press. The window
//! closes early when no configured chord could still be reached by pressing
//! more buttons. A chord fires `down` when the candidate set equals a
//! configured chord exactly, `up` when the first member is released, and
//! the matcher stays inert until every collected button is released again.
//! Deadline comparisons use `>=`, matching the button classifier.

use chrono::{DateTime, Duration, Local};
use std::collections::BTreeSet;
use tracing::debug;

use crate::config::{ButtonId, Chord, ControllerSettings};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChordEventKind {
    Down,
    Up,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChordEvent {
    pub chord: Chord,
    pub kind: ChordEventKind,
}

impl ChordEvent {
    fn new(chord: Chord, kind: ChordEventKind) -> Self {
        Self { chord, kind }
    }
}

#[derive(Clone, Debug)]
enum ChordPhase {
    /// No chord-relevant button is held.
    Idle,
    /// Accumulating presses until the window closes or freezes early.
    Collecting { deadline: DateTime<Local> },
    /// A chord fired `down`; waiting for the first member release.
    Matched { chord: Chord },
    /// The attempt is over but buttons are still held. Nothing fires
    /// until all of them are released.
    Inert,
}

pub struct ChordMatcher {
    window: Duration,
    chords: Vec<Chord>,
    /// Union of all buttons referenced by any configured chord. Presses of
    /// other buttons never reach the matcher state.
    referenced: BTreeSet<ButtonId>,
    /// Chord-relevant buttons physically held right now.
    down: BTreeSet<ButtonId>,
    /// Buttons collected since the first press of the current attempt.
    /// Unlike `down` this only grows until the attempt resolves.
    tracked: BTreeSet<ButtonId>,
    phase: ChordPhase,
}

impl ChordMatcher {
    pub fn new(settings: &ControllerSettings) -> Self {
        Self {
            window: settings.multi_click(),
            chords: Vec::new(),
            referenced: BTreeSet::new(),
            down: BTreeSet::new(),
            tracked: BTreeSet::new(),
            phase: ChordPhase::Idle,
        }
    }

    /// Installs the chords of the active mode and drops any attempt in
    /// flight. Called on every mode switch.
    pub fn set_chords(&mut self, chords: Vec<Chord>) {
        self.referenced = chords
            .iter()
            .flat_map(|chord| chord.buttons().iter().copied())
            .collect();
        self.chords = chords;
        self.reset();
    }

    /// Feeds a press edge. Returns the chord events to publish.
    pub fn press(&mut self, button: ButtonId, now: DateTime<Local>) -> Vec<ChordEvent> {
        if !self.referenced.contains(&button) {
            return Vec::new();
        }
        self.down.insert(button);

        match self.phase {
            ChordPhase::Idle => {
                self.tracked.clear();
                self.tracked.insert(button);
                self.phase = ChordPhase::Collecting {
                    deadline: now + self.window,
                };
                self.evaluate()
            }
            ChordPhase::Collecting { .. } => {
                self.tracked.insert(button);
                self.evaluate()
            }
            ChordPhase::Matched { .. } | ChordPhase::Inert => {
                // A press after the attempt resolved joins nothing; the
                // button still has to clear before the next attempt.
                debug!("Dropping late chord press of {:?}", button);
                self.tracked.insert(button);
                Vec::new()
            }
        }
    }

    /// Feeds a release edge. A release while the window is still open
    /// resolves the attempt immediately, so a quick tap of a chord emits
    /// `down` and `up` from the same edge.
    pub fn release(&mut self, button: ButtonId, _now: DateTime<Local>) -> Vec<ChordEvent> {
        if !self.referenced.contains(&button) {
            return Vec::new();
        }
        self.down.remove(&button);

        let events = match &self.phase {
            ChordPhase::Idle => Vec::new(),
            ChordPhase::Collecting { .. } => {
                let mut events = self.close_window();
                if let ChordPhase::Matched { chord } = &self.phase {
                    // The releasing button ends the chord it just opened.
                    events.push(ChordEvent::new(chord.clone(), ChordEventKind::Up));
                    self.phase = ChordPhase::Inert;
                }
                events
            }
            ChordPhase::Matched { chord } => {
                if chord.contains(button) {
                    let event = ChordEvent::new(chord.clone(), ChordEventKind::Up);
                    self.phase = ChordPhase::Inert;
                    vec![event]
                } else {
                    // A dropped late joiner going away does not end the
                    // chord; only a member release does.
                    Vec::new()
                }
            }
            ChordPhase::Inert => Vec::new(),
        };

        if self.down.is_empty() {
            self.tracked.clear();
            self.phase = ChordPhase::Idle;
        }
        events
    }

    /// Closes any collection window whose deadline has passed.
    pub fn tick(&mut self, now: DateTime<Local>) -> Vec<ChordEvent> {
        match self.phase {
            ChordPhase::Collecting { deadline } if now >= deadline => self.close_window(),
            _ => Vec::new(),
        }
    }

    /// Drops all matcher state. Called on mode switches.
    pub fn reset(&mut self) {
        self.down.clear();
        self.tracked.clear();
        self.phase = ChordPhase::Idle;
    }

    /// Decides whether the open window can already be resolved: fires the
    /// chord when the collected set is an exact match that no configured
    /// chord extends, goes inert when no chord is reachable any more.
    fn evaluate(&mut self) -> Vec<ChordEvent> {
        let extendable = self
            .chords
            .iter()
            .any(|chord| chord.is_strict_superset(&self.tracked));
        if extendable {
            // More presses could still reach a larger chord; keep the
            // window open.
            return Vec::new();
        }
        self.close_window()
    }

    /// Resolves the attempt against the collected set, exact matches only.
    fn close_window(&mut self) -> Vec<ChordEvent> {
        let matched = self
            .chords
            .iter()
            .find(|chord| chord.matches(&self.tracked))
            .cloned();
        match matched {
            Some(chord) => {
                debug!("Chord {} matched", chord);
                self.phase = ChordPhase::Matched {
                    chord: chord.clone(),
                };
                vec![ChordEvent::new(chord, ChordEventKind::Down)]
            }
            None => {
                debug!("Chord attempt went inert");
                self.phase = ChordPhase::Inert;
                Vec::new()
            }
        }
    }
}
