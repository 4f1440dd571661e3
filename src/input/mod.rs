//! The input-event resolution engine.
//!
//! Raw controller edges flow into the per-button [`classifier`] and the
//! [`chords`] matcher; their semantic events are published on the shared
//! event bus where the [`handler`] has subscribed the active mode's
//! bindings. The [`motion`] model runs once per frame, independent of the
//! discrete pipeline. The [`engine`] ties it all together in a tick loop.

pub mod chords;
pub mod classifier;
pub mod engine;
pub mod handler;
pub mod motion;

use crate::config::{ButtonEventKind, ButtonId, Chord, StickEventKind, StickId};
use crate::events::Events;

pub use chords::{ChordEvent, ChordEventKind, ChordMatcher};
pub use classifier::{ButtonClassifier, ButtonEvent};
pub use engine::{run_engine_loop, EngineError, EngineSettings, InputEngine};
pub use handler::{InputHandler, INPUT_HANDLER_TAG};
pub use motion::MotionModel;

/// Trigger key for the event bus. Listeners match on exact equality, so a
/// chord trigger only fires for the exact configured button set.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum InputTrigger {
    Button(ButtonId, ButtonEventKind),
    Stick(StickId, StickEventKind),
    Chord(Chord, ChordEventKind),
}

/// Payload handed to listeners; mirrors the trigger with the data a
/// listener could need.
#[derive(Clone, Debug, PartialEq)]
pub enum InputEvent {
    Button {
        button: ButtonId,
        kind: ButtonEventKind,
    },
    Stick {
        stick: StickId,
        x: f32,
        y: f32,
    },
    Chord {
        chord: Chord,
        kind: ChordEventKind,
    },
}

/// The process-wide event bus all input components publish on.
pub type InputBus = Events<InputTrigger, InputEvent>;
