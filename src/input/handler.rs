//! Mode resolution and action dispatch.
//!
//! The handler owns the effective mode: on every switch it merges the
//! selected mode with the reserved global mode, installs the result's
//! chords in the matcher and subscribes one bus listener per binding, all
//! tagged so the next switch can remove them in one call. Keys pressed via
//! `key_down` are tracked so they are never pressed twice and are force
//! released on every mode switch and on shutdown. Navigation bindings
//! (mouse move, scroll) never go through the bus; they are read directly
//! by the per-frame motion update.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

use crate::config::{
    Action, ButtonEventKind, Config, ConfigError, Mode, StickEventKind, StickId, DEFAULT_MODE,
    GLOBAL_MODE,
};
use crate::outputs::{KeyboardOutput, MouseOutput, OverlayHandle};

use super::chords::{ChordEventKind, ChordMatcher};
use super::classifier::ButtonClassifier;
use super::motion::MotionModel;
use super::{InputBus, InputEvent, InputTrigger};

/// Tag on every bus listener the handler registers, so a mode switch can
/// drop exactly its own subscriptions.
pub const INPUT_HANDLER_TAG: &str = "input_handler";

pub struct InputHandler {
    config: Config,
    bus: Rc<InputBus>,
    classifier: Rc<RefCell<ButtonClassifier>>,
    matcher: Rc<RefCell<ChordMatcher>>,
    keyboard: Rc<dyn KeyboardOutput>,
    mouse: Rc<dyn MouseOutput>,
    overlay: Rc<dyn OverlayHandle>,
    /// Keys currently held through `key_down` actions, in press order.
    pressed_keys: Vec<String>,
    /// The merged mode whose bindings are live on the bus.
    active: Mode,
    motion: MotionModel,
}

impl InputHandler {
    /// Validates the config, builds the handler and activates the default
    /// mode. The handler lives behind `Rc<RefCell<_>>` because its bus
    /// listeners need to call back into it.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        bus: Rc<InputBus>,
        classifier: Rc<RefCell<ButtonClassifier>>,
        matcher: Rc<RefCell<ChordMatcher>>,
        keyboard: Rc<dyn KeyboardOutput>,
        mouse: Rc<dyn MouseOutput>,
        overlay: Rc<dyn OverlayHandle>,
    ) -> Result<Rc<RefCell<Self>>, ConfigError> {
        config.validate()?;
        let motion = MotionModel::new(&config.settings.cursor);

        let handler = Rc::new(RefCell::new(Self {
            config,
            bus,
            classifier,
            matcher,
            keyboard,
            mouse,
            overlay,
            pressed_keys: Vec::new(),
            active: Mode::named(DEFAULT_MODE),
            motion,
        }));
        Self::switch_mode(&handler, DEFAULT_MODE);
        Ok(handler)
    }

    pub fn active_mode(&self) -> &str {
        &self.active.name
    }

    /// Switches the effective mode. An unknown target logs a warning and
    /// falls back to the default mode rather than failing. Safe to call
    /// from inside a bus listener.
    pub fn switch_mode(this: &Rc<RefCell<Self>>, target: &str) {
        this.borrow_mut().release_all_keys();

        let (bus, classifier, matcher) = {
            let h = this.borrow();
            (
                Rc::clone(&h.bus),
                Rc::clone(&h.classifier),
                Rc::clone(&h.matcher),
            )
        };

        // No binding or timer of the old mode may leak into the new one.
        bus.unsubscribe_all(Some(INPUT_HANDLER_TAG));
        classifier.borrow_mut().reset();
        matcher.borrow_mut().reset();
        this.borrow_mut().motion.reset();

        let merged = {
            let h = this.borrow();
            let name = if h.config.modes.contains_key(target) {
                target
            } else {
                warn!("Unknown mode '{}', falling back to '{}'", target, DEFAULT_MODE);
                DEFAULT_MODE
            };
            Mode::merge(&h.config.modes[name], &h.config.modes[GLOBAL_MODE])
        };

        matcher.borrow_mut().set_chords(
            merged
                .chord_bindings
                .iter()
                .map(|binding| binding.buttons.clone())
                .collect(),
        );

        for (button, per_kind) in &merged.button_actions {
            for (kind, actions) in per_kind {
                Self::subscribe_actions(
                    this,
                    InputTrigger::Button(*button, *kind),
                    actions.clone(),
                );
            }
        }

        // Discrete actions on a stick fire from bus events; navigation
        // actions stay out of the bus entirely.
        for (stick, per_kind) in &merged.stick_actions {
            for (kind, actions) in per_kind {
                let discrete: Vec<Action> = actions
                    .iter()
                    .filter(|action| !action.is_navigation())
                    .cloned()
                    .collect();
                if !discrete.is_empty() {
                    Self::subscribe_actions(this, InputTrigger::Stick(*stick, *kind), discrete);
                }
            }
        }

        for binding in &merged.chord_bindings {
            for (kind, actions) in &binding.actions {
                let chord_kind = match kind {
                    ButtonEventKind::Down => ChordEventKind::Down,
                    ButtonEventKind::Up => ChordEventKind::Up,
                    other => {
                        warn!(
                            "Chord {} binds '{:?}', but chords only emit down/up",
                            binding.buttons, other
                        );
                        continue;
                    }
                };
                Self::subscribe_actions(
                    this,
                    InputTrigger::Chord(binding.buttons.clone(), chord_kind),
                    actions.clone(),
                );
            }
        }

        let (overlay, name) = {
            let mut h = this.borrow_mut();
            h.active = merged;
            (Rc::clone(&h.overlay), h.active.name.clone())
        };
        overlay.set_title(&name);
        info!("Switched to mode '{}'", name);
    }

    /// Executes one action. Key state bookkeeping happens here; everything
    /// else is handed straight to the output collaborators.
    pub fn execute(this: &Rc<RefCell<Self>>, action: &Action) {
        match action {
            Action::KeyDown { key } => {
                let keyboard = {
                    let mut h = this.borrow_mut();
                    if h.pressed_keys.iter().any(|k| k == key) {
                        debug!("Key '{}' is already down", key);
                        return;
                    }
                    h.pressed_keys.push(key.clone());
                    Rc::clone(&h.keyboard)
                };
                keyboard.press(key);
            }
            Action::KeyUp { key } => {
                // Only keys this handler pressed may be released; anything
                // else would inject a stray release into the OS.
                let keyboard = {
                    let mut h = this.borrow_mut();
                    if !h.pressed_keys.iter().any(|k| k == key) {
                        debug!("Key '{}' is not down", key);
                        return;
                    }
                    h.pressed_keys.retain(|k| k != key);
                    Rc::clone(&h.keyboard)
                };
                keyboard.release(key);
            }
            Action::KeyPress { key } => {
                // A tap is not tracked; it cannot be left hanging.
                let keyboard = Rc::clone(&this.borrow().keyboard);
                keyboard.press(key);
                keyboard.release(key);
            }
            Action::MouseDown { button } => {
                let mouse = Rc::clone(&this.borrow().mouse);
                mouse.press(*button);
            }
            Action::MouseUp { button } => {
                let mouse = Rc::clone(&this.borrow().mouse);
                mouse.release(*button);
            }
            Action::Type { text } => {
                let keyboard = Rc::clone(&this.borrow().keyboard);
                keyboard.type_text(text);
            }
            Action::SwitchMode { mode } => {
                let mode = mode.clone();
                Self::switch_mode(this, &mode);
            }
            Action::MouseMove | Action::Scroll => {
                warn!("Navigation action bound to a discrete event, ignoring");
            }
            Action::OpenCheatSheet {
                preferred_screen_index,
            } => {
                let overlay = Rc::clone(&this.borrow().overlay);
                overlay.open_cheat_sheet(*preferred_screen_index);
            }
            Action::CloseCheatSheet => {
                let overlay = Rc::clone(&this.borrow().overlay);
                overlay.close_cheat_sheet();
            }
            Action::ToggleCheatSheet {
                preferred_screen_index,
            } => {
                let overlay = Rc::clone(&this.borrow().overlay);
                overlay.toggle_cheat_sheet(*preferred_screen_index);
            }
        }
    }

    /// Runs the active mode's navigation bindings for one frame. Sticks
    /// without a sample this frame count as centered, which also resets
    /// their boost timers.
    pub fn update_frame(
        &mut self,
        sticks: &HashMap<StickId, (f32, f32)>,
        dt: f64,
        now: DateTime<Local>,
    ) {
        let bindings: Vec<(StickId, Vec<Action>)> = self
            .active
            .stick_actions
            .iter()
            .filter_map(|(stick, per_kind)| {
                per_kind.get(&StickEventKind::Move).map(|actions| {
                    let navigation: Vec<Action> = actions
                        .iter()
                        .filter(|action| action.is_navigation())
                        .cloned()
                        .collect();
                    (*stick, navigation)
                })
            })
            .filter(|(_, actions)| !actions.is_empty())
            .collect();

        for (stick, actions) in bindings {
            let (x, y) = sticks.get(&stick).copied().unwrap_or((0.0, 0.0));
            for action in actions {
                match action {
                    Action::MouseMove => {
                        let (dx, dy) = self.motion.cursor_delta(x as f64, y as f64, dt, now);
                        if dx != 0 || dy != 0 {
                            self.mouse.move_by(dx, dy);
                        }
                    }
                    Action::Scroll => {
                        let (dx, dy) = self.motion.scroll_delta(x as f64, y as f64, dt, now);
                        if dx != 0 || dy != 0 {
                            self.mouse.scroll(dx, dy);
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    /// Force releases every key the handler is still holding down.
    pub fn release_all_keys(&mut self) {
        if self.pressed_keys.is_empty() {
            return;
        }
        info!("Releasing {} held key(s)", self.pressed_keys.len());
        let keys: Vec<String> = self.pressed_keys.drain(..).collect();
        for key in keys {
            self.keyboard.release(&key);
        }
    }

    /// Shutdown: releases held keys, drops all bus listeners and closes
    /// the cheat sheet.
    pub fn stop(this: &Rc<RefCell<Self>>) {
        this.borrow_mut().release_all_keys();
        let (bus, overlay) = {
            let h = this.borrow();
            (Rc::clone(&h.bus), Rc::clone(&h.overlay))
        };
        bus.unsubscribe_all(Some(INPUT_HANDLER_TAG));
        overlay.close_cheat_sheet();
        info!("Input handler stopped");
    }

    fn subscribe_actions(this: &Rc<RefCell<Self>>, trigger: InputTrigger, actions: Vec<Action>) {
        let weak = Rc::downgrade(this);
        let bus = Rc::clone(&this.borrow().bus);
        bus.subscribe(
            Some(trigger),
            move |_payload: &InputEvent| {
                if let Some(handler) = weak.upgrade() {
                    for action in &actions {
                        InputHandler::execute(&handler, action);
                    }
                }
            },
            Some(INPUT_HANDLER_TAG),
            false,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ButtonId, Chord, ChordBinding, ControllerSettings, MouseButton, Settings,
    };
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct Log(RefCell<Vec<String>>);

    impl Log {
        fn push(&self, entry: String) {
            self.0.borrow_mut().push(entry);
        }

        fn take(&self) -> Vec<String> {
            std::mem::take(&mut self.0.borrow_mut())
        }
    }

    struct FakeKeyboard(Rc<Log>);

    impl KeyboardOutput for FakeKeyboard {
        fn press(&self, key: &str) {
            self.0.push(format!("press {key}"));
        }

        fn release(&self, key: &str) {
            self.0.push(format!("release {key}"));
        }

        fn type_text(&self, text: &str) {
            self.0.push(format!("type {text}"));
        }
    }

    struct FakeMouse(Rc<Log>);

    impl MouseOutput for FakeMouse {
        fn press(&self, button: MouseButton) {
            self.0.push(format!("mouse press {button:?}"));
        }

        fn release(&self, button: MouseButton) {
            self.0.push(format!("mouse release {button:?}"));
        }

        fn move_by(&self, dx: i32, dy: i32) {
            self.0.push(format!("move {dx} {dy}"));
        }

        fn scroll(&self, dx: i32, dy: i32) {
            self.0.push(format!("scroll {dx} {dy}"));
        }
    }

    struct FakeOverlay(Rc<Log>);

    impl OverlayHandle for FakeOverlay {
        fn set_title(&self, mode_name: &str) {
            self.0.push(format!("title {mode_name}"));
        }

        fn open_cheat_sheet(&self, _preferred_screen_index: Option<usize>) {
            self.0.push("open sheet".to_string());
        }

        fn close_cheat_sheet(&self) {
            self.0.push("close sheet".to_string());
        }

        fn toggle_cheat_sheet(&self, _preferred_screen_index: Option<usize>) {
            self.0.push("toggle sheet".to_string());
        }
    }

    fn key_down(key: &str) -> Action {
        Action::KeyDown {
            key: key.to_string(),
        }
    }

    fn key_up(key: &str) -> Action {
        Action::KeyUp {
            key: key.to_string(),
        }
    }

    fn test_config() -> Config {
        let mut default = Mode::named("default");
        default.button_actions.insert(
            ButtonId::FaceDown,
            BTreeMap::from([
                (ButtonEventKind::Down, vec![key_down("ctrl")]),
                (ButtonEventKind::Up, vec![key_up("ctrl")]),
                (
                    ButtonEventKind::Click,
                    vec![Action::SwitchMode {
                        mode: "typing".to_string(),
                    }],
                ),
            ]),
        );
        default.button_actions.insert(
            ButtonId::FaceUp,
            BTreeMap::from([(ButtonEventKind::Down, vec![Action::Scroll])]),
        );
        default.stick_actions.insert(
            StickId::StickLeft,
            BTreeMap::from([(StickEventKind::Move, vec![Action::MouseMove])]),
        );
        default.stick_actions.insert(
            StickId::StickRight,
            BTreeMap::from([(
                StickEventKind::Move,
                vec![
                    Action::SwitchMode {
                        mode: "typing".to_string(),
                    },
                    Action::Scroll,
                ],
            )]),
        );

        let mut typing = Mode::named("typing");
        typing.chord_bindings.push(ChordBinding {
            buttons: Chord::new([ButtonId::ShoulderL]),
            actions: BTreeMap::from([
                (ButtonEventKind::Down, vec![key_down("space")]),
                (ButtonEventKind::Up, vec![key_up("space")]),
            ]),
        });

        Config {
            settings: Settings::default(),
            modes: BTreeMap::from([
                ("global".to_string(), Mode::named("global")),
                ("default".to_string(), default),
                ("typing".to_string(), typing),
            ]),
        }
    }

    fn handler_with(config: Config) -> (Rc<RefCell<InputHandler>>, Rc<InputBus>, Rc<Log>) {
        let log = Rc::new(Log::default());
        let bus = Rc::new(InputBus::new());
        let settings = ControllerSettings::default();
        let classifier = Rc::new(RefCell::new(ButtonClassifier::new(&settings)));
        let matcher = Rc::new(RefCell::new(ChordMatcher::new(&settings)));

        let handler = InputHandler::new(
            config,
            Rc::clone(&bus),
            classifier,
            matcher,
            Rc::new(FakeKeyboard(Rc::clone(&log))),
            Rc::new(FakeMouse(Rc::clone(&log))),
            Rc::new(FakeOverlay(Rc::clone(&log))),
        )
        .unwrap();

        log.take();
        (handler, bus, log)
    }

    fn button_event(bus: &InputBus, button: ButtonId, kind: ButtonEventKind) {
        bus.publish(
            &InputTrigger::Button(button, kind),
            &InputEvent::Button { button, kind },
        );
    }

    #[test]
    fn key_down_is_deduplicated_until_released() {
        let (_handler, bus, log) = handler_with(test_config());

        button_event(&bus, ButtonId::FaceDown, ButtonEventKind::Down);
        button_event(&bus, ButtonId::FaceDown, ButtonEventKind::Down);
        assert_eq!(log.take(), vec!["press ctrl"]);

        button_event(&bus, ButtonId::FaceDown, ButtonEventKind::Up);
        button_event(&bus, ButtonId::FaceDown, ButtonEventKind::Down);
        assert_eq!(log.take(), vec!["release ctrl", "press ctrl"]);
    }

    #[test]
    fn key_up_for_an_untracked_key_is_a_noop() {
        let (_handler, bus, log) = handler_with(test_config());

        // Up is bound to key_up("ctrl"), but nothing pressed it.
        button_event(&bus, ButtonId::FaceDown, ButtonEventKind::Up);
        assert!(log.take().is_empty());

        // Once tracked, the same binding releases exactly once.
        button_event(&bus, ButtonId::FaceDown, ButtonEventKind::Down);
        button_event(&bus, ButtonId::FaceDown, ButtonEventKind::Up);
        button_event(&bus, ButtonId::FaceDown, ButtonEventKind::Up);
        assert_eq!(log.take(), vec!["press ctrl", "release ctrl"]);
    }

    #[test]
    fn mode_switch_releases_held_keys_before_rebinding() {
        let (_handler, bus, log) = handler_with(test_config());

        button_event(&bus, ButtonId::FaceDown, ButtonEventKind::Down);
        log.take();

        // Click is bound to switch_mode("typing").
        button_event(&bus, ButtonId::FaceDown, ButtonEventKind::Click);
        assert_eq!(log.take(), vec!["release ctrl", "title typing"]);
    }

    #[test]
    fn old_mode_bindings_stop_firing_after_a_switch() {
        let (handler, bus, log) = handler_with(test_config());

        InputHandler::switch_mode(&handler, "typing");
        log.take();

        button_event(&bus, ButtonId::FaceDown, ButtonEventKind::Down);
        assert!(log.take().is_empty());
    }

    #[test]
    fn chord_bindings_press_and_release_through_the_bus() {
        let (handler, bus, log) = handler_with(test_config());

        InputHandler::switch_mode(&handler, "typing");
        log.take();

        let chord = Chord::new([ButtonId::ShoulderL]);
        bus.publish(
            &InputTrigger::Chord(chord.clone(), ChordEventKind::Down),
            &InputEvent::Chord {
                chord: chord.clone(),
                kind: ChordEventKind::Down,
            },
        );
        bus.publish(
            &InputTrigger::Chord(chord.clone(), ChordEventKind::Up),
            &InputEvent::Chord {
                chord,
                kind: ChordEventKind::Up,
            },
        );

        assert_eq!(log.take(), vec!["press space", "release space"]);
    }

    #[test]
    fn unknown_mode_falls_back_to_default() {
        let (handler, _bus, log) = handler_with(test_config());

        InputHandler::switch_mode(&handler, "no-such-mode");

        assert_eq!(handler.borrow().active_mode(), "default");
        assert_eq!(log.take(), vec!["title default"]);
    }

    #[test]
    fn navigation_action_on_a_discrete_event_is_ignored() {
        let (_handler, bus, log) = handler_with(test_config());

        button_event(&bus, ButtonId::FaceUp, ButtonEventKind::Down);
        assert!(log.take().is_empty());
    }

    #[test]
    fn discrete_stick_binding_fires_through_the_bus() {
        let (handler, bus, log) = handler_with(test_config());

        bus.publish(
            &InputTrigger::Stick(StickId::StickRight, StickEventKind::Move),
            &InputEvent::Stick {
                stick: StickId::StickRight,
                x: 1.0,
                y: 0.0,
            },
        );

        assert_eq!(handler.borrow().active_mode(), "typing");
        assert_eq!(log.take(), vec!["title typing"]);
    }

    #[test]
    fn update_frame_moves_the_cursor_from_stick_deflection() {
        let (handler, _bus, log) = handler_with(test_config());

        // 500 px/s at unity speed for 10ms: exactly 5 pixels.
        let sticks = HashMap::from([(StickId::StickLeft, (1.0_f32, 0.0_f32))]);
        handler
            .borrow_mut()
            .update_frame(&sticks, 0.01, Local::now());

        assert_eq!(log.take(), vec!["move 5 0"]);
    }

    #[test]
    fn stop_releases_keys_and_drops_all_listeners() {
        let (handler, bus, log) = handler_with(test_config());

        button_event(&bus, ButtonId::FaceDown, ButtonEventKind::Down);
        log.take();

        InputHandler::stop(&handler);

        assert_eq!(log.take(), vec!["release ctrl", "close sheet"]);
        assert_eq!(bus.listener_count(), 0);
    }
}
