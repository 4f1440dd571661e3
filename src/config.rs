//! Configuration data model: buttons, sticks, actions, modes and settings.
//!
//! The whole graph derives serde and is persisted as TOML under the user's
//! config directory. Everything is immutable once loaded; the input handler
//! only ever reads it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Name of the mode the handler starts in and falls back to.
pub const DEFAULT_MODE: &str = "default";
/// Reserved mode merged into every active mode.
pub const GLOBAL_MODE: &str = "global";

/// A physical button on the controller.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ButtonId {
    DpadUp,
    DpadDown,
    DpadLeft,
    DpadRight,
    FaceUp,
    FaceDown,
    FaceLeft,
    FaceRight,
    ShoulderL,
    ShoulderR,
    TriggerL,
    TriggerR,
    StickLeft,
    StickRight,
    Minus,
    Plus,
    Home,
    Capture,
}

/// An analog stick on the controller.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StickId {
    StickLeft,
    StickRight,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

/// Semantic button events produced by the classifier.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ButtonEventKind {
    Down,
    Up,
    Click,
    DoubleClick,
    TripleClick,
    LongPress,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StickEventKind {
    Move,
}

/// An unordered set of buttons held simultaneously. Equality is set
/// equality, which also makes it usable as a bus trigger and map key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Chord(BTreeSet<ButtonId>);

impl Chord {
    pub fn new<I: IntoIterator<Item = ButtonId>>(buttons: I) -> Self {
        Self(buttons.into_iter().collect())
    }

    pub fn contains(&self, button: ButtonId) -> bool {
        self.0.contains(&button)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when every button of `other` is part of this chord and this
    /// chord has at least one button more.
    pub fn is_strict_superset(&self, other: &BTreeSet<ButtonId>) -> bool {
        self.0.len() > other.len() && self.0.is_superset(other)
    }

    pub fn matches(&self, buttons: &BTreeSet<ButtonId>) -> bool {
        &self.0 == buttons
    }

    pub fn buttons(&self) -> &BTreeSet<ButtonId> {
        &self.0
    }
}

impl fmt::Display for Chord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.0.iter().map(|b| format!("{:?}", b)).collect();
        write!(f, "{{{}}}", names.join("+"))
    }
}

/// A single executable action. The enum is closed on purpose: new action
/// kinds are compile-time checked additions, not runtime string tags.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    KeyDown {
        key: String,
    },
    KeyUp {
        key: String,
    },
    KeyPress {
        key: String,
    },
    MouseDown {
        button: MouseButton,
    },
    MouseUp {
        button: MouseButton,
    },
    MouseMove,
    Scroll,
    Type {
        text: String,
    },
    SwitchMode {
        mode: String,
    },
    OpenCheatSheet {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        preferred_screen_index: Option<usize>,
    },
    CloseCheatSheet,
    ToggleCheatSheet {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        preferred_screen_index: Option<usize>,
    },
}

impl Action {
    /// Navigation actions are driven by the per-frame motion update, never
    /// through the event bus.
    pub fn is_navigation(&self) -> bool {
        matches!(self, Action::MouseMove | Action::Scroll)
    }
}

/// Ordered action lists per button event. Order is execution order.
pub type ButtonActions = BTreeMap<ButtonEventKind, Vec<Action>>;
/// Ordered action lists per stick event.
pub type StickActions = BTreeMap<StickEventKind, Vec<Action>>;

/// A chord plus the actions bound to its down/up events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChordBinding {
    pub buttons: Chord,
    pub actions: ButtonActions,
}

/// One mode of control with its button, stick and chord bindings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Mode {
    /// Display name shown by the overlay.
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub button_actions: BTreeMap<ButtonId, ButtonActions>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub stick_actions: BTreeMap<StickId, StickActions>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chord_bindings: Vec<ChordBinding>,
}

impl Mode {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            button_actions: BTreeMap::new(),
            stick_actions: BTreeMap::new(),
            chord_bindings: Vec::new(),
        }
    }

    /// Rejects two bindings on the same chord. Ambiguous chords are a
    /// configuration error, not something to resolve at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen: BTreeSet<&Chord> = BTreeSet::new();
        for binding in &self.chord_bindings {
            if !seen.insert(&binding.buttons) {
                return Err(ConfigError::DuplicateChord {
                    chord: binding.buttons.clone(),
                    mode: self.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Merges `global` into `selected`: per-key entries from the selected
    /// mode win, global entries fill the gaps, chord bindings are unioned
    /// keyed by chord with the selected mode winning ties. The result is
    /// derived on every switch and never persisted.
    pub fn merge(selected: &Mode, global: &Mode) -> Mode {
        let mut merged = selected.clone();

        for (button, actions) in &global.button_actions {
            merged
                .button_actions
                .entry(*button)
                .or_insert_with(|| actions.clone());
        }
        for (stick, actions) in &global.stick_actions {
            merged
                .stick_actions
                .entry(*stick)
                .or_insert_with(|| actions.clone());
        }

        let existing: BTreeSet<Chord> = merged
            .chord_bindings
            .iter()
            .map(|b| b.buttons.clone())
            .collect();
        for binding in &global.chord_bindings {
            if !existing.contains(&binding.buttons) {
                merged.chord_bindings.push(binding.clone());
            }
        }

        merged
    }
}

/// Timing settings for the classifier and the chord matcher, in seconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControllerSettings {
    /// Stick deflection below this is reported as zero by the backend.
    pub deadzone: f64,
    /// Held longer than this and a press becomes a long press.
    pub single_click_duration: f64,
    /// Maximum gap between release and re-press to continue a click chain.
    pub double_click_duration: f64,
    /// Window during which buttons accumulate into a chord.
    pub multi_click_duration: f64,
}

impl ControllerSettings {
    pub fn single_click(&self) -> chrono::Duration {
        secs_to_duration(self.single_click_duration)
    }

    pub fn double_click(&self) -> chrono::Duration {
        secs_to_duration(self.double_click_duration)
    }

    pub fn multi_click(&self) -> chrono::Duration {
        secs_to_duration(self.multi_click_duration)
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            deadzone: 0.1,
            single_click_duration: 0.6,
            double_click_duration: 0.2,
            multi_click_duration: 0.2,
        }
    }
}

/// Cursor and scroll tuning for the motion model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CursorSettings {
    /// Pixels per second at full deflection without boost.
    pub cursor_speed: f64,
    /// Additional speed multiplier reached at full boost.
    pub cursor_boost_speed: f64,
    /// Full deflection must be held this long before boost kicks in.
    pub cursor_boost_acceleration_delay: f64,
    /// Time the boost takes to ramp from 1x to its ceiling.
    pub cursor_boost_acceleration_time: f64,
    /// Scroll steps per second at full deflection.
    pub scroll_speed: f64,
}

impl Default for CursorSettings {
    fn default() -> Self {
        Self {
            cursor_speed: 500.0,
            cursor_boost_speed: 10.0,
            cursor_boost_acceleration_delay: 0.1,
            cursor_boost_acceleration_time: 0.5,
            scroll_speed: 0.5,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub controller: ControllerSettings,
    #[serde(default)]
    pub cursor: CursorSettings,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("duplicate chord binding {chord} in mode '{mode}'")]
    DuplicateChord { chord: Chord, mode: String },

    #[error("required mode '{0}' is missing from the configuration")]
    MissingMode(String),

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// The full configuration graph consumed by the input handler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    pub modes: BTreeMap<String, Mode>,
}

impl Config {
    /// Checks the invariants the rest of the system relies on: the
    /// reserved modes exist and no mode carries an ambiguous chord.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for required in [DEFAULT_MODE, GLOBAL_MODE] {
            if !self.modes.contains_key(required) {
                return Err(ConfigError::MissingMode(required.to_string()));
            }
        }
        for mode in self.modes.values() {
            mode.validate()?;
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw)?;
        config.validate()?;
        info!("Config loaded from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        info!("Config saved to {}", path.display());
        Ok(())
    }

    /// Loads the config from the default location, falling back to the
    /// built-in profile when the file is missing or broken.
    pub fn load_or_default() -> Config {
        let Some(path) = Config::default_path() else {
            warn!("No config directory available, using built-in config");
            return Config::default_config();
        };
        if !path.exists() {
            info!(
                "Config file not found at {}, using built-in config",
                path.display()
            );
            return Config::default_config();
        }
        match Config::load(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to load config ({}), using built-in config", e);
                Config::default_config()
            }
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("chordcontroller").join("config.toml"))
    }

    /// The built-in binding profile: mouse-centric `default` mode, a
    /// `selection` mode on the dpad, and a chord-typing mode reproducing a
    /// keyboard from button combinations.
    pub fn default_config() -> Config {
        let mut modes = BTreeMap::new();
        modes.insert(GLOBAL_MODE.to_string(), global_mode());
        modes.insert(DEFAULT_MODE.to_string(), default_mode());
        modes.insert("selection".to_string(), selection_mode());
        modes.insert("typing".to_string(), typing_mode());
        Config {
            settings: Settings::default(),
            modes,
        }
    }
}

pub(crate) fn secs_to_duration(secs: f64) -> chrono::Duration {
    chrono::Duration::microseconds((secs * 1_000_000.0) as i64)
}

// ---------------------------------------------------------------------------
// Built-in profile helpers

fn key_down(key: &str) -> Action {
    Action::KeyDown { key: key.into() }
}

fn key_up(key: &str) -> Action {
    Action::KeyUp { key: key.into() }
}

fn switch(mode: &str) -> Action {
    Action::SwitchMode { mode: mode.into() }
}

/// down presses the key, up releases it.
fn hold_key(key: &str) -> ButtonActions {
    BTreeMap::from([
        (ButtonEventKind::Down, vec![key_down(key)]),
        (ButtonEventKind::Up, vec![key_up(key)]),
    ])
}

fn hold_mouse(button: MouseButton) -> ButtonActions {
    BTreeMap::from([
        (ButtonEventKind::Down, vec![Action::MouseDown { button }]),
        (ButtonEventKind::Up, vec![Action::MouseUp { button }]),
    ])
}

fn on_down(actions: Vec<Action>) -> ButtonActions {
    BTreeMap::from([(ButtonEventKind::Down, actions)])
}

fn on_click(action: Action) -> ButtonActions {
    BTreeMap::from([(ButtonEventKind::Click, vec![action])])
}

fn on_move(actions: Vec<Action>) -> StickActions {
    BTreeMap::from([(StickEventKind::Move, actions)])
}

/// Chord that holds one or more keys: downs in order, ups in the same order.
fn chord_keys(buttons: &[ButtonId], keys: &[&str]) -> ChordBinding {
    ChordBinding {
        buttons: Chord::new(buttons.iter().copied()),
        actions: BTreeMap::from([
            (
                ButtonEventKind::Down,
                keys.iter().map(|k| key_down(k)).collect(),
            ),
            (
                ButtonEventKind::Up,
                keys.iter().map(|k| key_up(k)).collect(),
            ),
        ]),
    }
}

fn global_mode() -> Mode {
    Mode {
        name: "Global".into(),
        button_actions: BTreeMap::from([
            (ButtonId::Home, on_down(vec![switch(DEFAULT_MODE)])),
            (ButtonId::Capture, hold_key("esc")),
            (
                ButtonId::Plus,
                on_down(vec![Action::ToggleCheatSheet {
                    preferred_screen_index: Some(2),
                }]),
            ),
        ]),
        stick_actions: BTreeMap::new(),
        chord_bindings: Vec::new(),
    }
}

fn default_mode() -> Mode {
    Mode {
        name: "Default".into(),
        button_actions: BTreeMap::from([
            (ButtonId::DpadUp, on_down(vec![switch("selection")])),
            (ButtonId::DpadDown, on_down(vec![switch("selection")])),
            (ButtonId::DpadLeft, on_down(vec![switch("selection")])),
            (ButtonId::DpadRight, on_down(vec![switch("selection")])),
            (ButtonId::FaceRight, hold_mouse(MouseButton::Left)),
            (ButtonId::FaceDown, hold_mouse(MouseButton::Right)),
            (ButtonId::FaceUp, hold_mouse(MouseButton::Middle)),
            (ButtonId::StickRight, hold_mouse(MouseButton::Middle)),
            (ButtonId::ShoulderL, on_click(switch("typing"))),
            (ButtonId::ShoulderR, hold_key("alt")),
            (ButtonId::TriggerR, hold_key("ctrl")),
            (ButtonId::TriggerL, hold_key("shift")),
        ]),
        stick_actions: BTreeMap::from([
            (StickId::StickLeft, on_move(vec![Action::MouseMove])),
            (StickId::StickRight, on_move(vec![Action::Scroll])),
        ]),
        chord_bindings: Vec::new(),
    }
}

fn selection_mode() -> Mode {
    Mode {
        name: "Selection".into(),
        button_actions: BTreeMap::from([
            (ButtonId::DpadUp, hold_key("up")),
            (ButtonId::DpadRight, hold_key("right")),
            (ButtonId::DpadDown, hold_key("down")),
            (ButtonId::DpadLeft, hold_key("left")),
            (ButtonId::FaceUp, hold_key("shift")),
            (ButtonId::FaceRight, hold_key("cmd")),
            (ButtonId::FaceDown, hold_key("alt")),
            (ButtonId::StickLeft, hold_key("ctrl")),
            (ButtonId::ShoulderL, on_click(switch("typing"))),
            (ButtonId::ShoulderR, on_click(switch("typing"))),
            (ButtonId::TriggerL, hold_key("pos1")),
            (ButtonId::TriggerR, hold_key("end")),
        ]),
        stick_actions: BTreeMap::from([
            (StickId::StickLeft, on_move(vec![switch(DEFAULT_MODE)])),
            (StickId::StickRight, on_move(vec![switch(DEFAULT_MODE)])),
        ]),
        chord_bindings: Vec::new(),
    }
}

fn typing_mode() -> Mode {
    use ButtonId::*;
    let chord_bindings = vec![
        chord_keys(&[DpadLeft], &["a"]),
        chord_keys(&[FaceLeft, ShoulderR], &["b"]),
        chord_keys(&[ShoulderR, FaceUp], &["c"]),
        chord_keys(&[FaceDown], &["d"]),
        chord_keys(&[TriggerL], &["e"]),
        chord_keys(&[TriggerR, FaceDown], &["f"]),
        chord_keys(&[TriggerR, FaceLeft], &["g"]),
        chord_keys(&[TriggerL, FaceRight], &["h"]),
        chord_keys(&[DpadDown], &["i"]),
        chord_keys(&[TriggerR, ShoulderR, FaceUp], &["j"]),
        chord_keys(&[TriggerR, ShoulderR, FaceDown], &["k"]),
        chord_keys(&[ShoulderR, FaceDown], &["l"]),
        chord_keys(&[FaceLeft], &["m"]),
        chord_keys(&[TriggerR], &["n"]),
        chord_keys(&[DpadRight], &["o"]),
        chord_keys(&[TriggerR, FaceRight], &["p"]),
        chord_keys(&[TriggerR, FaceRight, FaceUp], &["q"]),
        chord_keys(&[ShoulderR, FaceRight], &["r"]),
        chord_keys(&[FaceUp], &["s"]),
        chord_keys(&[FaceRight], &["t"]),
        chord_keys(&[DpadUp], &["u"]),
        chord_keys(&[FaceLeft, FaceDown], &["v"]),
        chord_keys(&[TriggerR, ShoulderR], &["w"]),
        chord_keys(&[ShoulderR, FaceRight, FaceUp], &["x"]),
        chord_keys(&[ShoulderR, FaceRight, TriggerL], &["y"]),
        chord_keys(&[FaceLeft, ShoulderR, FaceDown], &["z"]),
        chord_keys(&[ShoulderL], &["space"]),
        chord_keys(&[ShoulderR], &["enter"]),
        chord_keys(&[ShoulderR, ShoulderL], &["backspace"]),
        chord_keys(&[ShoulderR, DpadUp, ShoulderL], &["esc"]),
        chord_keys(&[FaceRight, ShoulderR, FaceDown], &["tab"]),
        chord_keys(&[ShoulderR, DpadRight], &["ctrl", "c"]),
        chord_keys(&[TriggerR, FaceRight, FaceDown], &["ctrl", "v"]),
        chord_keys(&[TriggerL, ShoulderL, DpadRight], &["ctrl", "a"]),
    ];
    Mode {
        name: "Typing".into(),
        button_actions: BTreeMap::new(),
        stick_actions: BTreeMap::from([
            (StickId::StickLeft, on_move(vec![switch(DEFAULT_MODE)])),
            (StickId::StickRight, on_move(vec![Action::Scroll])),
        ]),
        chord_bindings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_passes_validation() {
        let config = Config::default_config();
        config.validate().expect("built-in config should be valid");
    }

    #[test]
    fn duplicate_chord_in_mode_is_rejected() {
        let mut mode = Mode::named("typing");
        mode.chord_bindings = vec![
            chord_keys(&[ButtonId::ShoulderL], &["space"]),
            chord_keys(&[ButtonId::ShoulderL], &["enter"]),
        ];
        let err = mode.validate().unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateChord { .. }));
    }

    #[test]
    fn chord_equality_ignores_order() {
        let a = Chord::new([ButtonId::TriggerR, ButtonId::FaceUp]);
        let b = Chord::new([ButtonId::FaceUp, ButtonId::TriggerR]);
        assert_eq!(a, b);
    }

    #[test]
    fn merge_prefers_selected_mode_and_fills_gaps() {
        let mut selected = Mode::named("selection");
        selected
            .button_actions
            .insert(ButtonId::Home, hold_key("tab"));
        selected.chord_bindings = vec![chord_keys(&[ButtonId::ShoulderL], &["space"])];

        let mut global = Mode::named("global");
        global
            .button_actions
            .insert(ButtonId::Home, on_down(vec![switch(DEFAULT_MODE)]));
        global
            .button_actions
            .insert(ButtonId::Capture, hold_key("esc"));
        global.chord_bindings = vec![
            chord_keys(&[ButtonId::ShoulderL], &["enter"]),
            chord_keys(&[ButtonId::ShoulderR], &["enter"]),
        ];

        let merged = Mode::merge(&selected, &global);

        // Selected mode wins ties, global fills the rest.
        assert_eq!(merged.button_actions[&ButtonId::Home], hold_key("tab"));
        assert_eq!(merged.button_actions[&ButtonId::Capture], hold_key("esc"));

        // Chords are unioned by chord, selected winning.
        assert_eq!(merged.chord_bindings.len(), 2);
        assert_eq!(
            merged.chord_bindings[0],
            chord_keys(&[ButtonId::ShoulderL], &["space"])
        );
        assert_eq!(
            merged.chord_bindings[1],
            chord_keys(&[ButtonId::ShoulderR], &["enter"])
        );
        merged.validate().expect("merged mode has no duplicates");
    }

    #[test]
    fn missing_reserved_mode_is_rejected() {
        let mut config = Config::default_config();
        config.modes.remove(GLOBAL_MODE);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingMode(_)));
    }

    #[test]
    fn config_roundtrips_through_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");

        let config = Config::default_config();
        config.save(&path).expect("save");
        let loaded = Config::load(&path).expect("load");

        assert_eq!(config, loaded);
    }
}
