//! Collaborator seams for everything that leaves the process: keystroke and
//! mouse injection plus the overlay window. All calls are fire-and-forget
//! and assumed near-instantaneous; the input handler never consumes a
//! return value from them.
//!
//! The shipped implementations only log. Wiring a real injection backend
//! means implementing these traits, nothing else.

use crate::config::MouseButton;
use tracing::info;

/// Keystroke injection. Key symbols are the config-level names ("a",
/// "ctrl", "space", ...); translating them to OS keycodes is this
/// collaborator's job.
pub trait KeyboardOutput {
    fn press(&self, key: &str);
    fn release(&self, key: &str);
    fn type_text(&self, text: &str);
}

/// Mouse injection. `move_by` and `scroll` are no-ops on (0, 0).
pub trait MouseOutput {
    fn press(&self, button: MouseButton);
    fn release(&self, button: MouseButton);
    fn move_by(&self, dx: i32, dy: i32);
    fn scroll(&self, dx: i32, dy: i32);
}

/// The cheat-sheet overlay window.
pub trait OverlayHandle {
    fn set_title(&self, mode_name: &str);
    fn open_cheat_sheet(&self, preferred_screen_index: Option<usize>);
    fn close_cheat_sheet(&self);
    fn toggle_cheat_sheet(&self, preferred_screen_index: Option<usize>);
}

pub struct LoggingKeyboard;

impl KeyboardOutput for LoggingKeyboard {
    fn press(&self, key: &str) {
        info!("keyboard press: {}", key);
    }

    fn release(&self, key: &str) {
        info!("keyboard release: {}", key);
    }

    fn type_text(&self, text: &str) {
        info!("keyboard type: {:?}", text);
    }
}

pub struct LoggingMouse;

impl MouseOutput for LoggingMouse {
    fn press(&self, button: MouseButton) {
        info!("mouse press: {:?}", button);
    }

    fn release(&self, button: MouseButton) {
        info!("mouse release: {:?}", button);
    }

    fn move_by(&self, dx: i32, dy: i32) {
        if dx != 0 || dy != 0 {
            info!("mouse move: ({}, {})", dx, dy);
        }
    }

    fn scroll(&self, dx: i32, dy: i32) {
        if dx != 0 || dy != 0 {
            info!("mouse scroll: ({}, {})", dx, dy);
        }
    }
}

pub struct LoggingOverlay;

impl OverlayHandle for LoggingOverlay {
    fn set_title(&self, mode_name: &str) {
        info!("overlay title: {}", mode_name);
    }

    fn open_cheat_sheet(&self, preferred_screen_index: Option<usize>) {
        info!("overlay open cheat sheet on screen {:?}", preferred_screen_index);
    }

    fn close_cheat_sheet(&self) {
        info!("overlay close cheat sheet");
    }

    fn toggle_cheat_sheet(&self, preferred_screen_index: Option<usize>) {
        info!(
            "overlay toggle cheat sheet on screen {:?}",
            preferred_screen_index
        );
    }
}
