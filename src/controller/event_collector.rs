//! Gamepad event collection.
//!
//! Polls gilrs for raw gamepad events, maps them onto [`ButtonId`] and
//! [`StickId`], applies the stick dead zone and forwards everything as
//! timestamped edges into the engine's queue. Triggers are treated as
//! buttons; their analog travel is not used.

use chrono::{DateTime, Local};
use gilrs::{Axis, Button, Event, EventType, Gamepad, GamepadId, Gilrs};
use statum::{machine, state};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::{ButtonId, StickId};

/// A raw edge from the physical controller, timestamped at receipt.
#[derive(Debug, Clone)]
pub enum RawControllerEvent {
    ButtonEdge {
        button: ButtonId,
        pressed: bool,
        timestamp: DateTime<Local>,
    },
    StickMove {
        stick: StickId,
        x: f32,
        y: f32,
        timestamp: DateTime<Local>,
    },
}

#[derive(Clone, Debug)]
pub struct CollectorSettings {
    pub joystick_deadzone: f32,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            joystick_deadzone: 0.1,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("Failed to initialize collector: {0}")]
    InitializationError(String),

    #[error("Failed to send event: {0}")]
    EventSendError(String),
}

#[state]
#[derive(Debug, Clone)]
pub enum CollectionState {
    Initializing,
    Collecting,
}

#[machine]
#[derive(Debug)]
pub struct EventCollector<S: CollectionState> {
    gilrs: Gilrs,
    active_gamepad: Option<GamepadId>,
    settings: CollectorSettings,
    event_sender: mpsc::Sender<RawControllerEvent>,

    // Last dead-zone-adjusted axis values, so single-axis gilrs events
    // can be forwarded as full (x, y) samples.
    last_left_x: f32,
    last_left_y: f32,
    last_right_x: f32,
    last_right_y: f32,
}

impl<S: CollectionState> EventCollector<S> {
    pub fn settings(&self) -> &CollectorSettings {
        &self.settings
    }
}

impl EventCollector<Initializing> {
    pub fn create(
        settings: Option<CollectorSettings>,
        event_sender: mpsc::Sender<RawControllerEvent>,
    ) -> Result<Self, CollectorError> {
        let settings = settings.unwrap_or_default();
        debug!("Creating event collector with settings: {:?}", settings);

        info!("Initializing gilrs controller interface");
        let gilrs = match Gilrs::new() {
            Ok(g) => g,
            Err(e) => {
                error!("Failed to initialize gilrs: {}", e);
                return Err(CollectorError::InitializationError(e.to_string()));
            }
        };

        Ok(Self::new(
            gilrs,
            None,
            settings,
            event_sender,
            0.0,
            0.0,
            0.0,
            0.0,
        ))
    }

    /// Picks the gamepad to listen to and transitions to collecting.
    pub fn initialize(mut self) -> Result<EventCollector<Collecting>, CollectorError> {
        let gamepads: Vec<(GamepadId, Gamepad<'_>)> = self.gilrs.gamepads().collect();

        if gamepads.is_empty() {
            warn!("No gamepad connected, waiting for one to appear");
        } else {
            info!("Found {} gamepad(s):", gamepads.len());
            for (id, gamepad) in &gamepads {
                info!("  ID: {}, Name: {}", id, gamepad.name());
            }
            let (id, gamepad) = &gamepads[0];
            self.active_gamepad = Some(*id);
            info!("Selected gamepad: {} ({})", gamepad.name(), id);
        }

        Ok(self.transition())
    }
}

impl EventCollector<Collecting> {
    /// Forwards at most one pending gilrs event into the engine queue.
    pub fn collect_next_event(&mut self) -> Result<(), CollectorError> {
        if let Some(Event { id, event, .. }) = self.gilrs.next_event() {
            if let Some(active_id) = self.active_gamepad {
                if id != active_id {
                    debug!("Skipping event from non-active gamepad {:?}", id);
                    return Ok(());
                }
            } else {
                // First event from any pad adopts it.
                info!("Adopting gamepad {:?}", id);
                self.active_gamepad = Some(id);
            }

            if let Some(raw_event) = self.convert_gilrs_event(event) {
                if let RawControllerEvent::ButtonEdge {
                    button, pressed, ..
                } = &raw_event
                {
                    debug!("Button edge: {:?} pressed={}", button, pressed);
                }
                if let Err(e) = self.event_sender.try_send(raw_event) {
                    error!("Failed to queue controller event: {}", e);
                    return Err(CollectorError::EventSendError(e.to_string()));
                }
            }
        }

        Ok(())
    }

    pub fn run_collection_loop(&mut self) -> Result<(), CollectorError> {
        info!("Starting event collector loop");

        loop {
            if let Err(e) = self.collect_next_event() {
                error!("Error collecting event: {}", e);
            }

            // gilrs polling is non-blocking; yield briefly between polls.
            std::thread::sleep(std::time::Duration::from_micros(100));
        }
    }

    fn convert_gilrs_event(&mut self, event: EventType) -> Option<RawControllerEvent> {
        let now = Local::now();

        match event {
            EventType::AxisChanged(axis, value, _) => {
                let deadzone = self.settings.joystick_deadzone;
                match axis {
                    Axis::LeftStickX => {
                        self.last_left_x = apply_deadzone(value, deadzone);
                        Some(self.stick_sample(StickId::StickLeft, now))
                    }
                    Axis::LeftStickY => {
                        self.last_left_y = apply_deadzone(value, deadzone);
                        Some(self.stick_sample(StickId::StickLeft, now))
                    }
                    Axis::RightStickX => {
                        self.last_right_x = apply_deadzone(value, deadzone);
                        Some(self.stick_sample(StickId::StickRight, now))
                    }
                    Axis::RightStickY => {
                        self.last_right_y = apply_deadzone(value, deadzone);
                        Some(self.stick_sample(StickId::StickRight, now))
                    }
                    _ => {
                        debug!("Ignoring unsupported axis: {:?}", axis);
                        None
                    }
                }
            }
            EventType::ButtonPressed(button, _) => map_button(button).map(|button| {
                RawControllerEvent::ButtonEdge {
                    button,
                    pressed: true,
                    timestamp: now,
                }
            }),
            EventType::ButtonReleased(button, _) => map_button(button).map(|button| {
                RawControllerEvent::ButtonEdge {
                    button,
                    pressed: false,
                    timestamp: now,
                }
            }),
            EventType::ButtonRepeated(button, _) => {
                debug!("Button repeat ignored: {:?}", button);
                None
            }
            EventType::Connected => {
                info!("Controller connected");
                None
            }
            EventType::Disconnected => {
                warn!("Controller disconnected");
                None
            }
            _ => {
                debug!("Unhandled event type: {:?}", event);
                None
            }
        }
    }

    fn stick_sample(&self, stick: StickId, timestamp: DateTime<Local>) -> RawControllerEvent {
        let (x, y) = match stick {
            StickId::StickLeft => (self.last_left_x, self.last_left_y),
            StickId::StickRight => (self.last_right_x, self.last_right_y),
        };
        RawControllerEvent::StickMove {
            stick,
            x,
            y,
            timestamp,
        }
    }
}

/// Public interface for spawning and running the collector.
pub struct CollectorHandle {
    event_sender: mpsc::Sender<RawControllerEvent>,
}

impl CollectorHandle {
    pub fn spawn(
        settings: Option<CollectorSettings>,
        event_sender: mpsc::Sender<RawControllerEvent>,
    ) -> Result<Self, CollectorError> {
        let sender_clone = event_sender.clone();
        let collector = EventCollector::create(settings, event_sender)?;

        tokio::spawn(async move {
            match collector.initialize() {
                Ok(mut collecting) => {
                    if let Err(e) = collecting.run_collection_loop() {
                        error!("Collector task terminated with error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Failed to initialize event collector: {}", e);
                }
            }
        });
        info!("Event collector started");

        Ok(Self {
            event_sender: sender_clone,
        })
    }

    pub fn event_sender(&self) -> mpsc::Sender<RawControllerEvent> {
        self.event_sender.clone()
    }
}

fn map_button(button: Button) -> Option<ButtonId> {
    match button {
        Button::South => Some(ButtonId::FaceDown),
        Button::East => Some(ButtonId::FaceRight),
        Button::West => Some(ButtonId::FaceLeft),
        Button::North => Some(ButtonId::FaceUp),
        Button::LeftTrigger => Some(ButtonId::ShoulderL),
        Button::RightTrigger => Some(ButtonId::ShoulderR),
        Button::LeftTrigger2 => Some(ButtonId::TriggerL),
        Button::RightTrigger2 => Some(ButtonId::TriggerR),
        Button::Select => Some(ButtonId::Minus),
        Button::Start => Some(ButtonId::Plus),
        Button::Mode => Some(ButtonId::Home),
        Button::C => Some(ButtonId::Capture),
        Button::LeftThumb => Some(ButtonId::StickLeft),
        Button::RightThumb => Some(ButtonId::StickRight),
        Button::DPadUp => Some(ButtonId::DpadUp),
        Button::DPadDown => Some(ButtonId::DpadDown),
        Button::DPadLeft => Some(ButtonId::DpadLeft),
        Button::DPadRight => Some(ButtonId::DpadRight),
        _ => None,
    }
}

/// Rescales an axis value to the range outside the dead zone.
fn apply_deadzone(value: f32, deadzone: f32) -> f32 {
    if value.abs() < deadzone {
        0.0
    } else {
        let sign = if value < 0.0 { -1.0 } else { 1.0 };
        sign * (value.abs() - deadzone) / (1.0 - deadzone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadzone_zeroes_small_values() {
        assert_eq!(apply_deadzone(0.05, 0.1), 0.0);
        assert_eq!(apply_deadzone(-0.09, 0.1), 0.0);
    }

    #[test]
    fn deadzone_rescales_to_the_full_range() {
        assert_eq!(apply_deadzone(1.0, 0.1), 1.0);
        assert_eq!(apply_deadzone(-1.0, 0.1), -1.0);
        // Just past the dead zone maps to just past zero.
        assert!(apply_deadzone(0.11, 0.1) < 0.02);
    }

    #[test]
    fn face_and_shoulder_buttons_map() {
        assert_eq!(map_button(Button::South), Some(ButtonId::FaceDown));
        assert_eq!(map_button(Button::North), Some(ButtonId::FaceUp));
        assert_eq!(map_button(Button::LeftTrigger), Some(ButtonId::ShoulderL));
        assert_eq!(map_button(Button::RightTrigger2), Some(ButtonId::TriggerR));
        assert_eq!(map_button(Button::Unknown), None);
    }
}
