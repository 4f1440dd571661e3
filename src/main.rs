pub mod config;
pub mod controller;
pub mod events;
pub mod input;
pub mod outputs;

use crate::config::Config;
use crate::controller::event_collector::{CollectorHandle, CollectorSettings};
use crate::input::{
    run_engine_loop, ButtonClassifier, ChordMatcher, InputBus, InputEngine, InputHandler,
};
use crate::outputs::{LoggingKeyboard, LoggingMouse, LoggingOverlay};
use color_eyre::eyre::eyre;
use color_eyre::Result;
use std::cell::RefCell;
use std::rc::Rc;
use tokio::sync::mpsc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config = Config::load_or_default();
    info!("Configuration ready with {} mode(s)", config.modes.len());

    let collector_settings = CollectorSettings {
        joystick_deadzone: config.settings.controller.deadzone as f32,
    };

    let (event_sender, event_receiver) = mpsc::channel(1000);
    let _collector = CollectorHandle::spawn(Some(collector_settings), event_sender)
        .map_err(|e| eyre!("Failed to spawn event collector: {}", e))?;

    // The whole discrete pipeline lives on the main task; nothing here
    // needs to cross a thread.
    let bus = Rc::new(InputBus::new());
    let classifier = Rc::new(RefCell::new(ButtonClassifier::new(
        &config.settings.controller,
    )));
    let matcher = Rc::new(RefCell::new(ChordMatcher::new(&config.settings.controller)));

    let handler = InputHandler::new(
        config,
        Rc::clone(&bus),
        Rc::clone(&classifier),
        Rc::clone(&matcher),
        Rc::new(LoggingKeyboard),
        Rc::new(LoggingMouse),
        Rc::new(LoggingOverlay),
    )?;

    let engine = InputEngine::create(
        event_receiver,
        None,
        bus,
        classifier,
        matcher,
        Rc::clone(&handler),
    )?;

    let result = run_engine_loop(engine).await;
    InputHandler::stop(&handler);
    result.map_err(|e| eyre!("Input engine stopped: {}", e))
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
