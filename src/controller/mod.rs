//! Physical controller access via gilrs.

pub mod event_collector;

pub use event_collector::{
    CollectorError, CollectorHandle, CollectorSettings, EventCollector, RawControllerEvent,
};
