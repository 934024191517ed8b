//! Event fan-out
//!
//! Parsed log lines become [`LogEvent`]s and are distributed by the [`EventBus`]
//! to every consumer registered for their [`MsgType`].

mod bus;
mod log_event;

pub use bus::EventBus;
pub use log_event::{LogEvent, MsgType};

use thiserror::Error;

/// Errors raised by the event bus
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    /// The delivery queue is already registered
    #[error("Consumer queue already registered: {0}")]
    DuplicateConsumer(String),
}

/// Result type for event bus operations
pub type EventResult<T> = Result<T, EventError>;
