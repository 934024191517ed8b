//! Error types for the action bus
//!
//! Every failure an issuer can observe through a result handle is one of these.

use crate::model::ParseError;
use crate::rcon::RconError;
use crate::store::StoreError;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while executing an action
#[derive(Debug, Error)]
pub enum ActionError {
    /// A server, player or record could not be resolved
    #[error("Not found: {0}")]
    NotFound(String),

    /// The action's arguments were malformed
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The backing store failed
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Remote console failure
    #[error("RCON error: {0}")]
    Rcon(#[from] RconError),

    /// The handler exceeded its time bound
    #[error("Action timed out after {0:?}")]
    Timeout(Duration),

    /// Shutdown was signalled while the handler ran
    #[error("Action cancelled by shutdown")]
    Cancelled,

    /// The action was discarded without a result
    #[error("Action dropped before completion")]
    Dropped,

    /// The action reached a handler for a different type
    #[error("Action validation failed: {0}")]
    ValidationFailed(String),
}

impl ActionError {
    /// Whether the error is the issuer's fault rather than a system fault
    #[must_use]
    pub fn is_user_error(&self) -> bool {
        matches!(self, Self::InvalidArgument(_) | Self::NotFound(_))
    }
}

impl From<StoreError> for ActionError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::Duplicate(what) => Self::InvalidArgument(format!("already exists: {what}")),
            StoreError::Unavailable(reason) => Self::StoreUnavailable(reason),
        }
    }
}

impl From<ParseError> for ActionError {
    fn from(error: ParseError) -> Self {
        Self::InvalidArgument(error.to_string())
    }
}

/// Result type for action operations
pub type ActionResult<T> = Result<T, ActionError>;
