//! Remote console access
//!
//! [`RconDialer`] and [`RconConnection`] are the seams to the game servers.
//! [`TcpDialer`] speaks the Source RCON protocol; [`Broadcaster`] fans a command
//! list out to many servers at once.

mod broadcast;
mod client;
mod status;

pub use broadcast::Broadcaster;
pub use client::TcpDialer;
pub use status::parse_status;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur talking to a remote console
#[derive(Debug, Error)]
pub enum RconError {
    /// Could not open a connection
    #[error("Failed to dial {addr}: {reason}")]
    Dial { addr: String, reason: String },

    /// The server rejected the password
    #[error("Authentication rejected by {0}")]
    Auth(String),

    /// The command could not be executed
    #[error("Failed to exec command: {0}")]
    Exec(String),

    /// An operation exceeded its bound
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The peer sent something that is not an RCON packet
    #[error("Malformed packet: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for RCON operations
pub type RconResult<T> = Result<T, RconError>;

/// Opens authenticated console connections
#[async_trait]
pub trait RconDialer: Send + Sync {
    async fn dial(
        &self,
        addr: &str,
        password: &str,
        timeout: Duration,
    ) -> RconResult<Box<dyn RconConnection>>;
}

/// An authenticated console connection
#[async_trait]
pub trait RconConnection: Send {
    async fn exec(&mut self, command: &str) -> RconResult<String>;
}

/// Strip everything from the first command separator onwards.
///
/// Blocks chaining a second command onto moderator supplied text.
#[must_use]
pub fn sanitize_command(command: &str) -> &str {
    match command.find(';') {
        Some(idx) => &command[..idx],
        None => command,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_command() {
        assert_eq!(sanitize_command("say hello; exec evil"), "say hello");
        assert_eq!(sanitize_command("say hello"), "say hello");
        assert_eq!(sanitize_command("a;b;c"), "a");
        assert_eq!(sanitize_command(";quit"), "");
        assert_eq!(sanitize_command(""), "");
    }

    #[test]
    fn test_error_display() {
        let error = RconError::Dial {
            addr: "127.0.0.1:27015".to_string(),
            reason: "connection refused".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Failed to dial 127.0.0.1:27015: connection refused"
        );

        let error = RconError::Timeout(Duration::from_secs(10));
        assert_eq!(error.to_string(), "Timed out after 10s");
    }
}
