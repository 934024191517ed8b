//! Structured log events

use crate::model::{Person, Server};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Category of a parsed game log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MsgType {
    /// The line did not match any known grammar
    Unknown,
    /// Registration wildcard, never carried by an event
    Any,
    Say,
    SayTeam,
    Connected,
    Disconnected,
    Entered,
    JoinedTeam,
    ChangeClass,
    Killed,
}

impl MsgType {
    /// Chat categories
    pub const CHAT: [MsgType; 2] = [MsgType::Say, MsgType::SayTeam];

    #[must_use]
    pub fn is_chat(self) -> bool {
        matches!(self, Self::Say | Self::SayTeam)
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Any => write!(f, "any"),
            Self::Say => write!(f, "say"),
            Self::SayTeam => write!(f, "say_team"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Entered => write!(f, "entered"),
            Self::JoinedTeam => write!(f, "joined_team"),
            Self::ChangeClass => write!(f, "change_class"),
            Self::Killed => write!(f, "killed"),
        }
    }
}

/// One parsed log line, resolved against the store
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub msg_type: MsgType,
    pub fields: HashMap<String, String>,
    pub server: Server,
    pub player1: Option<Person>,
    pub player2: Option<Person>,
    pub raw: String,
    pub created_on: DateTime<Utc>,
}

impl LogEvent {
    /// Field value by key
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}
