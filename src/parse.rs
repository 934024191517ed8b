//! Game server log grammar
//!
//! Turns one raw Source engine log line into a [`MsgType`] and a flat field map.
//! Player references use the `name`, `pid`, `sid`, `team` keys for the acting
//! player and the same keys suffixed with `2` for the second player.

use crate::event::MsgType;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Result of parsing one line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    pub msg_type: MsgType,
    pub fields: HashMap<String, String>,
}

/// Log grammar used by the ingestion pipeline
#[cfg_attr(test, mockall::automock)]
pub trait LogParser: Send + Sync {
    /// Parse a line. Lines that match nothing come back as `MsgType::Unknown`.
    fn parse(&self, line: &str) -> ParsedLine;
}

static TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"^L (?P<date>\d{2}/\d{2}/\d{4}) - (?P<time>\d{2}:\d{2}:\d{2}):\s*")
});

static RULES: LazyLock<Vec<(MsgType, Regex)>> = LazyLock::new(|| {
    let p1 = player("");
    let p2 = player("2");
    vec![
        (MsgType::Say, compile(&format!(r#"^{p1} say "(?P<msg>.*)"$"#))),
        (
            MsgType::SayTeam,
            compile(&format!(r#"^{p1} say_team "(?P<msg>.*)"$"#)),
        ),
        (
            MsgType::Connected,
            compile(&format!(r#"^{p1} connected, address "(?P<address>[^"]*)"$"#)),
        ),
        (
            MsgType::Disconnected,
            compile(&format!(r#"^{p1} disconnected \(reason "(?P<reason>[^"]*)"\)$"#)),
        ),
        (MsgType::Entered, compile(&format!(r"^{p1} entered the game$"))),
        (
            MsgType::JoinedTeam,
            compile(&format!(r#"^{p1} joined team "(?P<new_team>[^"]*)"$"#)),
        ),
        (
            MsgType::ChangeClass,
            compile(&format!(r#"^{p1} changed role to "(?P<class>[^"]*)"$"#)),
        ),
        (
            MsgType::Killed,
            compile(&format!(r#"^{p1} killed {p2} with "(?P<weapon>[^"]*)""#)),
        ),
    ]
});

/// `"name<pid><sid><team>"` with group names carrying `suffix`
fn player(suffix: &str) -> String {
    format!(
        r#""(?P<name{s}>.*?)<(?P<pid{s}>\d+)><(?P<sid{s}>[^>]*)><(?P<team{s}>[^>]*)>""#,
        s = suffix
    )
}

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid log pattern {pattern}: {e}"))
}

/// Regex grammar for Source engine server logs
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexParser;

impl LogParser for RegexParser {
    fn parse(&self, line: &str) -> ParsedLine {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut fields = HashMap::new();

        let body = match TIMESTAMP.captures(line) {
            Some(caps) => {
                fields.insert("date".to_string(), caps["date"].to_string());
                fields.insert("time".to_string(), caps["time"].to_string());
                &line[caps.get(0).map_or(0, |m| m.end())..]
            }
            None => line,
        };

        for (msg_type, regex) in RULES.iter() {
            if let Some(caps) = regex.captures(body) {
                for name in regex.capture_names().flatten() {
                    if let Some(value) = caps.name(name) {
                        fields.insert(name.to_string(), value.as_str().to_string());
                    }
                }
                return ParsedLine {
                    msg_type: *msg_type,
                    fields,
                };
            }
        }

        ParsedLine {
            msg_type: MsgType::Unknown,
            fields,
        }
    }
}
