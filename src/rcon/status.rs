//! Parsing of the `status` console command output

use crate::model::{PlayerLocation, SteamId};
use regex::Regex;
use std::sync::LazyLock;

static STATUS_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^#\s*(?P<user_id>\d+)\s+"(?P<name>.*)"\s+(?P<sid>\[U:\d:\d+\])\s"#)
        .unwrap_or_else(|e| panic!("invalid status pattern: {e}"))
});

/// Extract the connected players from a `status` response
#[must_use]
pub fn parse_status(server: &str, output: &str) -> Vec<PlayerLocation> {
    output
        .lines()
        .filter_map(|line| {
            let caps = STATUS_ROW.captures(line.trim())?;
            Some(PlayerLocation {
                server: server.to_string(),
                name: caps["name"].to_string(),
                steam_id: caps["sid"].parse::<SteamId>().ok()?,
                user_id: caps["user_id"].parse().ok()?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = r#"hostname: Uncletopia | Seattle
version : 7370160/24 7370160 secure
map     : pl_upward at: 0 x, 0 y, 0 z
players : 2 humans, 0 bots (24 max)
# userid name                uniqueid            connected ping loss state  adr
#      2 "Player One"        [U:1:22202]         05:12       60    0 active 10.0.0.1:27005
#      3 "quote "in" name"   [U:1:22203]         01:02:03    45    0 active 10.0.0.2:27005
#      4 "SourceTV"          BOT                                     active
"#;

    #[test]
    fn test_parse_status() {
        let players = parse_status("sea-1", STATUS);
        assert_eq!(players.len(), 2);

        assert_eq!(players[0].server, "sea-1");
        assert_eq!(players[0].name, "Player One");
        assert_eq!(players[0].user_id, 2);
        assert_eq!(players[0].steam_id.steam3(), "[U:1:22202]");

        assert_eq!(players[1].name, "quote \"in\" name");
    }

    #[test]
    fn test_parse_empty() {
        assert!(parse_status("x", "").is_empty());
    }
}
