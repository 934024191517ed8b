use crate::action::{ActionError, ActionKind, ActionOutput, ActionResult, Origin};
use crate::model::SteamId;
use crate::store::StoreError;
use crate::{Context, Error};
use poise::command;
use std::fmt::Write as _;
use std::time::Duration;

/// Discord rejects messages longer than this
const MAX_REPLY_LEN: usize = 1900;
/// Extra wait on top of the handler timeout before giving up on a reply
const REPLY_GRACE: Duration = Duration::from_secs(5);

/// Steam id linked to the invoking Discord user
async fn author_steam_id(ctx: Context<'_>) -> Result<SteamId, Error> {
    match ctx.data().store.person_by_discord_id(ctx.author().id.get()).await {
        Ok(person) => Ok(person.steam_id),
        Err(StoreError::NotFound(_)) => {
            Err("Your Discord account is not linked to a Steam ID, use /link first".into())
        }
        Err(e) => Err(e.into()),
    }
}

async fn submit(ctx: Context<'_>, kind: ActionKind) -> ActionResult<ActionOutput> {
    let data = ctx.data();
    data.actions
        .submit(Origin::Discord, kind)
        .await
        .wait_timeout(data.config.actions.timeout() + REPLY_GRACE)
        .await
}

/// Reply with the outcome. System failures are also returned so the error hook logs them.
async fn respond(ctx: Context<'_>, result: ActionResult<ActionOutput>) -> Result<(), Error> {
    match result {
        Ok(output) => {
            ctx.say(truncate(describe(&output))).await?;
            Ok(())
        }
        Err(e) => {
            ctx.say(format!("Failed: {e}")).await?;
            if e.is_user_error() {
                Ok(())
            } else {
                Err(e.into())
            }
        }
    }
}

fn to_duration(value: Option<u64>) -> Option<Duration> {
    value.map(|m| Duration::from_secs(m.saturating_mul(60)))
}

fn truncate(mut text: String) -> String {
    if text.len() > MAX_REPLY_LEN {
        let mut cut = MAX_REPLY_LEN;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("\n…");
    }
    text
}

/// Human readable summary of an action result
#[must_use]
pub fn describe(output: &ActionOutput) -> String {
    let mut out = String::new();
    match output {
        ActionOutput::None => out.push_str("Done"),
        ActionOutput::Person(person) => {
            let _ = write!(out, "{} {}", person.steam_id, person.name);
        }
        ActionOutput::People(people) => {
            let _ = write!(out, "{} player(s)", people.len());
            for person in people {
                let _ = write!(out, "\n{} {}", person.steam_id, person.name);
            }
        }
        ActionOutput::Ban(ban) => match ban.valid_until {
            Some(until) => {
                let _ = write!(out, "Ban on {} valid until {}", ban.steam_id, until.to_rfc3339());
            }
            None => {
                let _ = write!(out, "Ban on {} is permanent", ban.steam_id);
            }
        },
        ActionOutput::BanNet(net) => {
            let _ = write!(out, "Network {} banned: {}", net.cidr, net.reason);
        }
        ActionOutput::BanNets(nets) => {
            for net in nets {
                let _ = writeln!(out, "{} {}", net.cidr, net.reason);
            }
        }
        ActionOutput::Filter(filter) => {
            let _ = write!(out, "Filter #{}: {}", filter.filter_id, filter.pattern);
        }
        ActionOutput::FilterMatch(Some(filter)) => {
            let _ = write!(out, "Matches filter #{}: {}", filter.filter_id, filter.pattern);
        }
        ActionOutput::FilterMatch(None) => out.push_str("No filter matched"),
        ActionOutput::Server(server) => {
            let _ = write!(out, "{} - {} ({})", server.name_short, server.name, server.addr());
        }
        ActionOutput::ServerList(servers) => {
            if servers.is_empty() {
                out.push_str("No servers configured");
            }
            for server in servers {
                let _ = writeln!(out, "{} - {} ({})", server.name_short, server.name, server.addr());
            }
        }
        ActionOutput::Locations(found) => {
            for location in found {
                let _ = writeln!(
                    out,
                    "{}: {} (#{})",
                    location.server, location.name, location.user_id
                );
            }
        }
        ActionOutput::IpHistory(history) => {
            for ip in history {
                let _ = writeln!(out, "{} {}", ip.address, ip.created_on.to_rfc3339());
            }
        }
        ActionOutput::ChatHistory(messages) => {
            for message in messages {
                let _ = writeln!(out, "[{}] {}", message.created_on.to_rfc3339(), message.message);
            }
        }
        ActionOutput::Responses(responses) => {
            let _ = write!(out, "Sent to {} server(s)", responses.len());
        }
    }
    if out.is_empty() {
        out.push_str("Nothing found");
    }
    out.trim_end().to_string()
}

/// Link your Discord account to a Steam ID
#[command(slash_command, guild_only)]
pub async fn link(
    ctx: Context<'_>,
    #[description = "Your Steam ID in any format"] steam_id: String,
) -> Result<(), Error> {
    let kind = ActionKind::SetSteamId {
        target: steam_id,
        discord_id: ctx.author().id.get(),
    };
    let result = submit(ctx, kind).await;
    respond(ctx, result).await
}

/// Kick a player from every server
#[command(slash_command, guild_only, required_permissions = "KICK_MEMBERS")]
pub async fn kick(
    ctx: Context<'_>,
    #[description = "Steam ID of the player"] steam_id: String,
    #[description = "Reason shown to the player"] reason: String,
) -> Result<(), Error> {
    let author = author_steam_id(ctx).await?;
    let result = submit(ctx, ActionKind::kick(steam_id, author.to_string(), reason)).await;
    respond(ctx, result).await
}

/// Ban a player and kick them from every server
#[command(slash_command, guild_only, required_permissions = "BAN_MEMBERS")]
pub async fn ban(
    ctx: Context<'_>,
    #[description = "Steam ID of the player"] steam_id: String,
    #[description = "Reason for the ban"] reason: String,
    #[description = "Duration in minutes, omit for permanent"] minutes: Option<u64>,
) -> Result<(), Error> {
    let author = author_steam_id(ctx).await?;
    let kind = ActionKind::ban(steam_id, author.to_string(), reason, to_duration(minutes));
    let result = submit(ctx, kind).await;
    respond(ctx, result).await
}

/// Lift a player's ban
#[command(slash_command, guild_only, required_permissions = "BAN_MEMBERS")]
pub async fn unban(
    ctx: Context<'_>,
    #[description = "Steam ID of the player"] steam_id: String,
) -> Result<(), Error> {
    author_steam_id(ctx).await?;
    let result = submit(ctx, ActionKind::Unban { target: steam_id }).await;
    respond(ctx, result).await
}

/// Gag a player on every server
#[command(slash_command, guild_only, required_permissions = "MUTE_MEMBERS")]
pub async fn mute(
    ctx: Context<'_>,
    #[description = "Steam ID of the player"] steam_id: String,
    #[description = "Reason for the mute"] reason: String,
    #[description = "Duration in minutes, omit for permanent"] minutes: Option<u64>,
) -> Result<(), Error> {
    let author = author_steam_id(ctx).await?;
    let kind = ActionKind::mute(steam_id, author.to_string(), reason, to_duration(minutes));
    let result = submit(ctx, kind).await;
    respond(ctx, result).await
}

/// Find which servers a player is on
#[command(slash_command, guild_only)]
pub async fn find(
    ctx: Context<'_>,
    #[description = "Steam ID of the player"] steam_id: String,
) -> Result<(), Error> {
    ctx.defer().await?;
    let result = submit(ctx, ActionKind::Find { target: steam_id }).await;
    respond(ctx, result).await
}

/// List the game servers
#[command(slash_command, guild_only)]
pub async fn servers(ctx: Context<'_>) -> Result<(), Error> {
    let result = submit(ctx, ActionKind::Servers).await;
    respond(ctx, result).await
}

/// Every command the bot registers
#[must_use]
pub fn all() -> Vec<poise::Command<crate::Data, Error>> {
    vec![link(), kick(), ban(), unban(), mute(), find(), servers()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Ban, PlayerLocation, Server};
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use uuid::Uuid;

    #[test]
    fn test_command_definitions() {
        let commands = all();
        let names: Vec<&str> = commands.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["link", "kick", "ban", "unban", "mute", "find", "servers"]
        );
        assert!(commands.iter().all(|c| c.guild_only));
        assert!(commands.iter().all(|c| c.create_as_slash_command().is_some()));

        let ban = ban();
        assert!(ban.required_permissions.contains(poise::serenity_prelude::Permissions::BAN_MEMBERS));
        assert_eq!(ban.parameters.len(), 3);
    }

    #[test]
    fn test_describe_never_shows_rcon_password() {
        let server = Server {
            server_id: 1,
            name: "Uncletopia | Seattle".to_string(),
            name_short: "sea-1".to_string(),
            host: "10.0.0.1".to_string(),
            port: 27015,
            rcon: "hunter2".to_string(),
        };
        let text = describe(&ActionOutput::ServerList(vec![server.clone()]));
        assert_eq!(text, "sea-1 - Uncletopia | Seattle (10.0.0.1:27015)");
        assert!(!describe(&ActionOutput::Server(server)).contains("hunter2"));
    }

    #[test]
    fn test_describe_results() {
        let steam_id: SteamId = "[U:1:22202]".parse().unwrap();
        let ban = Ban {
            ban_id: Uuid::new_v4(),
            steam_id,
            author_id: steam_id,
            reason: "r".to_string(),
            origin: Origin::Discord,
            created_on: Utc::now(),
            valid_until: None,
        };
        assert_eq!(
            describe(&ActionOutput::Ban(ban.clone())),
            "Ban on 76561197960287930 is permanent"
        );

        let until = Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap();
        let timed = Ban {
            valid_until: Some(until),
            ..ban
        };
        assert!(describe(&ActionOutput::Ban(timed)).ends_with("2030-01-02T03:04:05+00:00"));

        let found = vec![PlayerLocation {
            server: "sea-1".to_string(),
            name: "Player".to_string(),
            steam_id,
            user_id: 7,
        }];
        assert_eq!(describe(&ActionOutput::Locations(found)), "sea-1: Player (#7)");

        let responses = HashMap::from([("a".to_string(), String::new())]);
        assert_eq!(describe(&ActionOutput::Responses(responses)), "Sent to 1 server(s)");
        assert_eq!(describe(&ActionOutput::IpHistory(Vec::new())), "Nothing found");
    }

    #[test]
    fn test_truncate() {
        let long = "é".repeat(MAX_REPLY_LEN);
        let cut = truncate(long);
        assert!(cut.len() <= MAX_REPLY_LEN + 4);
        assert!(cut.ends_with('…'));
        assert_eq!(truncate("short".to_string()), "short");
    }

    #[test]
    fn test_to_duration() {
        assert_eq!(to_duration(Some(2)), Some(Duration::from_secs(120)));
        assert_eq!(to_duration(None), None);
    }

    #[test]
    fn test_user_errors_are_not_escalated() {
        assert!(ActionError::NotFound("x".to_string()).is_user_error());
    }
}
