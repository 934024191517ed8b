//! Action handlers
//!
//! One handler per [`ActionType`], looked up in a [`HandlerRegistry`] built once
//! at startup. Handlers talk to the store and the game servers and never panic
//! on bad input; every failure comes back as an [`ActionError`].

use crate::ACTION_TARGET;
use crate::action::{Action, ActionError, ActionKind, ActionOutput, ActionResult, ActionType};
use crate::filter::FilterSet;
use crate::model::{Ban, BanNet, Cidr, SteamId};
use crate::rcon::{Broadcaster, parse_status};
use crate::store::Store;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Collaborators shared by every handler
#[derive(Clone)]
pub struct HandlerContext {
    pub store: Arc<dyn Store>,
    pub broadcaster: Broadcaster,
    pub filters: Arc<FilterSet>,
}

impl HandlerContext {
    pub fn new(store: Arc<dyn Store>, broadcaster: Broadcaster, filters: Arc<FilterSet>) -> Self {
        Self {
            store,
            broadcaster,
            filters,
        }
    }

    /// Run commands on every known server
    async fn broadcast_all(&self, commands: &[String]) -> ActionResult<HashMap<String, String>> {
        let servers = self.store.servers().await?;
        Ok(self.broadcaster.broadcast(&servers, commands).await)
    }
}

/// Trait for executing actions
#[async_trait::async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, ctx: &HandlerContext, action: &Action) -> ActionResult<ActionOutput>;
}

/// Registry of action handlers
pub struct HandlerRegistry {
    handlers: HashMap<ActionType, Arc<dyn ActionHandler>>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    /// Create a new registry with all handlers registered
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self::empty();

        registry.register(ActionType::Ban, Arc::new(BanHandler));
        registry.register(ActionType::Mute, Arc::new(MuteHandler));
        registry.register(ActionType::Kick, Arc::new(KickHandler));
        registry.register(ActionType::Unban, Arc::new(UnbanHandler));
        registry.register(ActionType::BanNet, Arc::new(BanNetHandler));
        registry.register(ActionType::Find, Arc::new(FindHandler));

        let filters: Arc<dyn ActionHandler> = Arc::new(FilterHandler);
        for action_type in [
            ActionType::CheckFilter,
            ActionType::AddFilter,
            ActionType::DelFilter,
        ] {
            registry.register(action_type, Arc::clone(&filters));
        }

        let people: Arc<dyn ActionHandler> = Arc::new(PersonHandler);
        for action_type in [
            ActionType::GetPersonById,
            ActionType::GetOrCreatePersonById,
            ActionType::SetSteamId,
            ActionType::FindByCidr,
            ActionType::GetHistoryIp,
            ActionType::GetHistoryChat,
        ] {
            registry.register(action_type, Arc::clone(&people));
        }

        let say: Arc<dyn ActionHandler> = Arc::new(SayHandler);
        for action_type in [ActionType::Say, ActionType::CSay, ActionType::PSay] {
            registry.register(action_type, Arc::clone(&say));
        }

        let lookups: Arc<dyn ActionHandler> = Arc::new(LookupHandler);
        for action_type in [
            ActionType::GetBan,
            ActionType::GetBanNet,
            ActionType::Servers,
            ActionType::ServerByName,
        ] {
            registry.register(action_type, Arc::clone(&lookups));
        }

        registry
    }

    /// A registry with nothing registered
    #[must_use]
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for an action type, replacing any previous one
    pub fn register(&mut self, action_type: ActionType, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(action_type, handler);
    }

    /// Get a handler for an action type
    #[must_use]
    pub fn get(&self, action_type: ActionType) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(&action_type).cloned()
    }
}

fn parse_steam_id(raw: &str) -> ActionResult<SteamId> {
    Ok(raw.trim().parse::<SteamId>()?)
}

/// End of a time-limited sanction. Missing or zero durations are permanent.
fn valid_until(now: DateTime<Utc>, duration: Option<Duration>) -> ActionResult<Option<DateTime<Utc>>> {
    let Some(duration) = duration.filter(|d| !d.is_zero()) else {
        return Ok(None);
    };
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .map(Some)
        .ok_or_else(|| ActionError::InvalidArgument(format!("duration out of range: {duration:?}")))
}

fn unexpected(action: &Action) -> ActionError {
    ActionError::ValidationFailed(format!("Unexpected {} action", action.get_type()))
}

fn kick_command(target: SteamId, reason: &str) -> String {
    format!("sm_kick \"#{}\" {reason}", target.steam3())
}

fn gag_command(target: SteamId, duration: Option<Duration>, reason: &str) -> String {
    let minutes = duration.map_or(0, |d| d.as_secs().div_ceil(60));
    format!("sm_gag \"#{}\" {minutes} {reason}", target.steam3())
}

/// Handler for the Ban action type
struct BanHandler;

#[async_trait::async_trait]
impl ActionHandler for BanHandler {
    async fn handle(&self, ctx: &HandlerContext, action: &Action) -> ActionResult<ActionOutput> {
        let ActionKind::Ban(params) = &action.kind else {
            return Err(unexpected(action));
        };

        let target = parse_steam_id(&params.target)?;
        let author = parse_steam_id(&params.author)?;
        let now = Utc::now();
        let valid_until = valid_until(now, params.duration)?;

        ctx.store.get_or_create_person(target).await?;

        let ban = Ban {
            ban_id: Uuid::new_v4(),
            steam_id: target,
            author_id: author,
            reason: params.reason.clone(),
            origin: action.origin,
            created_on: now,
            valid_until,
        };
        ctx.store.save_ban(&ban).await?;

        info!(
            target: ACTION_TARGET,
            action_id = %action.id,
            steam_id = %target,
            author = %author,
            origin = %action.origin,
            until = ?valid_until,
            "Player banned"
        );

        ctx.broadcast_all(&[kick_command(target, &params.reason)]).await?;
        Ok(ActionOutput::Ban(ban))
    }
}

/// Handler for the Mute action type
struct MuteHandler;

#[async_trait::async_trait]
impl ActionHandler for MuteHandler {
    async fn handle(&self, ctx: &HandlerContext, action: &Action) -> ActionResult<ActionOutput> {
        let ActionKind::Mute(params) = &action.kind else {
            return Err(unexpected(action));
        };

        let target = parse_steam_id(&params.target)?;
        parse_steam_id(&params.author)?;
        ctx.store.get_or_create_person(target).await?;

        let command = gag_command(target, params.duration, &params.reason);
        let responses = ctx.broadcast_all(&[command]).await?;

        info!(
            target: ACTION_TARGET,
            action_id = %action.id,
            steam_id = %target,
            duration = ?params.duration,
            servers = responses.len(),
            "Player muted"
        );
        Ok(ActionOutput::Responses(responses))
    }
}

/// Handler for the Kick action type
struct KickHandler;

#[async_trait::async_trait]
impl ActionHandler for KickHandler {
    async fn handle(&self, ctx: &HandlerContext, action: &Action) -> ActionResult<ActionOutput> {
        let ActionKind::Kick(params) = &action.kind else {
            return Err(unexpected(action));
        };

        let target = parse_steam_id(&params.target)?;
        parse_steam_id(&params.author)?;
        ctx.store.get_or_create_person(target).await?;

        let responses = ctx
            .broadcast_all(&[kick_command(target, &params.reason)])
            .await?;

        info!(
            target: ACTION_TARGET,
            action_id = %action.id,
            steam_id = %target,
            servers = responses.len(),
            "Player kicked"
        );
        Ok(ActionOutput::Responses(responses))
    }
}

/// Handler for the Unban action type
struct UnbanHandler;

#[async_trait::async_trait]
impl ActionHandler for UnbanHandler {
    async fn handle(&self, ctx: &HandlerContext, action: &Action) -> ActionResult<ActionOutput> {
        let ActionKind::Unban { target } = &action.kind else {
            return Err(unexpected(action));
        };

        let target = parse_steam_id(target)?;
        let ban = ctx.store.ban_by_steam_id(target).await?;
        ctx.store.drop_ban(&ban).await?;

        info!(target: ACTION_TARGET, action_id = %action.id, steam_id = %target, "Player unbanned");
        Ok(ActionOutput::Ban(ban))
    }
}

/// Handler for the `BanNet` action type
struct BanNetHandler;

#[async_trait::async_trait]
impl ActionHandler for BanNetHandler {
    async fn handle(&self, ctx: &HandlerContext, action: &Action) -> ActionResult<ActionOutput> {
        let ActionKind::BanNet(params) = &action.kind else {
            return Err(unexpected(action));
        };

        let cidr: Cidr = params.cidr.trim().parse()?;
        let author = parse_steam_id(&params.author)?;
        let now = Utc::now();

        let ban_net = BanNet {
            net_id: Uuid::new_v4(),
            cidr,
            author_id: author,
            reason: params.reason.clone(),
            origin: action.origin,
            created_on: now,
            valid_until: valid_until(now, params.duration)?,
        };
        ctx.store.save_ban_net(&ban_net).await?;

        info!(target: ACTION_TARGET, action_id = %action.id, cidr = %cidr, "Network banned");
        Ok(ActionOutput::BanNet(ban_net))
    }
}

/// Handler for the Find action type
struct FindHandler;

#[async_trait::async_trait]
impl ActionHandler for FindHandler {
    async fn handle(&self, ctx: &HandlerContext, action: &Action) -> ActionResult<ActionOutput> {
        let ActionKind::Find { target } = &action.kind else {
            return Err(unexpected(action));
        };

        let target = parse_steam_id(target)?;
        let responses = ctx.broadcast_all(&["status".to_string()]).await?;

        let mut found: Vec<_> = responses
            .iter()
            .flat_map(|(server, output)| parse_status(server, output))
            .filter(|location| location.steam_id == target)
            .collect();

        if found.is_empty() {
            return Err(ActionError::NotFound(format!("player {target} is not connected")));
        }
        found.sort_by(|a, b| a.server.cmp(&b.server));
        Ok(ActionOutput::Locations(found))
    }
}

/// Handler for the filter action types
struct FilterHandler;

#[async_trait::async_trait]
impl ActionHandler for FilterHandler {
    async fn handle(&self, ctx: &HandlerContext, action: &Action) -> ActionResult<ActionOutput> {
        match &action.kind {
            ActionKind::CheckFilter { message } => {
                Ok(ActionOutput::FilterMatch(ctx.filters.find(message)))
            }
            ActionKind::AddFilter { pattern } => {
                FilterSet::compile(pattern)
                    .map_err(|e| ActionError::InvalidArgument(format!("invalid pattern: {e}")))?;

                let filter = ctx.store.insert_filter(pattern).await?;
                ctx.filters
                    .insert(filter.clone())
                    .map_err(|e| ActionError::InvalidArgument(format!("invalid pattern: {e}")))?;

                info!(target: ACTION_TARGET, filter_id = filter.filter_id, pattern = %filter.pattern, "Filter added");
                Ok(ActionOutput::Filter(filter))
            }
            ActionKind::DelFilter { filter_id } => {
                let filter = ctx.store.delete_filter(*filter_id).await?;
                ctx.filters.remove(filter.filter_id);

                info!(target: ACTION_TARGET, filter_id = filter.filter_id, "Filter deleted");
                Ok(ActionOutput::Filter(filter))
            }
            _ => Err(unexpected(action)),
        }
    }
}

/// Handler for person lookups and updates
struct PersonHandler;

#[async_trait::async_trait]
impl ActionHandler for PersonHandler {
    async fn handle(&self, ctx: &HandlerContext, action: &Action) -> ActionResult<ActionOutput> {
        match &action.kind {
            ActionKind::GetPersonById { target } => {
                let person = ctx.store.person_by_steam_id(parse_steam_id(target)?).await?;
                Ok(ActionOutput::Person(person))
            }
            ActionKind::GetOrCreatePersonById { target } => {
                let person = ctx
                    .store
                    .get_or_create_person(parse_steam_id(target)?)
                    .await?;
                Ok(ActionOutput::Person(person))
            }
            ActionKind::SetSteamId { target, discord_id } => {
                let steam_id = parse_steam_id(target)?;

                match ctx.store.person_by_discord_id(*discord_id).await {
                    Ok(other) if other.steam_id != steam_id => {
                        return Err(ActionError::InvalidArgument(format!(
                            "discord user {discord_id} is already linked to {}",
                            other.steam_id
                        )));
                    }
                    Ok(_) | Err(crate::store::StoreError::NotFound(_)) => {}
                    Err(e) => return Err(e.into()),
                }

                let mut person = ctx.store.get_or_create_person(steam_id).await?;
                person.discord_id = Some(*discord_id);
                ctx.store.save_person(&person).await?;

                info!(target: ACTION_TARGET, steam_id = %steam_id, discord_id, "Linked discord account");
                Ok(ActionOutput::Person(person))
            }
            ActionKind::FindByCidr { cidr } => {
                let cidr: Cidr = cidr.trim().parse()?;
                Ok(ActionOutput::People(ctx.store.people_by_cidr(cidr).await?))
            }
            ActionKind::GetHistoryIp { target } => {
                let person = ctx.store.person_by_steam_id(parse_steam_id(target)?).await?;
                Ok(ActionOutput::IpHistory(person.ip_history))
            }
            ActionKind::GetHistoryChat { target } => {
                let history = ctx.store.chat_history(parse_steam_id(target)?).await?;
                Ok(ActionOutput::ChatHistory(history))
            }
            _ => Err(unexpected(action)),
        }
    }
}

/// Handler for the in-game message action types
struct SayHandler;

#[async_trait::async_trait]
impl ActionHandler for SayHandler {
    async fn handle(&self, ctx: &HandlerContext, action: &Action) -> ActionResult<ActionOutput> {
        let command = match &action.kind {
            ActionKind::Say { message } => format!("sm_say {message}"),
            ActionKind::CSay { message } => format!("sm_csay {message}"),
            ActionKind::PSay { target, message } => {
                let target = parse_steam_id(target)?;
                format!("sm_psay \"#{}\" {message}", target.steam3())
            }
            _ => return Err(unexpected(action)),
        };

        debug!(target: ACTION_TARGET, action_id = %action.id, command = %command, "Sending message");
        Ok(ActionOutput::Responses(ctx.broadcast_all(&[command]).await?))
    }
}

/// Handler for ban and server lookups
struct LookupHandler;

#[async_trait::async_trait]
impl ActionHandler for LookupHandler {
    async fn handle(&self, ctx: &HandlerContext, action: &Action) -> ActionResult<ActionOutput> {
        match &action.kind {
            ActionKind::GetBan { target } => {
                let ban = ctx.store.ban_by_steam_id(parse_steam_id(target)?).await?;
                Ok(ActionOutput::Ban(ban))
            }
            ActionKind::GetBanNet { address } => {
                let address: IpAddr = address.trim().parse().map_err(|_| {
                    ActionError::InvalidArgument(format!("invalid ip address: {address}"))
                })?;
                let nets = ctx.store.ban_nets_for_ip(address).await?;
                if nets.is_empty() {
                    return Err(ActionError::NotFound(format!("network ban for {address}")));
                }
                Ok(ActionOutput::BanNets(nets))
            }
            ActionKind::Servers => Ok(ActionOutput::ServerList(ctx.store.servers().await?)),
            ActionKind::ServerByName { name } => {
                Ok(ActionOutput::Server(ctx.store.server_by_name(name).await?))
            }
            _ => Err(unexpected(action)),
        }
    }
}
