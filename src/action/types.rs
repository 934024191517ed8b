//! Action types
//!
//! An [`Action`] is one command travelling through the bus: a typed payload, the
//! origin that issued it, and the one-shot channel its result is written to.

use crate::action::{ActionError, ActionOutput, ActionResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Who or what issued an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    /// Automated system behaviour such as warning escalation
    Core,
    /// A human moderator through the web transport
    Web,
    /// A moderator through the Discord bot
    Discord,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Core => write!(f, "core"),
            Self::Web => write!(f, "web"),
            Self::Discord => write!(f, "discord"),
        }
    }
}

/// Tag used to select a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionType {
    Mute,
    Kick,
    Ban,
    Unban,
    BanNet,
    Find,
    CheckFilter,
    AddFilter,
    DelFilter,
    GetPersonById,
    GetOrCreatePersonById,
    SetSteamId,
    Say,
    CSay,
    PSay,
    FindByCidr,
    GetBan,
    GetBanNet,
    GetHistoryIp,
    GetHistoryChat,
    Servers,
    ServerByName,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mute => write!(f, "Mute"),
            Self::Kick => write!(f, "Kick"),
            Self::Ban => write!(f, "Ban"),
            Self::Unban => write!(f, "Unban"),
            Self::BanNet => write!(f, "Ban Net"),
            Self::Find => write!(f, "Find"),
            Self::CheckFilter => write!(f, "Check Filter"),
            Self::AddFilter => write!(f, "Add Filter"),
            Self::DelFilter => write!(f, "Delete Filter"),
            Self::GetPersonById => write!(f, "Get Person"),
            Self::GetOrCreatePersonById => write!(f, "Get Or Create Person"),
            Self::SetSteamId => write!(f, "Set Steam ID"),
            Self::Say => write!(f, "Say"),
            Self::CSay => write!(f, "Center Say"),
            Self::PSay => write!(f, "Private Say"),
            Self::FindByCidr => write!(f, "Find By CIDR"),
            Self::GetBan => write!(f, "Get Ban"),
            Self::GetBanNet => write!(f, "Get Ban Net"),
            Self::GetHistoryIp => write!(f, "IP History"),
            Self::GetHistoryChat => write!(f, "Chat History"),
            Self::Servers => write!(f, "Servers"),
            Self::ServerByName => write!(f, "Server By Name"),
        }
    }
}

/// Parameters shared by the player enforcement actions
///
/// Ids are carried as issued and validated by the handler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionParams {
    /// Player being acted on
    pub target: String,
    /// Moderator (or system identity) responsible
    pub author: String,
    /// Reason shown to the player and stored with the record
    pub reason: String,
    /// `None` or zero means permanent. Ignored by kicks
    pub duration: Option<Duration>,
}

impl ActionParams {
    pub fn new(
        target: impl Into<String>,
        author: impl Into<String>,
        reason: impl Into<String>,
        duration: impl Into<Option<Duration>>,
    ) -> Self {
        Self {
            target: target.into(),
            author: author.into(),
            reason: reason.into(),
            duration: duration.into(),
        }
    }

    /// Check if the action is time limited
    #[must_use]
    pub fn has_duration(&self) -> bool {
        self.duration.is_some_and(|d| !d.is_zero())
    }
}

/// Parameters for a network ban
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetParams {
    pub cidr: String,
    pub author: String,
    pub reason: String,
    pub duration: Option<Duration>,
}

/// A command and its arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ActionKind {
    Mute(ActionParams),
    Kick(ActionParams),
    Ban(ActionParams),
    Unban { target: String },
    BanNet(NetParams),
    Find { target: String },
    CheckFilter { message: String },
    AddFilter { pattern: String },
    DelFilter { filter_id: i64 },
    GetPersonById { target: String },
    GetOrCreatePersonById { target: String },
    SetSteamId { target: String, discord_id: u64 },
    Say { message: String },
    CSay { message: String },
    PSay { target: String, message: String },
    FindByCidr { cidr: String },
    GetBan { target: String },
    GetBanNet { address: String },
    GetHistoryIp { target: String },
    GetHistoryChat { target: String },
    Servers,
    ServerByName { name: String },
}

impl ActionKind {
    /// Get the type of this action
    #[must_use]
    pub fn get_type(&self) -> ActionType {
        match self {
            Self::Mute(_) => ActionType::Mute,
            Self::Kick(_) => ActionType::Kick,
            Self::Ban(_) => ActionType::Ban,
            Self::Unban { .. } => ActionType::Unban,
            Self::BanNet(_) => ActionType::BanNet,
            Self::Find { .. } => ActionType::Find,
            Self::CheckFilter { .. } => ActionType::CheckFilter,
            Self::AddFilter { .. } => ActionType::AddFilter,
            Self::DelFilter { .. } => ActionType::DelFilter,
            Self::GetPersonById { .. } => ActionType::GetPersonById,
            Self::GetOrCreatePersonById { .. } => ActionType::GetOrCreatePersonById,
            Self::SetSteamId { .. } => ActionType::SetSteamId,
            Self::Say { .. } => ActionType::Say,
            Self::CSay { .. } => ActionType::CSay,
            Self::PSay { .. } => ActionType::PSay,
            Self::FindByCidr { .. } => ActionType::FindByCidr,
            Self::GetBan { .. } => ActionType::GetBan,
            Self::GetBanNet { .. } => ActionType::GetBanNet,
            Self::GetHistoryIp { .. } => ActionType::GetHistoryIp,
            Self::GetHistoryChat { .. } => ActionType::GetHistoryChat,
            Self::Servers => ActionType::Servers,
            Self::ServerByName { .. } => ActionType::ServerByName,
        }
    }

    /// Create a new `Mute` action
    pub fn mute(
        target: impl Into<String>,
        author: impl Into<String>,
        reason: impl Into<String>,
        duration: impl Into<Option<Duration>>,
    ) -> Self {
        Self::Mute(ActionParams::new(target, author, reason, duration))
    }

    /// Create a new `Ban` action
    pub fn ban(
        target: impl Into<String>,
        author: impl Into<String>,
        reason: impl Into<String>,
        duration: impl Into<Option<Duration>>,
    ) -> Self {
        Self::Ban(ActionParams::new(target, author, reason, duration))
    }

    /// Create a new `Kick` action
    pub fn kick(
        target: impl Into<String>,
        author: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Kick(ActionParams::new(target, author, reason, None))
    }
}

/// A submitted command awaiting its handler
#[derive(Debug)]
pub struct Action {
    pub id: Uuid,
    pub origin: Origin,
    pub kind: ActionKind,
    pub created_on: DateTime<Utc>,
    done: oneshot::Sender<ActionResult<ActionOutput>>,
}

impl Action {
    /// Create an action together with the handle its issuer waits on
    #[must_use]
    pub fn new(origin: Origin, kind: ActionKind) -> (Self, ResultHandle) {
        let (done, rx) = oneshot::channel();
        let id = Uuid::new_v4();
        let action = Self {
            id,
            origin,
            kind,
            created_on: Utc::now(),
            done,
        };
        (action, ResultHandle { id, rx })
    }

    #[must_use]
    pub fn get_type(&self) -> ActionType {
        self.kind.get_type()
    }

    /// Deliver the result. Consumes the action so it can only happen once.
    ///
    /// Returns `false` if the issuer stopped waiting.
    pub fn complete(self, result: ActionResult<ActionOutput>) -> bool {
        self.done.send(result).is_ok()
    }
}

/// Issuer side of an action's result channel
#[derive(Debug)]
pub struct ResultHandle {
    id: Uuid,
    rx: oneshot::Receiver<ActionResult<ActionOutput>>,
}

impl ResultHandle {
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for the handler's result.
    ///
    /// # Errors
    /// Returns the handler's error, or `ActionError::Dropped` if the action was
    /// discarded without a result (bus closed, no handler, handler panicked).
    pub async fn wait(self) -> ActionResult<ActionOutput> {
        self.rx.await.unwrap_or(Err(ActionError::Dropped))
    }

    /// Wait for the result for at most `timeout`
    ///
    /// # Errors
    /// As [`ResultHandle::wait`], plus `ActionError::Timeout` when the bound is hit.
    pub async fn wait_timeout(self, timeout: Duration) -> ActionResult<ActionOutput> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .unwrap_or(Err(ActionError::Timeout(timeout)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_type() {
        assert_eq!(
            ActionKind::mute("a", "b", "c", Duration::from_secs(60)).get_type(),
            ActionType::Mute
        );
        assert_eq!(ActionKind::ban("a", "b", "c", None).get_type(), ActionType::Ban);
        assert_eq!(ActionKind::kick("a", "b", "c").get_type(), ActionType::Kick);
        assert_eq!(ActionKind::Servers.get_type(), ActionType::Servers);
        assert_eq!(
            ActionKind::PSay {
                target: "a".to_string(),
                message: "hi".to_string()
            }
            .get_type(),
            ActionType::PSay
        );
    }

    #[test]
    fn test_action_params() {
        let params = ActionParams::new("t", "a", "r", Duration::from_secs(300));
        assert!(params.has_duration());

        let params = ActionParams::new("t", "a", "r", None);
        assert!(!params.has_duration());

        let params = ActionParams::new("t", "a", "r", Duration::ZERO);
        assert!(!params.has_duration());
    }

    #[tokio::test]
    async fn test_complete_delivers_once() {
        let (action, handle) = Action::new(Origin::Web, ActionKind::Servers);
        assert_eq!(action.id, handle.id());
        assert!(action.complete(Ok(ActionOutput::None)));
        assert!(matches!(handle.wait().await, Ok(ActionOutput::None)));
    }

    #[tokio::test]
    async fn test_dropped_action_reports_dropped() {
        let (action, handle) = Action::new(Origin::Core, ActionKind::Servers);
        drop(action);
        assert!(matches!(handle.wait().await, Err(ActionError::Dropped)));
    }

    #[tokio::test]
    async fn test_wait_timeout() {
        let (_action, handle) = Action::new(Origin::Core, ActionKind::Servers);
        let result = handle.wait_timeout(Duration::from_millis(20)).await;
        assert!(matches!(result, Err(ActionError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_complete_after_issuer_gone() {
        let (action, handle) = Action::new(Origin::Core, ActionKind::Servers);
        drop(handle);
        assert!(!action.complete(Ok(ActionOutput::None)));
    }
}
