//! Warning escalation
//!
//! Players collect warnings for chat infractions. Reaching the configured limit
//! inside the warning window submits an enforcement action; a sweeper forgets
//! warnings once they age out. Nothing here is persisted.

use crate::action::{ActionBus, ActionKind, Origin};
use crate::model::SteamId;
use crate::shutdown::Shutdown;
use crate::{ACTION_TARGET, ERROR_TARGET};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// Reason attached to escalated actions
pub const ESCALATION_REASON: &str = "Warning limit exceeded";

/// Action taken when a player reaches the warning limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscalationKind {
    Mute,
    Ban,
    Kick,
}

/// Escalation thresholds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationSettings {
    /// Warnings inside the window that trigger enforcement
    pub limit: usize,
    /// Age after which a warning is forgotten
    pub timeout_secs: u64,
    pub action: EscalationKind,
    /// Length of the mute or ban
    pub duration_secs: u64,
    pub sweep_interval_ms: u64,
}

impl Default for EscalationSettings {
    fn default() -> Self {
        Self {
            limit: 3,
            timeout_secs: 3600,
            action: EscalationKind::Kick,
            duration_secs: 3600,
            sweep_interval_ms: 1000,
        }
    }
}

impl EscalationSettings {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

/// Why a player was warned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarnReason {
    Language,
}

impl fmt::Display for WarnReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Language => write!(f, "language"),
        }
    }
}

/// One recorded infraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserWarning {
    pub reason: WarnReason,
    pub created_on: DateTime<Utc>,
}

/// Per-player warning lists plus the escalation policy
pub struct WarningTracker {
    warnings: RwLock<HashMap<SteamId, Vec<UserWarning>>>,
    settings: EscalationSettings,
    /// Author recorded on escalated actions
    owner: SteamId,
    actions: ActionBus,
    /// How long to wait on an escalated action before giving up on it
    action_timeout: Duration,
}

impl WarningTracker {
    pub fn new(
        settings: EscalationSettings,
        owner: SteamId,
        actions: ActionBus,
        action_timeout: Duration,
    ) -> Self {
        Self {
            warnings: RwLock::new(HashMap::new()),
            settings,
            owner,
            actions,
            action_timeout,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &EscalationSettings {
        &self.settings
    }

    /// Record a warning now. Returns whether it triggered enforcement.
    pub async fn add_warning(&self, steam_id: SteamId, reason: WarnReason) -> bool {
        self.add_warning_at(steam_id, reason, Utc::now()).await
    }

    /// Record a warning with an explicit timestamp.
    ///
    /// When the player's count reaches the limit an enforcement action is
    /// submitted and awaited, but only so a failure can be logged. The count
    /// is left as is.
    pub async fn add_warning_at(&self, steam_id: SteamId, reason: WarnReason, now: DateTime<Utc>) -> bool {
        let settings = &self.settings;

        let count = {
            let mut warnings = self.warnings.write().await;
            let list = warnings.entry(steam_id).or_default();
            list.push(UserWarning {
                reason,
                created_on: now,
            });
            list.len()
        };

        info!(
            target: ACTION_TARGET,
            steam_id = %steam_id,
            reason = %reason,
            count,
            limit = settings.limit,
            "Player warned"
        );

        if count < settings.limit.max(1) {
            return false;
        }

        let kind = self.enforcement(settings, steam_id);
        let action_type = kind.get_type();
        let handle = self.actions.submit(Origin::Core, kind).await;
        match handle.wait_timeout(self.action_timeout).await {
            Ok(_) => info!(
                target: ACTION_TARGET,
                steam_id = %steam_id,
                action_type = %action_type,
                "Warning limit enforced"
            ),
            Err(e) => error!(
                target: ERROR_TARGET,
                steam_id = %steam_id,
                action_type = %action_type,
                error = %e,
                "Failed to enforce warning limit"
            ),
        }
        true
    }

    fn enforcement(&self, settings: &EscalationSettings, steam_id: SteamId) -> ActionKind {
        let target = steam_id.to_string();
        let author = self.owner.to_string();
        match settings.action {
            EscalationKind::Mute => {
                ActionKind::mute(target, author, ESCALATION_REASON, settings.duration())
            }
            EscalationKind::Ban => {
                ActionKind::ban(target, author, ESCALATION_REASON, settings.duration())
            }
            EscalationKind::Kick => ActionKind::kick(target, author, ESCALATION_REASON),
        }
    }

    /// Drop warnings older than the window as of `now`, deleting emptied lists.
    ///
    /// Returns the number of warnings removed.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let timeout = chrono::Duration::from_std(self.settings.timeout())
            .unwrap_or(chrono::Duration::MAX);

        let mut warnings = self.warnings.write().await;
        let mut removed = 0;
        warnings.retain(|_, list| {
            let before = list.len();
            list.retain(|w| now.signed_duration_since(w.created_on) <= timeout);
            removed += before - list.len();
            !list.is_empty()
        });
        removed
    }

    /// Expire warnings on a fixed interval until shutdown
    pub async fn run_sweeper(self: Arc<Self>, mut shutdown: Shutdown) {
        let period = self.settings.sweep_interval();
        let mut interval = tokio::time::interval(period);
        info!(target: ACTION_TARGET, interval_ms = period.as_millis(), "Warning sweeper started");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let removed = self.sweep_at(Utc::now()).await;
                    if removed > 0 {
                        debug!(target: ACTION_TARGET, removed, "Expired warnings");
                    }
                }
            }
        }
        info!(target: ACTION_TARGET, "Warning sweeper stopped");
    }

    /// Current warnings held for a player
    pub async fn warning_count(&self, steam_id: SteamId) -> usize {
        self.warnings
            .read()
            .await
            .get(&steam_id)
            .map_or(0, Vec::len)
    }

    /// Copy of the whole warning map
    pub async fn snapshot(&self) -> HashMap<SteamId, Vec<UserWarning>> {
        self.warnings.read().await.clone()
    }
}
