//! Backing store interface
//!
//! The relational layer is external to this crate. Everything the buses and
//! handlers need from it goes through [`Store`]; [`MemoryStore`] is the
//! in-process implementation used by the binary and the tests.

mod memory;

pub use memory::MemoryStore;

use crate::model::{
    Ban, BanNet, ChatMessage, Cidr, Filter, Person, Server, ServerLog, SteamId,
};
use crate::warning::EscalationSettings;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::net::IpAddr;
use thiserror::Error;

/// Errors returned by store operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No record matched the query
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A unique constraint would be violated
    #[error("Duplicate record: {0}")]
    Duplicate(String),

    /// The backend could not serve the request
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence operations consumed by the core
///
/// Every call is committed independently; there are no transactions spanning calls.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Store: Send + Sync {
    async fn server_by_name(&self, name: &str) -> StoreResult<Server>;

    async fn servers(&self) -> StoreResult<Vec<Server>>;

    async fn get_or_create_person(&self, steam_id: SteamId) -> StoreResult<Person>;

    async fn person_by_steam_id(&self, steam_id: SteamId) -> StoreResult<Person>;

    async fn person_by_discord_id(&self, discord_id: u64) -> StoreResult<Person>;

    async fn save_person(&self, person: &Person) -> StoreResult<()>;

    /// Record an address the player connected from
    async fn add_person_ip(&self, steam_id: SteamId, address: IpAddr) -> StoreResult<()>;

    async fn people_by_cidr(&self, cidr: Cidr) -> StoreResult<Vec<Person>>;

    async fn insert_log(&self, log: &ServerLog) -> StoreResult<()>;

    async fn chat_history(&self, steam_id: SteamId) -> StoreResult<Vec<ChatMessage>>;

    async fn filters(&self) -> StoreResult<Vec<Filter>>;

    async fn insert_filter(&self, pattern: &str) -> StoreResult<Filter>;

    async fn delete_filter(&self, filter_id: i64) -> StoreResult<Filter>;

    async fn save_ban(&self, ban: &Ban) -> StoreResult<()>;

    async fn ban_by_steam_id(&self, steam_id: SteamId) -> StoreResult<Ban>;

    async fn drop_ban(&self, ban: &Ban) -> StoreResult<()>;

    /// Bans whose `valid_until` has passed
    async fn expired_bans(&self, now: DateTime<Utc>) -> StoreResult<Vec<Ban>>;

    async fn save_ban_net(&self, ban_net: &BanNet) -> StoreResult<()>;

    async fn ban_nets_for_ip(&self, address: IpAddr) -> StoreResult<Vec<BanNet>>;

    async fn escalation_settings(&self) -> StoreResult<Option<EscalationSettings>>;

    async fn save_escalation_settings(&self, settings: &EscalationSettings) -> StoreResult<()>;
}
