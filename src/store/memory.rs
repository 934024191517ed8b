//! In-memory store
//!
//! Keeps every record in process memory. Nothing survives a restart.

use crate::event::MsgType;
use crate::model::{
    Ban, BanNet, ChatMessage, Cidr, Filter, Person, PersonIp, Server, ServerLog, SteamId,
};
use crate::store::{Store, StoreError, StoreResult};
use crate::warning::EscalationSettings;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Store backed by concurrent maps
#[derive(Clone, Default)]
pub struct MemoryStore {
    /// Servers keyed by full name
    servers: Arc<DashMap<String, Server>>,
    people: Arc<DashMap<SteamId, Person>>,
    logs: Arc<RwLock<Vec<ServerLog>>>,
    filters: Arc<DashMap<i64, Filter>>,
    next_filter_id: Arc<AtomicI64>,
    /// One ban per player
    bans: Arc<DashMap<SteamId, Ban>>,
    ban_nets: Arc<DashMap<Uuid, BanNet>>,
    escalation: Arc<RwLock<Option<EscalationSettings>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with servers and filtered words
    #[must_use]
    pub fn seeded(servers: Vec<Server>, words: &[String]) -> Self {
        let store = Self::new();
        for (idx, mut server) in servers.into_iter().enumerate() {
            if server.server_id == 0 {
                server.server_id = i64::try_from(idx).unwrap_or_default() + 1;
            }
            store.servers.insert(server.name.clone(), server);
        }
        for word in words {
            store.add_filter(word);
        }
        store
    }

    /// Number of persisted log records
    pub async fn log_count(&self) -> usize {
        self.logs.read().await.len()
    }

    fn add_filter(&self, pattern: &str) -> Filter {
        let filter = Filter {
            filter_id: self.next_filter_id.fetch_add(1, Ordering::SeqCst) + 1,
            pattern: pattern.to_string(),
            created_on: Utc::now(),
        };
        self.filters.insert(filter.filter_id, filter.clone());
        filter
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn server_by_name(&self, name: &str) -> StoreResult<Server> {
        self.servers
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound(format!("server {name}")))
    }

    async fn servers(&self) -> StoreResult<Vec<Server>> {
        let mut servers: Vec<Server> = self.servers.iter().map(|e| e.value().clone()).collect();
        servers.sort_by_key(|s| s.server_id);
        Ok(servers)
    }

    async fn get_or_create_person(&self, steam_id: SteamId) -> StoreResult<Person> {
        Ok(self
            .people
            .entry(steam_id)
            .or_insert_with(|| Person::new(steam_id))
            .value()
            .clone())
    }

    async fn person_by_steam_id(&self, steam_id: SteamId) -> StoreResult<Person> {
        self.people
            .get(&steam_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound(format!("person {steam_id}")))
    }

    async fn person_by_discord_id(&self, discord_id: u64) -> StoreResult<Person> {
        self.people
            .iter()
            .find(|entry| entry.value().discord_id == Some(discord_id))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound(format!("discord user {discord_id}")))
    }

    async fn save_person(&self, person: &Person) -> StoreResult<()> {
        let mut person = person.clone();
        person.updated_on = Utc::now();
        self.people.insert(person.steam_id, person);
        Ok(())
    }

    async fn add_person_ip(&self, steam_id: SteamId, address: IpAddr) -> StoreResult<()> {
        let mut person = self
            .people
            .entry(steam_id)
            .or_insert_with(|| Person::new(steam_id));
        if !person.ip_history.iter().any(|ip| ip.address == address) {
            person.ip_history.push(PersonIp {
                address,
                created_on: Utc::now(),
            });
        }
        Ok(())
    }

    async fn people_by_cidr(&self, cidr: Cidr) -> StoreResult<Vec<Person>> {
        Ok(self
            .people
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .ip_history
                    .iter()
                    .any(|ip| cidr.contains(ip.address))
            })
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn insert_log(&self, log: &ServerLog) -> StoreResult<()> {
        self.logs.write().await.push(log.clone());
        Ok(())
    }

    async fn chat_history(&self, steam_id: SteamId) -> StoreResult<Vec<ChatMessage>> {
        let logs = self.logs.read().await;
        Ok(logs
            .iter()
            .filter(|log| log.source_id == Some(steam_id))
            .filter(|log| matches!(log.msg_type, MsgType::Say | MsgType::SayTeam))
            .map(|log| ChatMessage {
                server_id: log.server_id,
                team: log.msg_type == MsgType::SayTeam,
                message: log.fields.get("msg").cloned().unwrap_or_default(),
                created_on: log.created_on,
            })
            .collect())
    }

    async fn filters(&self) -> StoreResult<Vec<Filter>> {
        let mut filters: Vec<Filter> = self.filters.iter().map(|e| e.value().clone()).collect();
        filters.sort_by_key(|f| f.filter_id);
        Ok(filters)
    }

    async fn insert_filter(&self, pattern: &str) -> StoreResult<Filter> {
        if self.filters.iter().any(|e| e.value().pattern == pattern) {
            return Err(StoreError::Duplicate(format!("filter {pattern}")));
        }
        Ok(self.add_filter(pattern))
    }

    async fn delete_filter(&self, filter_id: i64) -> StoreResult<Filter> {
        self.filters
            .remove(&filter_id)
            .map(|(_, filter)| filter)
            .ok_or_else(|| StoreError::NotFound(format!("filter {filter_id}")))
    }

    async fn save_ban(&self, ban: &Ban) -> StoreResult<()> {
        self.bans.insert(ban.steam_id, ban.clone());
        Ok(())
    }

    async fn ban_by_steam_id(&self, steam_id: SteamId) -> StoreResult<Ban> {
        self.bans
            .get(&steam_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound(format!("ban for {steam_id}")))
    }

    async fn drop_ban(&self, ban: &Ban) -> StoreResult<()> {
        self.bans
            .remove(&ban.steam_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("ban for {}", ban.steam_id)))
    }

    async fn expired_bans(&self, now: DateTime<Utc>) -> StoreResult<Vec<Ban>> {
        Ok(self
            .bans
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn save_ban_net(&self, ban_net: &BanNet) -> StoreResult<()> {
        self.ban_nets.insert(ban_net.net_id, ban_net.clone());
        Ok(())
    }

    async fn ban_nets_for_ip(&self, address: IpAddr) -> StoreResult<Vec<BanNet>> {
        Ok(self
            .ban_nets
            .iter()
            .filter(|entry| entry.value().cidr.contains(address))
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn escalation_settings(&self) -> StoreResult<Option<EscalationSettings>> {
        Ok(self.escalation.read().await.clone())
    }

    async fn save_escalation_settings(&self, settings: &EscalationSettings) -> StoreResult<()> {
        *self.escalation.write().await = Some(settings.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Origin;
    use std::collections::HashMap;

    fn sid(raw: &str) -> SteamId {
        raw.parse().unwrap()
    }

    fn server(name: &str) -> Server {
        Server {
            server_id: 0,
            name: name.to_string(),
            name_short: name.to_string(),
            host: "127.0.0.1".to_string(),
            port: 27015,
            rcon: "secret".to_string(),
        }
    }

    #[tokio::test]
    async fn test_seeded_servers_and_filters() {
        let store = MemoryStore::seeded(
            vec![server("a"), server("b")],
            &["badword".to_string()],
        );

        let a = store.server_by_name("a").await.unwrap();
        assert_eq!(a.server_id, 1);
        assert_eq!(store.servers().await.unwrap().len(), 2);
        assert!(matches!(
            store.server_by_name("missing").await,
            Err(StoreError::NotFound(_))
        ));

        let filters = store.filters().await.unwrap();
        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0].pattern, "badword");
    }

    #[tokio::test]
    async fn test_filter_crud() {
        let store = MemoryStore::new();
        let filter = store.insert_filter("foo").await.unwrap();
        assert!(matches!(
            store.insert_filter("foo").await,
            Err(StoreError::Duplicate(_))
        ));

        let removed = store.delete_filter(filter.filter_id).await.unwrap();
        assert_eq!(removed.pattern, "foo");
        assert!(store.delete_filter(filter.filter_id).await.is_err());
    }

    #[tokio::test]
    async fn test_get_or_create_person_is_stable() {
        let store = MemoryStore::new();
        let id = sid("76561197960287930");

        let mut person = store.get_or_create_person(id).await.unwrap();
        person.discord_id = Some(42);
        store.save_person(&person).await.unwrap();

        let again = store.get_or_create_person(id).await.unwrap();
        assert_eq!(again.discord_id, Some(42));
        assert_eq!(store.person_by_discord_id(42).await.unwrap().steam_id, id);
    }

    #[tokio::test]
    async fn test_people_by_cidr() {
        let store = MemoryStore::new();
        let inside = sid("76561197960287930");
        let outside = sid("76561197960287931");
        store
            .add_person_ip(inside, "10.1.2.3".parse().unwrap())
            .await
            .unwrap();
        store
            .add_person_ip(outside, "192.168.0.1".parse().unwrap())
            .await
            .unwrap();

        let found = store
            .people_by_cidr("10.0.0.0/8".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].steam_id, inside);
    }

    #[tokio::test]
    async fn test_chat_history_from_logs() {
        let store = MemoryStore::new();
        let id = sid("76561197960287930");
        let mut fields = HashMap::new();
        fields.insert("msg".to_string(), "hello".to_string());

        for msg_type in [MsgType::Say, MsgType::SayTeam, MsgType::Killed] {
            store
                .insert_log(&ServerLog {
                    server_id: 1,
                    msg_type,
                    fields: fields.clone(),
                    source_id: Some(id),
                    target_id: None,
                    created_on: Utc::now(),
                })
                .await
                .unwrap();
        }

        let history = store.chat_history(id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(!history[0].team);
        assert!(history[1].team);
        assert_eq!(store.log_count().await, 3);
    }

    #[tokio::test]
    async fn test_expired_bans() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let author = sid("76561197960287930");
        for (raw, until) in [
            ("76561197960287931", Some(now - chrono::Duration::minutes(1))),
            ("76561197960287932", Some(now + chrono::Duration::minutes(1))),
            ("76561197960287933", None),
        ] {
            store
                .save_ban(&Ban {
                    ban_id: Uuid::new_v4(),
                    steam_id: sid(raw),
                    author_id: author,
                    reason: "test".to_string(),
                    origin: Origin::Web,
                    created_on: now,
                    valid_until: until,
                })
                .await
                .unwrap();
        }

        let expired = store.expired_bans(now).await.unwrap();
        assert_eq!(expired.len(), 1);
        store.drop_ban(&expired[0]).await.unwrap();
        assert!(store.ban_by_steam_id(sid("76561197960287931")).await.is_err());
    }
}
