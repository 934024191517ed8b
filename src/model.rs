//! Domain records shared by the buses, the store and the RCON layer.
//!
//! Everything here is plain data. Persistence lives behind [`crate::store::Store`].

use crate::action::Origin;
use crate::event::MsgType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Offset between an account id and its 64-bit steam id
pub const STEAM_ID_BASE: u64 = 76_561_197_960_265_728;

/// Errors raised when parsing identifiers from moderator or log input
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Invalid steam id: {0}")]
    SteamId(String),

    #[error("Invalid network: {0}")]
    Cidr(String),
}

/// 64-bit steam id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SteamId(u64);

impl SteamId {
    /// Wrap a raw 64-bit id, rejecting values below the individual account range
    ///
    /// # Errors
    /// Returns `ParseError::SteamId` if the value cannot be an individual account
    pub fn new(id: u64) -> Result<Self, ParseError> {
        if id <= STEAM_ID_BASE {
            return Err(ParseError::SteamId(id.to_string()));
        }
        Ok(Self(id))
    }

    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn account_id(self) -> u64 {
        self.0 - STEAM_ID_BASE
    }

    /// `[U:1:N]` form used by game logs and SourceMod targeting
    #[must_use]
    pub fn steam3(self) -> String {
        format!("[U:1:{}]", self.account_id())
    }
}

impl fmt::Display for SteamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SteamId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        let invalid = || ParseError::SteamId(s.to_string());

        if let Some(inner) = input.strip_prefix('[').and_then(|v| v.strip_suffix(']')) {
            // [U:1:N]
            let mut parts = inner.split(':');
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some("U"), Some(_), Some(account), None) => {
                    let account: u64 = account.parse().map_err(|_| invalid())?;
                    let id = STEAM_ID_BASE.checked_add(account).ok_or_else(invalid)?;
                    return Self::new(id).map_err(|_| invalid());
                }
                _ => return Err(invalid()),
            }
        }

        if let Some(rest) = input.strip_prefix("STEAM_") {
            // STEAM_X:Y:Z
            let parts: Vec<&str> = rest.split(':').collect();
            if parts.len() != 3 {
                return Err(invalid());
            }
            let y: u64 = parts[1].parse().map_err(|_| invalid())?;
            let z: u64 = parts[2].parse().map_err(|_| invalid())?;
            if y > 1 {
                return Err(invalid());
            }
            let id = z
                .checked_mul(2)
                .and_then(|v| v.checked_add(y))
                .and_then(|v| STEAM_ID_BASE.checked_add(v))
                .ok_or_else(invalid)?;
            return Self::new(id).map_err(|_| invalid());
        }

        let id: u64 = input.parse().map_err(|_| invalid())?;
        Self::new(id).map_err(|_| invalid())
    }
}

impl TryFrom<String> for SteamId {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SteamId> for String {
    fn from(id: SteamId) -> Self {
        id.to_string()
    }
}

/// An IPv4 or IPv6 network in `addr/prefix` notation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cidr {
    network: IpAddr,
    prefix: u8,
}

impl Cidr {
    #[must_use]
    pub fn network(&self) -> IpAddr {
        self.network
    }

    #[must_use]
    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Check whether an address falls inside this network
    #[must_use]
    pub fn contains(&self, addr: IpAddr) -> bool {
        match (self.network, addr) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = u32::MAX.checked_shl(32 - u32::from(self.prefix)).unwrap_or(0);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = u128::MAX.checked_shl(128 - u32::from(self.prefix)).unwrap_or(0);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

impl FromStr for Cidr {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::Cidr(s.to_string());
        let (addr, prefix) = match s.trim().split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s.trim(), None),
        };
        let network: IpAddr = addr.parse().map_err(|_| invalid())?;
        let max = if network.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix {
            Some(p) => p.parse::<u8>().map_err(|_| invalid())?,
            None => max,
        };
        if prefix > max {
            return Err(invalid());
        }
        Ok(Self { network, prefix })
    }
}

impl TryFrom<String> for Cidr {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Cidr> for String {
    fn from(cidr: Cidr) -> Self {
        cidr.to_string()
    }
}

/// A game server known to the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    #[serde(default)]
    pub server_id: i64,
    /// Full name, used to match incoming log streams
    pub name: String,
    /// Short name, used as the key for broadcast results
    pub name_short: String,
    pub host: String,
    pub port: u16,
    /// RCON password
    pub rcon: String,
}

impl Server {
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// An address a player was seen connecting from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonIp {
    pub address: IpAddr,
    pub created_on: DateTime<Utc>,
}

/// A player identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub steam_id: SteamId,
    pub name: String,
    pub discord_id: Option<u64>,
    pub ip_history: Vec<PersonIp>,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
}

impl Person {
    #[must_use]
    pub fn new(steam_id: SteamId) -> Self {
        let now = Utc::now();
        Self {
            steam_id,
            name: String::new(),
            discord_id: None,
            ip_history: Vec::new(),
            created_on: now,
            updated_on: now,
        }
    }
}

/// A player ban
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ban {
    pub ban_id: Uuid,
    pub steam_id: SteamId,
    pub author_id: SteamId,
    pub reason: String,
    pub origin: Origin,
    pub created_on: DateTime<Utc>,
    /// `None` is permanent
    pub valid_until: Option<DateTime<Utc>>,
}

impl Ban {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.valid_until.is_some_and(|until| until <= now)
    }
}

/// A network ban
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanNet {
    pub net_id: Uuid,
    pub cidr: Cidr,
    pub author_id: SteamId,
    pub reason: String,
    pub origin: Origin,
    pub created_on: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
}

/// A filtered word pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub filter_id: i64,
    pub pattern: String,
    pub created_on: DateTime<Utc>,
}

/// A persisted log event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerLog {
    pub server_id: i64,
    pub msg_type: MsgType,
    pub fields: HashMap<String, String>,
    pub source_id: Option<SteamId>,
    pub target_id: Option<SteamId>,
    pub created_on: DateTime<Utc>,
}

/// A chat line pulled from the persisted logs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub server_id: i64,
    pub team: bool,
    pub message: String,
    pub created_on: DateTime<Utc>,
}

/// Where a player was found by a `status` sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerLocation {
    pub server: String,
    pub name: String,
    pub steam_id: SteamId,
    pub user_id: u32,
}
