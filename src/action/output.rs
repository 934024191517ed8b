//! Successful action results

use crate::model::{
    Ban, BanNet, ChatMessage, Filter, Person, PersonIp, PlayerLocation, Server,
};
use derive_more::From;
use std::collections::HashMap;

/// Value produced by a successful handler
#[derive(Debug, Clone, PartialEq, From)]
pub enum ActionOutput {
    None,
    Person(Person),
    People(Vec<Person>),
    Ban(Ban),
    BanNet(BanNet),
    BanNets(Vec<BanNet>),
    Filter(Filter),
    FilterMatch(Option<Filter>),
    Server(Server),
    ServerList(Vec<Server>),
    /// Servers a player is currently connected to
    Locations(Vec<PlayerLocation>),
    IpHistory(Vec<PersonIp>),
    ChatHistory(Vec<ChatMessage>),
    /// RCON output keyed by server short name
    Responses(HashMap<String, String>),
}
