use crate::action::ActionBus;
use crate::config::Config;
use crate::event::EventBus;
use crate::filter::FilterSet;
use crate::rcon::Broadcaster;
use crate::store::Store;
use crate::warning::WarningTracker;
use dashmap::DashMap;
use poise::serenity_prelude as serenity;
use serenity::prelude::TypeMapKey;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Instant;

/// Shared state handed to Discord commands and event handlers
#[derive(Clone)]
pub struct Data(pub Arc<DataInner>);

// Implement TypeMapKey for Data to allow storing it in Serenity's data map
impl TypeMapKey for Data {
    type Value = Data;
}

impl fmt::Debug for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Data")
            .field("config", &self.config)
            .field("consumers", &self.events.consumer_count())
            .field("filters", &self.filters.len())
            .field("commands_in_flight", &self.command_started.len())
            .finish_non_exhaustive()
    }
}

impl Deref for Data {
    type Target = DataInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Data {
    #[must_use]
    pub fn new(inner: DataInner) -> Self {
        Self(Arc::new(inner))
    }
}

/// Handles to the running core
pub struct DataInner {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub actions: ActionBus,
    pub broadcaster: Broadcaster,
    pub events: Arc<EventBus>,
    /// Present when the word filter is enabled
    pub warnings: Option<Arc<WarningTracker>>,
    pub filters: Arc<FilterSet>,
    /// Start time of each running command, keyed by invocation id
    pub command_started: DashMap<u64, Instant>,
}
