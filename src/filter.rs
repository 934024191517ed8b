//! Chat word filtering
//!
//! [`FilterSet`] holds the compiled patterns; [`FilterWorker`] checks chat events
//! against them and hands offenders to the warning tracker.

use crate::event::LogEvent;
use crate::model::Filter;
use crate::shutdown::Shutdown;
use crate::warning::{WarnReason, WarningTracker};
use crate::{ERROR_TARGET, EVENT_TARGET};
use regex::{Regex, RegexBuilder};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc::Receiver;
use tracing::{info, warn};

/// Compiled, case-insensitive filter patterns
#[derive(Default)]
pub struct FilterSet {
    entries: RwLock<Vec<(Filter, Regex)>>,
}

impl FilterSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile a pattern the way it is matched at runtime
    ///
    /// # Errors
    /// Returns the regex error for malformed patterns
    pub fn compile(pattern: &str) -> Result<Regex, regex::Error> {
        RegexBuilder::new(pattern).case_insensitive(true).build()
    }

    /// Replace the set. Patterns that fail to compile are skipped.
    ///
    /// Returns how many filters were loaded.
    pub fn load(&self, filters: Vec<Filter>) -> usize {
        let compiled: Vec<(Filter, Regex)> = filters
            .into_iter()
            .filter_map(|filter| match Self::compile(&filter.pattern) {
                Ok(regex) => Some((filter, regex)),
                Err(e) => {
                    warn!(target: ERROR_TARGET, filter_id = filter.filter_id, error = %e, "Skipping invalid filter");
                    None
                }
            })
            .collect();

        let count = compiled.len();
        *self.entries.write().unwrap_or_else(PoisonError::into_inner) = compiled;
        count
    }

    /// Add a filter, replacing any with the same id
    ///
    /// # Errors
    /// Returns the regex error for malformed patterns; the set is unchanged.
    pub fn insert(&self, filter: Filter) -> Result<(), regex::Error> {
        let regex = Self::compile(&filter.pattern)?;
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|(f, _)| f.filter_id != filter.filter_id);
        entries.push((filter, regex));
        Ok(())
    }

    /// Remove a filter by id. Returns whether it was present.
    pub fn remove(&self, filter_id: i64) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(f, _)| f.filter_id != filter_id);
        entries.len() != before
    }

    /// First filter matching the message
    #[must_use]
    pub fn find(&self, message: &str) -> Option<Filter> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(_, regex)| regex.is_match(message))
            .map(|(filter, _)| filter.clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Event consumer that warns players for filtered chat
pub struct FilterWorker {
    filters: Arc<FilterSet>,
    warnings: Arc<WarningTracker>,
}

impl FilterWorker {
    pub fn new(filters: Arc<FilterSet>, warnings: Arc<WarningTracker>) -> Self {
        Self { filters, warnings }
    }

    pub async fn run(self, mut events: Receiver<Arc<LogEvent>>, mut shutdown: Shutdown) {
        info!(target: EVENT_TARGET, filters = self.filters.len(), "Filter worker started");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                maybe = events.recv() => match maybe {
                    Some(event) => {
                        self.check(&event).await;
                    }
                    None => break,
                },
            }
        }
        info!(target: EVENT_TARGET, "Filter worker stopped");
    }

    /// Check one event. Returns whether a warning was issued.
    pub async fn check(&self, event: &LogEvent) -> bool {
        if !event.msg_type.is_chat() {
            return false;
        }
        let Some(message) = event.field("msg") else {
            return false;
        };
        let Some(filter) = self.filters.find(message) else {
            return false;
        };
        let Some(player) = &event.player1 else {
            warn!(target: EVENT_TARGET, server = %event.server.name, "Filtered message without a known player");
            return false;
        };

        info!(
            target: EVENT_TARGET,
            steam_id = %player.steam_id,
            server = %event.server.name,
            filter_id = filter.filter_id,
            "Filtered word in chat"
        );
        self.warnings
            .add_warning(player.steam_id, WarnReason::Language)
            .await;
        true
    }
}
