//! Publish/subscribe registry for log events

use crate::EVENT_TARGET;
use crate::event::{EventError, EventResult, LogEvent, MsgType};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};
use tracing::{debug, info};

/// A registered delivery queue
struct Consumer {
    name: String,
    queue: Sender<Arc<LogEvent>>,
    /// Accepted categories, may contain `MsgType::Any`
    types: HashSet<MsgType>,
    /// Events lost because the queue was full
    dropped: AtomicU64,
}

impl Consumer {
    fn accepts(&self, msg_type: MsgType) -> bool {
        self.types.contains(&MsgType::Any) || self.types.contains(&msg_type)
    }
}

/// Fans log events out to every interested consumer.
///
/// Registration happens at startup; `emit` only reads the registry.
#[derive(Default)]
pub struct EventBus {
    consumers: RwLock<Vec<Consumer>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a queue for the given categories.
    ///
    /// # Errors
    /// Returns `EventError::DuplicateConsumer` if this queue is already
    /// registered; the registry is left unchanged.
    pub fn register_consumer(
        &self,
        name: impl Into<String>,
        queue: Sender<Arc<LogEvent>>,
        types: &[MsgType],
    ) -> EventResult<()> {
        let name = name.into();
        let mut consumers = self
            .consumers
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if consumers.iter().any(|c| c.queue.same_channel(&queue)) {
            return Err(EventError::DuplicateConsumer(name));
        }

        info!(
            target: EVENT_TARGET,
            consumer = %name,
            types = ?types,
            "Registered event consumer"
        );
        consumers.push(Consumer {
            name,
            queue,
            types: types.iter().copied().collect(),
            dropped: AtomicU64::new(0),
        });
        Ok(())
    }

    /// Create a bounded queue and register it in one step
    ///
    /// # Errors
    /// Never fails for a fresh queue; the `Result` mirrors `register_consumer`.
    pub fn subscribe(
        &self,
        name: impl Into<String>,
        types: &[MsgType],
        capacity: usize,
    ) -> EventResult<Receiver<Arc<LogEvent>>> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.register_consumer(name, tx, types)?;
        Ok(rx)
    }

    /// Deliver an event to every matching consumer without waiting.
    ///
    /// A consumer whose queue is full misses the event. Returns the number of
    /// consumers that received it.
    pub fn emit(&self, event: Arc<LogEvent>) -> usize {
        let consumers = self
            .consumers
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let mut delivered = 0;
        for consumer in consumers.iter().filter(|c| c.accepts(event.msg_type)) {
            match consumer.queue.try_send(Arc::clone(&event)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    let dropped = consumer.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!(
                        target: EVENT_TARGET,
                        consumer = %consumer.name,
                        msg_type = %event.msg_type,
                        dropped,
                        "Consumer queue full, event dropped"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(target: EVENT_TARGET, consumer = %consumer.name, "Consumer queue closed");
                }
            }
        }
        delivered
    }

    /// Number of registered consumers
    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.consumers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Events dropped for a consumer so far
    #[must_use]
    pub fn dropped(&self, name: &str) -> u64 {
        self.consumers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|c| c.name == name)
            .map(|c| c.dropped.load(Ordering::Relaxed))
            .sum()
    }
}
