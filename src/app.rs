//! Wiring of the core services
//!
//! [`App::start`] builds every component from the config, registers the event
//! consumers and spawns the long-running tasks. All of them share one shutdown
//! signal.

use crate::action::{ActionBus, ActionDispatcher, HandlerContext, HandlerRegistry};
use crate::config::Config;
use crate::data::{Data, DataInner};
use crate::event::{EventBus, MsgType};
use crate::filter::{FilterSet, FilterWorker};
use crate::ingest::{LogIngest, LogPayload, LogWriter, REPLAY_INTERVAL, replay};
use crate::parse::RegexParser;
use crate::rcon::{Broadcaster, RconDialer};
use crate::shutdown::{Shutdown, ShutdownTrigger};
use crate::store::{MemoryStore, Store};
use crate::sweeper::BanSweeper;
use crate::warning::WarningTracker;
use crate::{CONSOLE_TARGET, ERROR_TARGET, Error};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, Sender};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// How long shutdown waits for each task
const TASK_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// The running core
pub struct App {
    pub data: Data,
    /// Raw log line input
    pub log_tx: Sender<LogPayload>,
    trigger: ShutdownTrigger,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl App {
    /// Build and start every service
    ///
    /// # Errors
    /// Returns an error if the config is invalid or the initial store reads fail
    pub async fn start(config: Config, dialer: Arc<dyn RconDialer>) -> Result<Self, Error> {
        config.validate()?;

        let (trigger, shutdown) = ShutdownTrigger::new();
        let mut tasks = Vec::new();

        let store: Arc<dyn Store> = Arc::new(MemoryStore::seeded(
            config.servers.clone(),
            &config.filter.words,
        ));

        let filters = Arc::new(FilterSet::new());
        let loaded = filters.load(store.filters().await?);

        let settings = match store.escalation_settings().await? {
            Some(settings) => settings,
            None => {
                store.save_escalation_settings(&config.warnings).await?;
                config.warnings.clone()
            }
        };

        let broadcaster = Broadcaster::new(
            dialer,
            config.rcon.dial_timeout(),
            config.rcon.server_timeout(),
        );

        // Actions
        let (actions, action_rx) = ActionBus::new(config.actions.queue_capacity);
        let ctx = HandlerContext::new(Arc::clone(&store), broadcaster.clone(), Arc::clone(&filters));
        let dispatcher = ActionDispatcher::new(
            Arc::new(HandlerRegistry::new()),
            ctx,
            config.actions.timeout(),
        );
        tasks.push((
            "action dispatcher",
            tokio::spawn(dispatcher.run(action_rx, shutdown.clone())),
        ));

        // Events
        let events = Arc::new(EventBus::new());
        let capacity = config.events.consumer_queue_capacity;

        let writer_rx = events.subscribe("log writer", &[MsgType::Any], capacity)?;
        tasks.push((
            "log writer",
            tokio::spawn(LogWriter::new(Arc::clone(&store)).run(writer_rx, shutdown.clone())),
        ));

        // Validation guarantees an owner whenever the filter is on
        let warnings = match (config.filter.enabled, config.general.owner) {
            (true, Some(owner)) => {
                let warnings = Arc::new(WarningTracker::new(
                    settings,
                    owner,
                    actions.clone(),
                    config.actions.timeout(),
                ));
                tasks.push((
                    "warning sweeper",
                    tokio::spawn(Arc::clone(&warnings).run_sweeper(shutdown.clone())),
                ));

                let chat_rx = events.subscribe("word filter", &MsgType::CHAT, capacity)?;
                let worker = FilterWorker::new(Arc::clone(&filters), Arc::clone(&warnings));
                tasks.push(("word filter", tokio::spawn(worker.run(chat_rx, shutdown.clone()))));
                Some(warnings)
            }
            _ => None,
        };

        let sweeper = BanSweeper::new(Arc::clone(&store), config.ban_sweep_interval());
        tasks.push(("ban sweeper", tokio::spawn(sweeper.run(shutdown.clone()))));

        // Ingest
        let (log_tx, log_rx) = mpsc::channel(config.events.log_queue_capacity.max(1));
        let ingest = LogIngest::new(Arc::clone(&store), Arc::new(RegexParser), Arc::clone(&events));
        tasks.push(("log ingest", tokio::spawn(ingest.run(log_rx, shutdown.clone()))));

        if let (Some(pattern), Some(server_name)) =
            (&config.general.replay_logs, &config.general.replay_server)
        {
            let server = store.server_by_name(server_name).await?;
            let pattern = pattern.clone();
            let tx = log_tx.clone();
            let replay_shutdown = shutdown.clone();
            tasks.push((
                "log replay",
                tokio::spawn(async move {
                    if let Err(e) = replay(&pattern, &server, tx, REPLAY_INTERVAL, replay_shutdown).await {
                        error!(target: ERROR_TARGET, error = %e, "Log replay failed");
                    }
                }),
            ));
        }

        info!(
            target: CONSOLE_TARGET,
            servers = config.servers.len(),
            filters = loaded,
            consumers = events.consumer_count(),
            "Core services started"
        );

        let data = Data::new(DataInner {
            config,
            store,
            actions,
            broadcaster,
            events,
            warnings,
            filters,
            command_started: DashMap::new(),
        });

        Ok(Self {
            data,
            log_tx,
            trigger,
            tasks,
        })
    }

    /// A new receiver of the shared shutdown signal
    #[must_use]
    pub fn shutdown_signal(&self) -> Shutdown {
        self.trigger.subscribe()
    }

    /// Track an extra task so shutdown waits for it
    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.push((name, tokio::spawn(task)));
    }

    /// Signal shutdown and wait for every task to finish
    pub async fn shutdown(self) {
        info!(target: CONSOLE_TARGET, "Shutting down core services");
        self.trigger.trigger();
        for (name, task) in self.tasks {
            match tokio::time::timeout(TASK_DRAIN_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(target: ERROR_TARGET, task = name, error = %e, "Task panicked"),
                Err(_) => warn!(target: ERROR_TARGET, task = name, "Task did not stop in time"),
            }
        }
        info!(target: CONSOLE_TARGET, "Core services stopped");
    }
}
