//! Log ingestion
//!
//! [`LogIngest`] turns raw per-server log lines into [`LogEvent`]s and publishes
//! them. [`LogWriter`] is the event consumer that persists everything.

use crate::event::{EventBus, LogEvent, MsgType};
use crate::model::{Person, Server, ServerLog, SteamId};
use crate::parse::LogParser;
use crate::shutdown::Shutdown;
use crate::store::Store;
use crate::{ERROR_TARGET, EVENT_TARGET};
use chrono::Utc;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{Receiver, Sender};
use tracing::{debug, error, info, warn};

/// Store timeout applied to every persisted event
pub const LOG_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause between replayed lines
pub const REPLAY_INTERVAL: Duration = Duration::from_millis(200);

/// One raw line as received from a game server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPayload {
    pub server_name: String,
    pub message: String,
}

/// Errors raised while setting up log replay
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Invalid replay pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("No log files match {0}")]
    NoFiles(String),

    #[error("Failed to read log file: {0}")]
    Io(#[from] std::io::Error),
}

/// Parses raw lines and publishes the resulting events
pub struct LogIngest {
    store: Arc<dyn Store>,
    parser: Arc<dyn LogParser>,
    events: Arc<EventBus>,
}

impl LogIngest {
    pub fn new(store: Arc<dyn Store>, parser: Arc<dyn LogParser>, events: Arc<EventBus>) -> Self {
        Self {
            store,
            parser,
            events,
        }
    }

    /// Drain the raw queue until shutdown or until every sender is gone
    pub async fn run(self, mut rx: Receiver<LogPayload>, mut shutdown: Shutdown) {
        info!(target: EVENT_TARGET, "Log ingest started");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                maybe = rx.recv() => match maybe {
                    Some(payload) => {
                        self.process(payload).await;
                    }
                    None => break,
                },
            }
        }
        info!(target: EVENT_TARGET, "Log ingest stopped");
    }

    /// Handle one line. Returns the emitted event, or `None` if it was dropped.
    pub async fn process(&self, payload: LogPayload) -> Option<Arc<LogEvent>> {
        let server = match self.store.server_by_name(&payload.server_name).await {
            Ok(server) => server,
            Err(e) => {
                warn!(
                    target: EVENT_TARGET,
                    server = %payload.server_name,
                    error = %e,
                    "Dropping log line from unknown server"
                );
                return None;
            }
        };

        let parsed = self.parser.parse(&payload.message);
        let player1 = self.resolve_player(&parsed.fields, "sid").await;
        let player2 = self.resolve_player(&parsed.fields, "sid2").await;

        let event = Arc::new(LogEvent {
            msg_type: parsed.msg_type,
            fields: parsed.fields,
            server,
            player1,
            player2,
            raw: payload.message,
            created_on: Utc::now(),
        });

        let delivered = self.events.emit(Arc::clone(&event));
        debug!(target: EVENT_TARGET, msg_type = %event.msg_type, delivered, "Log event emitted");
        Some(event)
    }

    async fn resolve_player(&self, fields: &HashMap<String, String>, key: &str) -> Option<Person> {
        let raw = fields.get(key)?;
        let steam_id = raw.parse::<SteamId>().ok()?;
        match self.store.get_or_create_person(steam_id).await {
            Ok(mut person) => {
                let name_key = key.replace("sid", "name");
                if let Some(name) = fields.get(&name_key) {
                    person.name.clone_from(name);
                }
                Some(person)
            }
            Err(e) => {
                error!(target: ERROR_TARGET, steam_id = %steam_id, error = %e, "Failed to resolve player");
                None
            }
        }
    }
}

/// Consumer that persists every event
pub struct LogWriter {
    store: Arc<dyn Store>,
    timeout: Duration,
}

impl LogWriter {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            timeout: LOG_WRITE_TIMEOUT,
        }
    }

    pub async fn run(self, mut events: Receiver<Arc<LogEvent>>, mut shutdown: Shutdown) {
        info!(target: EVENT_TARGET, "Log writer started");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                maybe = events.recv() => match maybe {
                    Some(event) => {
                        self.write(&event).await;
                    }
                    None => break,
                },
            }
        }
        info!(target: EVENT_TARGET, "Log writer stopped");
    }

    /// Persist one event. Returns whether the log record was stored.
    pub async fn write(&self, event: &LogEvent) -> bool {
        let log = server_log(event);
        let stored = match tokio::time::timeout(self.timeout, self.store.insert_log(&log)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(target: ERROR_TARGET, error = %e, "Failed to insert server log");
                false
            }
            Err(_) => {
                error!(target: ERROR_TARGET, timeout = ?self.timeout, "Timed out inserting server log");
                false
            }
        };

        if event.msg_type == MsgType::Connected {
            self.record_address(event).await;
        }
        stored
    }

    async fn record_address(&self, event: &LogEvent) {
        let (Some(player), Some(address)) = (&event.player1, event.field("address")) else {
            return;
        };
        let Some(ip) = parse_address(address) else {
            debug!(target: EVENT_TARGET, address, "Unparseable connect address");
            return;
        };
        let result = tokio::time::timeout(self.timeout, self.store.add_person_ip(player.steam_id, ip)).await;
        if !matches!(result, Ok(Ok(()))) {
            error!(target: ERROR_TARGET, steam_id = %player.steam_id, "Failed to record player address");
        }
    }
}

fn server_log(event: &LogEvent) -> ServerLog {
    ServerLog {
        server_id: event.server.server_id,
        msg_type: event.msg_type,
        fields: event.fields.clone(),
        source_id: event.player1.as_ref().map(|p| p.steam_id),
        target_id: event.player2.as_ref().map(|p| p.steam_id),
        created_on: event.created_on,
    }
}

/// `ip:port` or a bare ip
fn parse_address(address: &str) -> Option<IpAddr> {
    address
        .parse::<SocketAddr>()
        .map(|addr| addr.ip())
        .or_else(|_| address.parse::<IpAddr>())
        .ok()
}

/// Feed lines from log files matching `pattern` into the raw queue, looping
/// over the files until shutdown.
///
/// # Errors
/// Returns an `IngestError` if the pattern is invalid, matches nothing or a file
/// cannot be read. Errors are only raised before the first line is sent.
pub async fn replay(
    pattern: &str,
    server: &Server,
    tx: Sender<LogPayload>,
    interval: Duration,
    mut shutdown: Shutdown,
) -> Result<(), IngestError> {
    let paths: Vec<PathBuf> = glob::glob(pattern)?.filter_map(Result::ok).collect();
    if paths.is_empty() {
        return Err(IngestError::NoFiles(pattern.to_string()));
    }

    let mut lines = Vec::new();
    for path in &paths {
        let content = tokio::fs::read_to_string(path).await?;
        lines.extend(
            content
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(str::to_string),
        );
    }
    info!(
        target: EVENT_TARGET,
        files = paths.len(),
        lines = lines.len(),
        server = %server.name,
        "Replaying log files"
    );
    if lines.is_empty() {
        return Ok(());
    }

    let mut ticker = tokio::time::interval(interval);
    for line in lines.iter().cycle() {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let payload = LogPayload {
                    server_name: server.name.clone(),
                    message: line.clone(),
                };
                if tx.send(payload).await.is_err() {
                    break;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{MockLogParser, ParsedLine, RegexParser};
    use crate::shutdown::ShutdownTrigger;
    use crate::store::{MemoryStore, MockStore, StoreError};

    const CHAT_LINE: &str =
        r#"L 02/21/2021 - 06:22:23: "Player<3><[U:1:22202]><Red>" say "hello world""#;

    fn server() -> Server {
        Server {
            server_id: 0,
            name: "lo-1".to_string(),
            name_short: "lo1".to_string(),
            host: "127.0.0.1".to_string(),
            port: 27015,
            rcon: "pw".to_string(),
        }
    }

    fn payload(server_name: &str, message: &str) -> LogPayload {
        LogPayload {
            server_name: server_name.to_string(),
            message: message.to_string(),
        }
    }

    #[tokio::test]
    async fn test_unknown_server_emits_nothing() {
        let mut store = MockStore::new();
        store
            .expect_server_by_name()
            .returning(|name| Err(StoreError::NotFound(format!("server {name}"))));
        store.expect_get_or_create_person().never();

        let mut parser = MockLogParser::new();
        parser.expect_parse().never();

        let events = Arc::new(EventBus::new());
        let mut all = events.subscribe("all", &[MsgType::Any], 4).unwrap();
        let ingest = LogIngest::new(Arc::new(store), Arc::new(parser), events);

        assert!(ingest.process(payload("nope", CHAT_LINE)).await.is_none());
        assert!(all.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unresolvable_player_still_emits() {
        let mut store = MockStore::new();
        store.expect_server_by_name().returning(|_| Ok(server()));
        store
            .expect_get_or_create_person()
            .returning(|_| Err(StoreError::Unavailable("down".to_string())));

        let mut parser = MockLogParser::new();
        parser.expect_parse().returning(|_| ParsedLine {
            msg_type: MsgType::Entered,
            fields: HashMap::from([("sid".to_string(), "[U:1:5]".to_string())]),
        });

        let events = Arc::new(EventBus::new());
        let ingest = LogIngest::new(Arc::new(store), Arc::new(parser), events);

        let event = ingest.process(payload("lo-1", "anything")).await.unwrap();
        assert_eq!(event.msg_type, MsgType::Entered);
        assert!(event.player1.is_none());
    }

    #[tokio::test]
    async fn test_chat_line_end_to_end() {
        let store = Arc::new(MemoryStore::seeded(vec![server()], &[]));
        let events = Arc::new(EventBus::new());
        let mut chat = events.subscribe("chat", &MsgType::CHAT, 8).unwrap();
        let mut kills = events.subscribe("kills", &[MsgType::Killed], 8).unwrap();
        let writer_rx = events.subscribe("writer", &[MsgType::Any], 8).unwrap();

        let (trigger, shutdown) = ShutdownTrigger::new();
        let writer = tokio::spawn(LogWriter::new(store.clone()).run(writer_rx, shutdown.clone()));

        let ingest = LogIngest::new(store.clone(), Arc::new(RegexParser), events);
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        let pipeline = tokio::spawn(ingest.run(rx, shutdown));

        tx.send(payload("lo-1", CHAT_LINE)).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), chat.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.msg_type, MsgType::Say);
        assert_eq!(event.field("msg"), Some("hello world"));
        assert_eq!(event.server.name, "lo-1");
        let player = event.player1.as_ref().unwrap();
        assert_eq!(player.steam_id, "[U:1:22202]".parse().unwrap());
        assert_eq!(player.name, "Player");
        assert!(kills.try_recv().is_err());

        // Give the writer a moment to persist
        for _ in 0..50 {
            if store.log_count().await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.log_count().await, 1);
        let history = store.chat_history(player.steam_id).await.unwrap();
        assert_eq!(history[0].message, "hello world");

        trigger.trigger();
        pipeline.await.unwrap();
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_overflowing_sid_keeps_pipeline_running() {
        let store = Arc::new(MemoryStore::seeded(vec![server()], &[]));
        let events = Arc::new(EventBus::new());
        let mut chat = events.subscribe("chat", &MsgType::CHAT, 8).unwrap();

        let (trigger, shutdown) = ShutdownTrigger::new();
        let ingest = LogIngest::new(store, Arc::new(RegexParser), events);
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        let pipeline = tokio::spawn(ingest.run(rx, shutdown));

        let bad = format!(r#""Player<3><[U:1:{}]><Red>" say "first""#, u64::MAX);
        tx.send(payload("lo-1", &bad)).await.unwrap();
        tx.send(payload("lo-1", CHAT_LINE)).await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(1), chat.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.field("msg"), Some("first"));
        assert!(first.player1.is_none());

        let second = tokio::time::timeout(Duration::from_secs(1), chat.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.field("msg"), Some("hello world"));
        assert!(second.player1.is_some());

        trigger.trigger();
        pipeline.await.unwrap();
    }

    #[tokio::test]
    async fn test_writer_records_connect_address() {
        let store = Arc::new(MemoryStore::seeded(vec![server()], &[]));
        let ingest = LogIngest::new(store.clone(), Arc::new(RegexParser), Arc::new(EventBus::new()));
        let writer = LogWriter::new(store.clone());

        let event = ingest
            .process(payload(
                "lo-1",
                r#""A<1><[U:1:22202]><>" connected, address "10.9.8.7:27005""#,
            ))
            .await
            .unwrap();
        assert!(writer.write(&event).await);

        let person = store
            .person_by_steam_id("[U:1:22202]".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(person.ip_history.len(), 1);
        assert_eq!(person.ip_history[0].address, "10.9.8.7".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn test_writer_reports_store_failure() {
        let mut store = MockStore::new();
        store
            .expect_insert_log()
            .returning(|_| Err(StoreError::Unavailable("down".to_string())));
        let writer = LogWriter::new(Arc::new(store));

        let event = LogEvent {
            msg_type: MsgType::Unknown,
            fields: HashMap::new(),
            server: server(),
            player1: None,
            player2: None,
            raw: String::new(),
            created_on: Utc::now(),
        };
        assert!(!writer.write(&event).await);
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("1.2.3.4:27005"), "1.2.3.4".parse().ok());
        assert_eq!(parse_address("1.2.3.4"), "1.2.3.4".parse().ok());
        assert_eq!(parse_address("loopback"), None);
    }

    #[tokio::test]
    async fn test_replay_without_matches_fails() {
        let (_trigger, shutdown) = ShutdownTrigger::new();
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let result = replay(
            "/nonexistent/gamewarden/*.log",
            &server(),
            tx,
            REPLAY_INTERVAL,
            shutdown,
        )
        .await;
        assert!(matches!(result, Err(IngestError::NoFiles(_))));
    }
}
