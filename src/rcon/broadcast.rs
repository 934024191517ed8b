//! Fan-out command execution across a server fleet

use crate::ERROR_TARGET;
use crate::model::Server;
use crate::rcon::{RconDialer, RconError, RconResult, sanitize_command};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, warn};

/// Runs console commands against one or many servers
#[derive(Clone)]
pub struct Broadcaster {
    dialer: Arc<dyn RconDialer>,
    /// Bound on opening a connection
    dial_timeout: Duration,
    /// Bound on all work for a single server, dial included
    server_timeout: Duration,
}

impl Broadcaster {
    pub fn new(dialer: Arc<dyn RconDialer>, dial_timeout: Duration, server_timeout: Duration) -> Self {
        Self {
            dialer,
            dial_timeout,
            server_timeout,
        }
    }

    /// Execute a single command on a single server
    ///
    /// # Errors
    /// Returns an `RconError` if the server cannot be reached, rejects the
    /// password, or does not answer within the per-server timeout.
    pub async fn exec(&self, server: &Server, command: &str) -> RconResult<String> {
        let work = async {
            let mut conn = self
                .dialer
                .dial(&server.addr(), &server.rcon, self.dial_timeout)
                .await?;
            conn.exec(sanitize_command(command)).await
        };

        tokio::time::timeout(self.server_timeout, work)
            .await
            .map_err(|_| RconError::Timeout(self.server_timeout))?
    }

    /// Execute `commands` in order on every server concurrently.
    ///
    /// Returns one entry per server that could be dialed, keyed by short name and
    /// holding the output of the last command run there. Servers that fail to dial
    /// or time out before the first command completes have no entry.
    pub async fn broadcast<S: AsRef<str>>(
        &self,
        servers: &[Server],
        commands: &[S],
    ) -> HashMap<String, String> {
        let responses = Arc::new(Mutex::new(HashMap::new()));
        let commands: Arc<Vec<String>> = Arc::new(
            commands
                .iter()
                .map(|c| sanitize_command(c.as_ref()).to_string())
                .collect(),
        );

        let mut workers = Vec::with_capacity(servers.len());
        for server in servers {
            let server = server.clone();
            let dialer = Arc::clone(&self.dialer);
            let commands = Arc::clone(&commands);
            let responses = Arc::clone(&responses);
            let dial_timeout = self.dial_timeout;
            let server_timeout = self.server_timeout;

            workers.push(tokio::spawn(async move {
                let work = async {
                    let mut conn = match dialer.dial(&server.addr(), &server.rcon, dial_timeout).await {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!(target: ERROR_TARGET, server = %server.name_short, error = %e, "Failed to connect to server");
                            return;
                        }
                    };
                    for command in commands.iter() {
                        let response = match conn.exec(command).await {
                            Ok(response) => response,
                            Err(e) => {
                                error!(target: ERROR_TARGET, server = %server.name_short, error = %e, "Failed to exec rcon command");
                                String::new()
                            }
                        };
                        // Only the final command's output is kept per server
                        responses
                            .lock()
                            .await
                            .insert(server.name_short.clone(), response);
                    }
                };

                if tokio::time::timeout(server_timeout, work).await.is_err() {
                    warn!(target: ERROR_TARGET, server = %server.name_short, timeout = ?server_timeout, "RCON broadcast timed out");
                }
            }));
        }

        for worker in workers {
            if let Err(e) = worker.await {
                error!(target: ERROR_TARGET, error = %e, "RCON broadcast worker failed");
            }
        }

        let mut responses = responses.lock().await;
        std::mem::take(&mut *responses)
    }
}
