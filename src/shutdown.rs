//! Cooperative shutdown
//!
//! A single [`ShutdownTrigger`] owns a `watch` flag; every long-running task holds
//! a [`Shutdown`] clone and leaves its loop on the next wake-up after the flag
//! flips.

use crate::CONSOLE_TARGET;
use tokio::sync::watch;
use tracing::info;

/// Sending side of the shutdown flag
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Receiving side of the shutdown flag
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl ShutdownTrigger {
    #[must_use]
    pub fn new() -> (Self, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, Shutdown { rx })
    }

    #[must_use]
    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }

    /// Signal every subscriber
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl Shutdown {
    /// Resolves once shutdown is signalled or the trigger is dropped
    pub async fn cancelled(&mut self) {
        let _ = self.rx.wait_for(|stop| *stop).await;
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Wait for SIGINT/SIGTERM (Ctrl+C on Windows)
///
/// # Errors
/// Returns an error if the signal handlers cannot be installed
pub async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => info!(target: CONSOLE_TARGET, "SIGINT received - initiating graceful shutdown"),
            _ = sigterm.recv() => info!(target: CONSOLE_TARGET, "SIGTERM received - initiating graceful shutdown"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!(target: CONSOLE_TARGET, "Ctrl+C received - initiating graceful shutdown");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_wakes_subscribers() {
        let (trigger, mut first) = ShutdownTrigger::new();
        let mut second = trigger.subscribe();
        assert!(!first.is_cancelled());

        let waiter = tokio::spawn(async move { second.cancelled().await });
        trigger.trigger();

        first.cancelled().await;
        assert!(first.is_cancelled());
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_flag() {
        let (trigger, _shutdown) = ShutdownTrigger::new();
        trigger.trigger();
        let mut late = trigger.subscribe();
        late.cancelled().await;
        assert!(late.is_cancelled());
    }
}
