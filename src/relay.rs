//! In-game chat relay to a Discord channel

use crate::event::{LogEvent, MsgType};
use crate::shutdown::Shutdown;
use crate::{ERROR_TARGET, EVENT_TARGET};
use poise::serenity_prelude::{ChannelId, Http};
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;
use tracing::{debug, error};

/// Posts chat events to one channel
pub struct DiscordRelay {
    http: Arc<Http>,
    channel: ChannelId,
}

impl DiscordRelay {
    #[must_use]
    pub fn new(http: Arc<Http>, channel: ChannelId) -> Self {
        Self { http, channel }
    }

    pub async fn run(self, mut events: Receiver<Arc<LogEvent>>, mut shutdown: Shutdown) {
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                event = events.recv() => {
                    let Some(event) = event else { break };
                    let Some(text) = format_chat(&event) else { continue };
                    if let Err(e) = self.channel.say(&*self.http, text).await {
                        error!(target: ERROR_TARGET, error = %e, "Failed to relay chat");
                    }
                }
            }
        }
        debug!(target: EVENT_TARGET, "Chat relay stopped");
    }
}

/// Render a chat event for Discord, or `None` for anything else
#[must_use]
pub fn format_chat(event: &LogEvent) -> Option<String> {
    let team = match event.msg_type {
        MsgType::Say => "",
        MsgType::SayTeam => " (team)",
        _ => return None,
    };
    let message = event.field("msg")?;
    let name = event
        .player1
        .as_ref()
        .map(|p| p.name.as_str())
        .filter(|n| !n.is_empty())
        .or_else(|| event.field("name"))
        .unwrap_or("unknown");

    Some(format!(
        "**{}** `{}`{}: {}",
        escape(&event.server.name_short),
        escape(name),
        team,
        escape(message)
    ))
}

// Keep players from pinging roles or everyone through the relay
fn escape(text: &str) -> String {
    text.replace('@', "@\u{200b}").replace('`', "'")
}
