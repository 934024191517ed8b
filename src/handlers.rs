use crate::EVENT_TARGET;
use poise::serenity_prelude::{self as serenity, Context, EventHandler, GuildId, Ready};
use tracing::{info, warn};

pub struct Handler;

#[serenity::async_trait]
impl EventHandler for Handler {
    /// Called when the bot is ready, but the cache may not be fully populated yet.
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!(
            target: EVENT_TARGET,
            user = %ready.user.name,
            shard = ctx.shard_id.0,
            guilds = ready.guilds.len(),
            "Connected to Discord"
        );
    }

    /// Called when the cache is fully populated.
    async fn cache_ready(&self, ctx: Context, guilds: Vec<GuildId>) {
        let cached = ctx.cache.guild_count();
        if cached != guilds.len() {
            warn!(
                target: EVENT_TARGET,
                cached,
                actual = guilds.len(),
                "Cache guild count mismatch"
            );
        }
        info!(target: EVENT_TARGET, guilds = guilds.len(), "Cache ready");
    }
}
