//! Expired ban removal

use crate::{ACTION_TARGET, ERROR_TARGET};
use crate::shutdown::Shutdown;
use crate::store::{Store, StoreResult};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Periodically drops bans whose `valid_until` has passed
pub struct BanSweeper {
    store: Arc<dyn Store>,
    interval: Duration,
}

impl BanSweeper {
    pub fn new(store: Arc<dyn Store>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Remove every ban expired as of `now`. Returns how many were dropped.
    ///
    /// # Errors
    /// Returns the store error if the expired bans cannot be listed. Failures to
    /// drop a single ban are logged and skipped.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let mut dropped = 0;
        for ban in self.store.expired_bans(now).await? {
            match self.store.drop_ban(&ban).await {
                Ok(()) => {
                    dropped += 1;
                    info!(target: ACTION_TARGET, steam_id = %ban.steam_id, ban_id = %ban.ban_id, "Ban expired");
                }
                Err(e) => {
                    error!(target: ERROR_TARGET, steam_id = %ban.steam_id, error = %e, "Failed to drop expired ban");
                }
            }
        }
        Ok(dropped)
    }

    pub async fn run(self, mut shutdown: Shutdown) {
        let mut interval = tokio::time::interval(self.interval.max(Duration::from_millis(1)));
        info!(target: ACTION_TARGET, interval_secs = self.interval.as_secs(), "Ban sweeper started");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.sweep_at(Utc::now()).await {
                        error!(target: ERROR_TARGET, error = %e, "Ban sweep failed");
                    }
                }
            }
        }
        info!(target: ACTION_TARGET, "Ban sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Origin;
    use crate::model::{Ban, SteamId};
    use crate::store::{MemoryStore, MockStore, StoreError};
    use uuid::Uuid;

    fn ban(raw: &str, valid_until: Option<DateTime<Utc>>) -> Ban {
        Ban {
            ban_id: Uuid::new_v4(),
            steam_id: raw.parse::<SteamId>().unwrap(),
            author_id: "76561197970669109".parse().unwrap(),
            reason: "test".to_string(),
            origin: Origin::Core,
            created_on: Utc::now(),
            valid_until,
        }
    }

    #[tokio::test]
    async fn test_sweep_drops_only_expired() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let expired = ban("[U:1:1]", Some(now - chrono::Duration::minutes(1)));
        let active = ban("[U:1:2]", Some(now + chrono::Duration::minutes(1)));
        let permanent = ban("[U:1:3]", None);
        for b in [&expired, &active, &permanent] {
            store.save_ban(b).await.unwrap();
        }

        let sweeper = BanSweeper::new(store.clone(), Duration::from_secs(60));
        assert_eq!(sweeper.sweep_at(now).await.unwrap(), 1);
        assert!(store.ban_by_steam_id(expired.steam_id).await.is_err());
        assert!(store.ban_by_steam_id(active.steam_id).await.is_ok());
        assert!(store.ban_by_steam_id(permanent.steam_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_listing_failure_is_returned() {
        let mut store = MockStore::new();
        store
            .expect_expired_bans()
            .returning(|_| Err(StoreError::Unavailable("down".to_string())));
        store.expect_drop_ban().never();

        let sweeper = BanSweeper::new(Arc::new(store), Duration::from_secs(60));
        assert!(sweeper.sweep_at(Utc::now()).await.is_err());
    }
}
