//! Sources for the always-subscribed instrument set

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use common::{parse_watchlist, WatchlistEntry};
use storage::TrackerStore;

use crate::FeedResult;

/// Loads the static watchlist at start
#[async_trait]
pub trait WatchlistSource: Send + Sync {
    async fn load(&self) -> FeedResult<Vec<WatchlistEntry>>;
}

/// Fixed watchlist
#[derive(Debug, Clone, Default)]
pub struct StaticWatchlist(pub Vec<WatchlistEntry>);

#[async_trait]
impl WatchlistSource for StaticWatchlist {
    async fn load(&self) -> FeedResult<Vec<WatchlistEntry>> {
        Ok(self.0.clone())
    }
}

/// Persisted watchlist with an environment-variable fallback.
///
/// The variable holds `segment:security_id` tokens separated by `;`,
/// newlines or `,`. It is read when the store is unreachable or holds no
/// active entries.
pub struct StoreWatchlist {
    store: Arc<dyn TrackerStore>,
    env_var: String,
}

impl StoreWatchlist {
    pub fn new(store: Arc<dyn TrackerStore>, env_var: impl Into<String>) -> Self {
        Self {
            store,
            env_var: env_var.into(),
        }
    }

    fn from_env(&self) -> Vec<WatchlistEntry> {
        std::env::var(&self.env_var)
            .map(|raw| parse_watchlist(&raw))
            .unwrap_or_default()
    }
}

#[async_trait]
impl WatchlistSource for StoreWatchlist {
    async fn load(&self) -> FeedResult<Vec<WatchlistEntry>> {
        match self.store.active_watchlist().await {
            Ok(entries) if !entries.is_empty() => {
                info!(entries = entries.len(), "Loaded watchlist from store");
                return Ok(entries);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Watchlist store unavailable, using environment"),
        }

        let entries = self.from_env();
        info!(entries = entries.len(), var = %self.env_var, "Loaded watchlist from environment");
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::InstrumentKey;
    use storage::InMemoryTrackerStore;

    #[tokio::test]
    async fn test_store_entries_win() {
        let store = Arc::new(InMemoryTrackerStore::with_watchlist(vec![InstrumentKey::new(
            "IDX_I", "13",
        )]));
        let source = StoreWatchlist::new(store, "TICKCACHE_TEST_WATCHLIST_UNUSED");

        let entries = source.load().await.unwrap();
        assert_eq!(entries, vec![InstrumentKey::new("IDX_I", "13")]);
    }

    #[tokio::test]
    async fn test_env_fallback_when_store_empty() {
        std::env::set_var("TICKCACHE_TEST_WATCHLIST_FALLBACK", "IDX_I:13; NSE_EQ:11536\nbad");
        let source = StoreWatchlist::new(
            Arc::new(InMemoryTrackerStore::new()),
            "TICKCACHE_TEST_WATCHLIST_FALLBACK",
        );

        let entries = source.load().await.unwrap();
        assert_eq!(
            entries,
            vec![InstrumentKey::new("IDX_I", "13"), InstrumentKey::new("NSE_EQ", "11536")]
        );
    }
}
