//! Distributed tick tier
//!
//! Mirrors the in-process tick map into the key-value store under
//! `tick:<segment>:<security_id>`, one flat hash per instrument. Hashes are
//! merged field by field on write; `ltp` keeps a stored positive value over
//! a non-positive incoming one, so concurrent writers commute per field.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use common::{InstrumentKey, WatchlistEntry};
use observability::CacheMetrics;
use storage::{refresh_ttl_if_needed, KvStore, StorageResult};

use crate::feed::ActivePositionIndex;
use crate::tick::TickRecord;

/// Namespace prefix of tick hashes
pub const TICK_KEY_PREFIX: &str = "tick:";

pub struct DistributedTickStore {
    kv: Arc<dyn KvStore>,
    /// Optional expiry on tick hashes; the prune sweep is the primary GC
    ttl: Option<Duration>,
    index_segment: String,
    metrics: CacheMetrics,
}

impl DistributedTickStore {
    pub fn new(kv: Arc<dyn KvStore>, ttl: Option<Duration>, index_segment: impl Into<String>) -> Self {
        Self {
            kv,
            ttl,
            index_segment: index_segment.into(),
            metrics: CacheMetrics::new("ticks"),
        }
    }

    pub fn from_config(kv: Arc<dyn KvStore>, cache: &config::CacheConfig) -> Self {
        Self::new(kv, cache.tick_ttl(), cache.index_segment.clone())
    }

    pub fn key_for(segment: &str, security_id: &str) -> String {
        format!("{}{}:{}", TICK_KEY_PREFIX, segment.trim(), security_id.trim())
    }

    /// `tick:NSE_EQ:11536` -> `NSE_EQ:11536`
    fn instrument_from_key(key: &str) -> Option<InstrumentKey> {
        key.strip_prefix(TICK_KEY_PREFIX).and_then(InstrumentKey::parse)
    }

    /// Read-merge-write the tick hash, then refresh its expiry if one is configured.
    ///
    /// Returns the merged record as stored.
    pub async fn store_tick(&self, tick: &TickRecord) -> StorageResult<TickRecord> {
        let result = self.merge_and_write(tick).await;
        if result.is_err() {
            self.metrics.write_failed();
        }
        result
    }

    async fn merge_and_write(&self, tick: &TickRecord) -> StorageResult<TickRecord> {
        let key = Self::key_for(&tick.segment, &tick.security_id);
        let existing = self.kv.hgetall(&key).await?;

        let merged = match TickRecord::from_fields(&existing, &tick.instrument()) {
            Some(mut stored) => {
                stored.merge(tick.clone());
                stored
            }
            None => tick.clone(),
        };

        self.kv.hset_all(&key, &merged.to_fields()).await?;

        if let Some(ttl) = self.ttl {
            refresh_ttl_if_needed(self.kv.as_ref(), &key, ttl).await?;
        }
        Ok(merged)
    }

    pub async fn fetch_tick(&self, segment: &str, security_id: &str) -> StorageResult<Option<TickRecord>> {
        let fields = self.kv.hgetall(&Self::key_for(segment, security_id)).await?;
        Ok(TickRecord::from_fields(&fields, &InstrumentKey::new(segment, security_id)))
    }

    /// Every tick hash under the namespace
    pub async fn fetch_all(&self) -> StorageResult<Vec<TickRecord>> {
        let keys = self.kv.scan_prefix(TICK_KEY_PREFIX).await?;
        let mut ticks = Vec::with_capacity(keys.len());

        for key in keys {
            let Some(instrument) = Self::instrument_from_key(&key) else {
                debug!(key, "Skipping malformed tick key");
                continue;
            };
            let fields = self.kv.hgetall(&key).await?;
            if let Some(tick) = TickRecord::from_fields(&fields, &instrument) {
                ticks.push(tick);
            }
        }
        Ok(ticks)
    }

    pub async fn clear_tick(&self, segment: &str, security_id: &str) -> StorageResult<bool> {
        self.kv.del(&Self::key_for(segment, security_id)).await
    }

    /// Delete every tick hash. Returns the number removed.
    pub async fn clear(&self) -> StorageResult<usize> {
        let keys = self.kv.scan_prefix(TICK_KEY_PREFIX).await?;
        let mut removed = 0;
        for key in keys {
            if self.kv.del(&key).await? {
                removed += 1;
            }
        }
        info!(removed, "Cleared distributed tick cache");
        Ok(removed)
    }

    /// Delete tick hashes older than `max_age`.
    ///
    /// Never removes the index segment, instruments tracked by `positions`,
    /// or anything in the watchlist. A hash without a timestamp counts as
    /// stale. Returns the number of keys deleted.
    pub async fn prune_stale(
        &self,
        max_age: Duration,
        positions: &dyn ActivePositionIndex,
        watchlist: &[WatchlistEntry],
    ) -> StorageResult<usize> {
        let keys = self.kv.scan_prefix(TICK_KEY_PREFIX).await?;
        let protected = self.protected_set(&keys, positions, watchlist);
        let now = Utc::now().timestamp();
        let max_age_secs = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
        let mut pruned = 0;

        for key in keys {
            let Some(instrument) = Self::instrument_from_key(&key) else {
                continue;
            };
            if instrument.segment == self.index_segment
                || positions.is_tracked(&instrument.segment, &instrument.security_id)
                || protected.contains(&instrument.composite())
            {
                continue;
            }

            match self.is_stale(&key, now, max_age_secs).await {
                Ok(true) => match self.kv.del(&key).await {
                    Ok(_) => pruned += 1,
                    Err(e) => warn!(key, error = %e, "Failed to delete stale tick"),
                },
                Ok(false) => {}
                Err(e) => warn!(key, error = %e, "Failed to read tick during prune"),
            }
        }

        if pruned > 0 {
            info!(pruned, max_age_secs, "Pruned stale ticks");
            self.metrics.pruned(pruned);
        }
        Ok(pruned)
    }

    fn protected_set(
        &self,
        keys: &[String],
        positions: &dyn ActivePositionIndex,
        watchlist: &[WatchlistEntry],
    ) -> HashSet<String> {
        let index_keys = keys
            .iter()
            .filter_map(|k| Self::instrument_from_key(k))
            .filter(|i| i.segment == self.index_segment);

        index_keys
            .chain(watchlist.iter().cloned())
            .chain(positions.active_instruments())
            .map(|i| i.composite())
            .collect()
    }

    async fn is_stale(&self, key: &str, now: i64, max_age_secs: i64) -> StorageResult<bool> {
        let fields = self.kv.hgetall(key).await?;
        let timestamp = fields
            .get("timestamp")
            .and_then(|ts| ts.trim().parse::<f64>().ok())
            .map(|ts| ts as i64);

        Ok(match timestamp {
            Some(ts) => now - ts > max_age_secs,
            None => true,
        })
    }

    /// Liveness of the backing store
    pub async fn ping(&self) -> StorageResult<()> {
        self.kv.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::TrackerIndex;
    use common::{TrackerId, TrackerSnapshot};
    use storage::{InMemoryKvStore, KeyTtl};

    fn store() -> (Arc<InMemoryKvStore>, DistributedTickStore) {
        let kv = Arc::new(InMemoryKvStore::new());
        let store = DistributedTickStore::new(kv.clone(), None, "IDX_I");
        (kv, store)
    }

    fn aged(tick: TickRecord, secs_ago: i64) -> TickRecord {
        let mut tick = tick;
        tick.timestamp = Some(Utc::now().timestamp() - secs_ago);
        tick
    }

    #[tokio::test]
    async fn test_store_merges_fields_and_keeps_positive_ltp() {
        let (_, store) = store();
        store
            .store_tick(&TickRecord::new("NSE_EQ", "11536").with_ltp(101.25).with_prev_close(100.5))
            .await
            .unwrap();
        let merged = store
            .store_tick(&TickRecord::new("NSE_EQ", "11536").with_ltp(0.0))
            .await
            .unwrap();

        assert_eq!(merged.ltp, Some(101.25));
        let fetched = store.fetch_tick("NSE_EQ", "11536").await.unwrap().unwrap();
        assert_eq!(fetched.ltp, Some(101.25));
        assert_eq!(fetched.prev_close, Some(100.5));
    }

    #[tokio::test]
    async fn test_ttl_applied_when_configured() {
        let kv = Arc::new(InMemoryKvStore::new());
        let store = DistributedTickStore::new(kv.clone(), Some(Duration::from_secs(600)), "IDX_I");
        store.store_tick(&TickRecord::new("NSE_EQ", "1").with_ltp(1.0)).await.unwrap();

        assert!(matches!(kv.ttl("tick:NSE_EQ:1").await.unwrap(), KeyTtl::Expires(_)));
    }

    #[tokio::test]
    async fn test_fetch_all_and_clear() {
        let (_, store) = store();
        store.store_tick(&TickRecord::new("NSE_EQ", "1").with_ltp(1.0)).await.unwrap();
        store.store_tick(&TickRecord::new("NSE_FNO", "55").with_ltp(2.0)).await.unwrap();

        let mut all: Vec<String> = store.fetch_all().await.unwrap().iter().map(|t| t.composite()).collect();
        all.sort();
        assert_eq!(all, vec!["NSE_EQ:1", "NSE_FNO:55"]);

        assert!(store.clear_tick("NSE_EQ", "1").await.unwrap());
        assert!(store.fetch_tick("NSE_EQ", "1").await.unwrap().is_none());
        assert_eq!(store.clear().await.unwrap(), 1);
        assert!(store.fetch_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prune_missing_timestamp_except_index_segment() {
        let (_, store) = store();
        let index = TrackerIndex::new();
        store.store_tick(&TickRecord::new("NSE_EQ", "13").with_ltp(1.0)).await.unwrap();
        store.store_tick(&TickRecord::new("IDX_I", "13").with_ltp(1.0)).await.unwrap();

        let pruned = store.prune_stale(Duration::from_secs(60), &index, &[]).await.unwrap();

        assert_eq!(pruned, 1);
        assert!(store.fetch_tick("NSE_EQ", "13").await.unwrap().is_none());
        assert!(store.fetch_tick("IDX_I", "13").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_prune_never_touches_protected_keys() {
        let (_, store) = store();
        let index = TrackerIndex::new();
        index.replace(vec![TrackerSnapshot {
            id: TrackerId(1),
            instrument: InstrumentKey::new("NSE_FNO", "55"),
            entry_price: 100.0,
            quantity: 75,
            symbol: None,
            side: None,
            order_no: None,
            paper: false,
            entry_at: None,
        }]);
        let watchlist = vec![InstrumentKey::new("NSE_EQ", "11536")];

        for tick in [
            TickRecord::new("NSE_FNO", "55"),
            TickRecord::new("NSE_EQ", "11536"),
            TickRecord::new("NSE_EQ", "999"),
        ] {
            store.store_tick(&aged(tick.with_ltp(1.0), 86_400)).await.unwrap();
        }
        store.store_tick(&aged(TickRecord::new("NSE_EQ", "1000").with_ltp(1.0), 5)).await.unwrap();

        let pruned = store
            .prune_stale(Duration::from_secs(60), &index, &watchlist)
            .await
            .unwrap();

        assert_eq!(pruned, 1);
        assert!(store.fetch_tick("NSE_FNO", "55").await.unwrap().is_some());
        assert!(store.fetch_tick("NSE_EQ", "11536").await.unwrap().is_some());
        assert!(store.fetch_tick("NSE_EQ", "999").await.unwrap().is_none());
        assert!(store.fetch_tick("NSE_EQ", "1000").await.unwrap().is_some());
    }
}
