//! Position PnL cache with throttled write-back
//!
//! Records live in the key-value store under `pnl:tracker:<id>` with an
//! absolute expiry as a safety net. Each store also pushes the core
//! figures to the relational store of record, at most once per sync
//! interval per tracker. Throttle state is per process and not persisted;
//! the write-back is idempotent, so a restart only costs one extra write.

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use common::{TrackerId, TrackerSnapshot};
use observability::CacheMetrics;
use storage::{refresh_ttl_if_needed, KvStore, PnlWriteback, SyncOutcome, TrackerStore};

use crate::metadata::{MetadataResolver, SymbolMetadataResolver};
use crate::record::{PnlRecord, PnlSample, PositionDetails};
use crate::{PnlError, PnlResult};

/// Namespace prefix of PnL hashes
pub const PNL_KEY_PREFIX: &str = "pnl:tracker:";

/// What happened to a write-back request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritebackOutcome {
    Applied,
    /// Within the sync interval of the previous write
    Throttled,
    /// Tracker is no longer active
    SkippedInactive,
    NotFound,
    /// Nothing cached for the tracker
    NoRecord,
}

impl From<SyncOutcome> for WritebackOutcome {
    fn from(outcome: SyncOutcome) -> Self {
        match outcome {
            SyncOutcome::Applied => Self::Applied,
            SyncOutcome::SkippedInactive => Self::SkippedInactive,
            SyncOutcome::NotFound => Self::NotFound,
        }
    }
}

/// Store settings
#[derive(Debug, Clone)]
pub struct PnlStoreSettings {
    pub ttl: Duration,
    pub sync_interval: Duration,
}

impl PnlStoreSettings {
    pub fn from_config(cache: &config::CacheConfig, pnl: &config::PnlConfig) -> Self {
        Self {
            ttl: cache.pnl_ttl(),
            sync_interval: pnl.sync_interval(),
        }
    }
}

impl Default for PnlStoreSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(6 * 60 * 60),
            sync_interval: Duration::from_secs(30),
        }
    }
}

/// Derived per-position PnL cache
pub struct PositionPnlStore {
    kv: Arc<dyn KvStore>,
    trackers: Arc<dyn TrackerStore>,
    resolver: Arc<dyn MetadataResolver>,
    settings: PnlStoreSettings,
    /// Last relational write per tracker
    last_sync: Mutex<HashMap<TrackerId, Instant>>,
    metrics: CacheMetrics,
}

impl PositionPnlStore {
    pub fn new(kv: Arc<dyn KvStore>, trackers: Arc<dyn TrackerStore>, settings: PnlStoreSettings) -> Self {
        Self {
            kv,
            trackers,
            resolver: Arc::new(SymbolMetadataResolver),
            settings,
            last_sync: Mutex::new(HashMap::new()),
            metrics: CacheMetrics::new("pnl"),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn MetadataResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn key_for(tracker_id: TrackerId) -> String {
        format!("{}{}", PNL_KEY_PREFIX, tracker_id)
    }

    fn id_from_key(key: &str) -> Option<TrackerId> {
        key.strip_prefix(PNL_KEY_PREFIX)?.parse().ok()
    }

    /// Cache a PnL sample and trigger a throttled write-back.
    ///
    /// With a tracker snapshot the derived position fields are stored as
    /// well; without one they are recomputed from the cached entry details.
    /// The hash is rewritten as a whole so it never mixes fields of two
    /// samples. A failed write-back is logged; only the cache write decides
    /// the result.
    pub async fn store_pnl(&self, sample: PnlSample, snapshot: Option<&TrackerSnapshot>) -> PnlResult<PnlRecord> {
        let now = Utc::now();
        let details = match snapshot {
            Some(snapshot) => {
                let metadata = self.resolver.resolve(snapshot);
                PositionDetails::derive(&sample, snapshot, metadata, now)
            }
            None => self
                .cached_details(sample.tracker_id)
                .await?
                .map(|cached| cached.rederive(&sample, now))
                .unwrap_or_default(),
        };
        let record = PnlRecord::from_sample(&sample, details, now);

        let key = Self::key_for(record.tracker_id);
        self.kv
            .hset_and_remove(&key, &record.to_fields(), &record.unset_fields())
            .await?;
        refresh_ttl_if_needed(self.kv.as_ref(), &key, self.settings.ttl).await?;

        if let Err(e) = self.sync_pnl_to_database_throttled(&record).await {
            warn!(tracker_id = %record.tracker_id, error = %e, "PnL write-back failed");
        }
        Ok(record)
    }

    async fn cached_details(&self, tracker_id: TrackerId) -> PnlResult<Option<PositionDetails>> {
        match self.fetch_pnl(tracker_id).await {
            Ok(record) => Ok(record.map(|r| r.details)),
            Err(PnlError::InvalidRecord { message, .. }) => {
                warn!(%tracker_id, %message, "Cached PnL unreadable, replacing it");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn fetch_pnl(&self, tracker_id: TrackerId) -> PnlResult<Option<PnlRecord>> {
        let fields = self.kv.hgetall(&Self::key_for(tracker_id)).await?;
        PnlRecord::from_fields(tracker_id, &fields)
    }

    /// Write back unless the tracker was written within the sync interval
    pub async fn sync_pnl_to_database_throttled(&self, record: &PnlRecord) -> PnlResult<WritebackOutcome> {
        let now = Instant::now();
        let previous = {
            let mut last_sync = self.last_sync.lock();
            let previous = last_sync.get(&record.tracker_id).copied();
            if previous.is_some_and(|at| now.duration_since(at) < self.settings.sync_interval) {
                self.metrics.pnl_sync_throttled();
                return Ok(WritebackOutcome::Throttled);
            }
            // Claim the slot before the write so concurrent stores do not double-write
            last_sync.insert(record.tracker_id, now);
            previous
        };

        match self.write_back(record).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let mut last_sync = self.last_sync.lock();
                match previous {
                    Some(at) => last_sync.insert(record.tracker_id, at),
                    None => last_sync.remove(&record.tracker_id),
                };
                Err(e)
            }
        }
    }

    /// Write back the cached record immediately, ignoring the throttle.
    ///
    /// Used on position exit.
    pub async fn sync_pnl_to_database_forced(&self, tracker_id: TrackerId) -> PnlResult<WritebackOutcome> {
        let Some(record) = self.fetch_pnl(tracker_id).await? else {
            debug!(%tracker_id, "No cached PnL to sync");
            return Ok(WritebackOutcome::NoRecord);
        };

        let outcome = self.write_back(&record).await?;
        self.last_sync.lock().insert(tracker_id, Instant::now());
        Ok(outcome)
    }

    async fn write_back(&self, record: &PnlRecord) -> PnlResult<WritebackOutcome> {
        let writeback = PnlWriteback {
            last_pnl_rupees: record.pnl,
            last_pnl_pct: record.pnl_pct,
            high_water_mark_pnl: record.high_water_mark_pnl,
            meta: json!({
                "pnl_cache": {
                    "ltp": record.ltp,
                    "hwm_pnl_pct": record.hwm_pnl_pct,
                    "drawdown_rupees": record.details.drawdown_rupees,
                    "drawdown_pct": record.details.drawdown_pct,
                    "synced_at": Utc::now().to_rfc3339(),
                }
            }),
        };

        let outcome = WritebackOutcome::from(self.trackers.apply_pnl(record.tracker_id, &writeback).await?);
        match outcome {
            WritebackOutcome::Applied => self.metrics.pnl_synced(),
            _ => {
                // Exited or unknown trackers are expected after an exit race
                debug!(tracker_id = %record.tracker_id, ?outcome, "PnL write-back skipped");
                self.metrics.pnl_sync_skipped();
            }
        }
        Ok(outcome)
    }

    /// Drop cached entries of trackers that are no longer active
    pub async fn purge_exited(&self) -> PnlResult<usize> {
        let active = self.trackers.active_tracker_ids().await?;
        self.prune_except(&active).await
    }

    /// Drop every cached entry whose tracker id is not in `allowed`
    pub async fn prune_except(&self, allowed: &HashSet<TrackerId>) -> PnlResult<usize> {
        let keys = self.kv.scan_prefix(PNL_KEY_PREFIX).await?;
        let mut pruned = 0;

        for key in keys {
            let Some(tracker_id) = Self::id_from_key(&key) else {
                continue;
            };
            if allowed.contains(&tracker_id) {
                continue;
            }
            if self.kv.del(&key).await? {
                info!(%tracker_id, "Pruned PnL cache entry");
                pruned += 1;
            }
            self.last_sync.lock().remove(&tracker_id);
        }

        if pruned > 0 {
            self.metrics.pruned(pruned);
        }
        Ok(pruned)
    }

    /// Delete every cached entry and reset throttling
    pub async fn clear(&self) -> PnlResult<usize> {
        let keys = self.kv.scan_prefix(PNL_KEY_PREFIX).await?;
        let mut removed = 0;
        for key in keys {
            if self.kv.del(&key).await? {
                removed += 1;
            }
        }
        self.last_sync.lock().clear();
        info!(removed, "Cleared PnL cache");
        Ok(removed)
    }

    pub async fn clear_tracker(&self, tracker_id: TrackerId) -> PnlResult<bool> {
        self.last_sync.lock().remove(&tracker_id);
        Ok(self.kv.del(&Self::key_for(tracker_id)).await?)
    }

    /// Liveness of the backing store
    pub async fn health_check(&self) -> PnlResult<()> {
        self.kv.ping().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use common::InstrumentKey;
    use storage::{InMemoryKvStore, InMemoryTrackerStore, KeyTtl, TrackerStatus};

    fn snapshot(id: i64) -> TrackerSnapshot {
        TrackerSnapshot {
            id: TrackerId(id),
            instrument: InstrumentKey::new("NSE_FNO", "55"),
            entry_price: 100.0,
            quantity: 75,
            symbol: Some("NIFTY 25JAN 22000 CE".into()),
            side: Some("BUY".into()),
            order_no: None,
            paper: false,
            entry_at: None,
        }
    }

    struct Harness {
        kv: Arc<InMemoryKvStore>,
        trackers: Arc<InMemoryTrackerStore>,
        store: PositionPnlStore,
    }

    fn harness() -> Harness {
        let kv = Arc::new(InMemoryKvStore::new());
        let trackers = Arc::new(InMemoryTrackerStore::new());
        for id in [7, 8] {
            trackers.insert(snapshot(id), TrackerStatus::Active);
        }
        let store = PositionPnlStore::new(kv.clone(), trackers.clone(), PnlStoreSettings::default());
        Harness { kv, trackers, store }
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_twice_within_interval_writes_once() {
        let h = harness();

        h.store
            .store_pnl(PnlSample::new(TrackerId(7), 500.0, 101.25, 600.0), None)
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;
        h.store
            .store_pnl(PnlSample::new(TrackerId(7), 500.0, 101.25, 600.0), None)
            .await
            .unwrap();

        assert_eq!(h.trackers.write_count(TrackerId(7)), 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        h.store
            .store_pnl(PnlSample::new(TrackerId(7), 520.0, 101.5, 600.0), None)
            .await
            .unwrap();
        assert_eq!(h.trackers.write_count(TrackerId(7)), 2);
        assert_eq!(h.trackers.last_writeback(TrackerId(7)).unwrap().last_pnl_rupees, 520.0);
    }

    #[tokio::test]
    async fn test_store_sets_ttl_and_derived_fields() {
        let h = harness();
        let record = h
            .store
            .store_pnl(PnlSample::new(TrackerId(7), 450.0, 106.0, 600.0), Some(&snapshot(7)))
            .await
            .unwrap();

        assert_matches!(h.kv.ttl("pnl:tracker:7").await.unwrap(), KeyTtl::Expires(_));
        assert_eq!(record.details.drawdown_rupees, Some(150.0));
        assert_eq!(record.details.index_key.as_deref(), Some("NIFTY"));
        assert_eq!(record.details.direction.as_deref(), Some("bullish"));

        let fetched = h.store.fetch_pnl(TrackerId(7)).await.unwrap().unwrap();
        assert_eq!(fetched, record);
        assert!(h.store.fetch_pnl(TrackerId(99)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_without_snapshot_keeps_record_consistent() {
        let h = harness();
        h.store
            .store_pnl(PnlSample::new(TrackerId(7), 450.0, 106.0, 600.0), Some(&snapshot(7)))
            .await
            .unwrap();

        let record = h
            .store
            .store_pnl(PnlSample::new(TrackerId(7), 600.0, 108.0, 600.0), None)
            .await
            .unwrap();
        assert_eq!(record.details.drawdown_rupees, Some(0.0));
        assert_eq!(record.details.drawdown_pct, Some(0.0));
        assert_eq!(record.details.price_change_pct, Some(8.0));
        assert_eq!(record.details.index_key.as_deref(), Some("NIFTY"));
        assert_eq!(h.store.fetch_pnl(TrackerId(7)).await.unwrap().unwrap(), record);

        // High-water mark no longer positive: the percentage leaves the hash
        let record = h
            .store
            .store_pnl(PnlSample::new(TrackerId(7), -30.0, 99.5, 0.0), None)
            .await
            .unwrap();
        assert_eq!(record.details.drawdown_rupees, Some(30.0));
        assert_eq!(record.details.drawdown_pct, None);
        assert!(!h.kv.hgetall("pnl:tracker:7").await.unwrap().contains_key("drawdown_pct"));
        assert_eq!(h.store.fetch_pnl(TrackerId(7)).await.unwrap().unwrap(), record);
    }

    #[tokio::test]
    async fn test_store_replaces_unreadable_cache_entry() {
        let h = harness();
        h.kv
            .hset_all("pnl:tracker:7", &[("pnl".to_string(), "lots".to_string())])
            .await
            .unwrap();

        let record = h
            .store
            .store_pnl(PnlSample::new(TrackerId(7), 5.0, 100.1, 5.0), None)
            .await
            .unwrap();
        assert_eq!(record.details, PositionDetails::default());
        assert_eq!(h.store.fetch_pnl(TrackerId(7)).await.unwrap().unwrap(), record);
    }

    #[tokio::test]
    async fn test_inactive_tracker_writeback_ignored() {
        let h = harness();
        h.trackers.set_status(TrackerId(8), TrackerStatus::Exited);

        h.store
            .store_pnl(PnlSample::new(TrackerId(8), 10.0, 100.1, 10.0), None)
            .await
            .unwrap();
        let forced = h.store.sync_pnl_to_database_forced(TrackerId(8)).await.unwrap();

        assert_eq!(forced, WritebackOutcome::SkippedInactive);
        assert_eq!(h.trackers.write_count(TrackerId(8)), 0);
        assert_eq!(
            h.store.sync_pnl_to_database_forced(TrackerId(42)).await.unwrap(),
            WritebackOutcome::NoRecord
        );
    }

    #[tokio::test]
    async fn test_forced_sync_bypasses_throttle() {
        let h = harness();
        h.store
            .store_pnl(PnlSample::new(TrackerId(7), 500.0, 101.25, 600.0), None)
            .await
            .unwrap();

        let outcome = h.store.sync_pnl_to_database_forced(TrackerId(7)).await.unwrap();
        assert_eq!(outcome, WritebackOutcome::Applied);
        assert_eq!(h.trackers.write_count(TrackerId(7)), 2);
    }

    #[tokio::test]
    async fn test_purge_exited() {
        let h = harness();
        for id in [7, 8, 9] {
            h.store
                .store_pnl(PnlSample::new(TrackerId(id), 1.0, 100.0, 1.0), None)
                .await
                .unwrap();
        }
        h.trackers.set_status(TrackerId(8), TrackerStatus::Exited);

        assert_eq!(h.store.purge_exited().await.unwrap(), 2);
        assert!(h.store.fetch_pnl(TrackerId(7)).await.unwrap().is_some());
        assert!(h.store.fetch_pnl(TrackerId(8)).await.unwrap().is_none());
        assert!(h.store.fetch_pnl(TrackerId(9)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_prune_except_keeps_allowed_ids() {
        let h = harness();
        for id in [7, 8, 9] {
            h.store
                .store_pnl(PnlSample::new(TrackerId(id), 1.0, 100.0, 1.0), None)
                .await
                .unwrap();
        }
        h.kv
            .hset_all("pnl:tracker:not-a-number", &[("pnl".to_string(), "1".to_string())])
            .await
            .unwrap();

        let allowed = HashSet::from([TrackerId(8)]);
        assert_eq!(h.store.prune_except(&allowed).await.unwrap(), 2);

        assert!(h.store.fetch_pnl(TrackerId(7)).await.unwrap().is_none());
        assert!(h.store.fetch_pnl(TrackerId(8)).await.unwrap().is_some());
        assert!(h.store.fetch_pnl(TrackerId(9)).await.unwrap().is_none());
        // Keys that are not tracker ids are left alone
        assert!(!h.kv.hgetall("pnl:tracker:not-a-number").await.unwrap().is_empty());
        assert_eq!(h.store.prune_except(&HashSet::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_clear_and_health() {
        let h = harness();
        h.store
            .store_pnl(PnlSample::new(TrackerId(7), 1.0, 100.0, 1.0), None)
            .await
            .unwrap();
        h.store
            .store_pnl(PnlSample::new(TrackerId(8), 1.0, 100.0, 1.0), None)
            .await
            .unwrap();

        assert!(h.store.clear_tracker(TrackerId(7)).await.unwrap());
        assert_eq!(h.store.clear().await.unwrap(), 1);
        h.store.health_check().await.unwrap();
    }
}
