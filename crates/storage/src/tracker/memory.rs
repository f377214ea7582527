//! In-memory tracker store

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use common::{TrackerId, TrackerSnapshot, WatchlistEntry};

use super::traits::{PnlWriteback, SyncOutcome, TrackerStatus, TrackerStore};
use crate::StorageResult;

#[derive(Debug, Clone)]
struct TrackerRow {
    snapshot: TrackerSnapshot,
    status: TrackerStatus,
    last_writeback: Option<PnlWriteback>,
    writes: u64,
}

/// In-memory tracker store
///
/// Used for single-process runs without a database and as the
/// relational fake in tests. Counts applied writes per tracker.
#[derive(Debug, Default)]
pub struct InMemoryTrackerStore {
    trackers: RwLock<HashMap<TrackerId, TrackerRow>>,
    watchlist: RwLock<Vec<WatchlistEntry>>,
}

impl InMemoryTrackerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_watchlist(watchlist: Vec<WatchlistEntry>) -> Self {
        Self {
            trackers: RwLock::new(HashMap::new()),
            watchlist: RwLock::new(watchlist),
        }
    }

    pub fn insert(&self, snapshot: TrackerSnapshot, status: TrackerStatus) {
        self.trackers.write().insert(
            snapshot.id,
            TrackerRow {
                snapshot,
                status,
                last_writeback: None,
                writes: 0,
            },
        );
    }

    pub fn set_status(&self, id: TrackerId, status: TrackerStatus) {
        if let Some(row) = self.trackers.write().get_mut(&id) {
            row.status = status;
        }
    }

    /// Number of write-backs applied to a tracker
    pub fn write_count(&self, id: TrackerId) -> u64 {
        self.trackers.read().get(&id).map(|r| r.writes).unwrap_or(0)
    }

    pub fn last_writeback(&self, id: TrackerId) -> Option<PnlWriteback> {
        self.trackers
            .read()
            .get(&id)
            .and_then(|r| r.last_writeback.clone())
    }
}

#[async_trait]
impl TrackerStore for InMemoryTrackerStore {
    async fn active_trackers(&self) -> StorageResult<Vec<TrackerSnapshot>> {
        let trackers = self.trackers.read();
        let mut active: Vec<TrackerSnapshot> = trackers
            .values()
            .filter(|r| r.status == TrackerStatus::Active)
            .map(|r| r.snapshot.clone())
            .collect();
        active.sort_by_key(|t| t.id);
        Ok(active)
    }

    async fn tracker_status(&self, id: TrackerId) -> StorageResult<Option<TrackerStatus>> {
        Ok(self.trackers.read().get(&id).map(|r| r.status.clone()))
    }

    async fn apply_pnl(&self, id: TrackerId, writeback: &PnlWriteback) -> StorageResult<SyncOutcome> {
        let mut trackers = self.trackers.write();
        let Some(row) = trackers.get_mut(&id) else {
            return Ok(SyncOutcome::NotFound);
        };
        if row.status != TrackerStatus::Active {
            return Ok(SyncOutcome::SkippedInactive);
        }
        row.last_writeback = Some(writeback.clone());
        row.writes += 1;
        Ok(SyncOutcome::Applied)
    }

    async fn active_watchlist(&self) -> StorageResult<Vec<WatchlistEntry>> {
        Ok(self.watchlist.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::InstrumentKey;
    use serde_json::json;

    fn snapshot(id: i64) -> TrackerSnapshot {
        TrackerSnapshot {
            id: TrackerId(id),
            instrument: InstrumentKey::new("NSE_FNO", "55"),
            entry_price: 100.0,
            quantity: 75,
            symbol: None,
            side: None,
            order_no: None,
            paper: true,
            entry_at: None,
        }
    }

    fn writeback() -> PnlWriteback {
        PnlWriteback {
            last_pnl_rupees: 10.0,
            last_pnl_pct: Some(1.0),
            high_water_mark_pnl: 12.0,
            meta: json!({}),
        }
    }

    #[tokio::test]
    async fn test_apply_only_when_active() {
        let store = InMemoryTrackerStore::new();
        store.insert(snapshot(1), TrackerStatus::Active);
        store.insert(snapshot(2), TrackerStatus::Exited);

        assert_eq!(store.apply_pnl(TrackerId(1), &writeback()).await.unwrap(), SyncOutcome::Applied);
        assert_eq!(
            store.apply_pnl(TrackerId(2), &writeback()).await.unwrap(),
            SyncOutcome::SkippedInactive
        );
        assert_eq!(store.apply_pnl(TrackerId(3), &writeback()).await.unwrap(), SyncOutcome::NotFound);
        assert_eq!(store.write_count(TrackerId(1)), 1);
        assert_eq!(store.write_count(TrackerId(2)), 0);
    }

    #[tokio::test]
    async fn test_active_ids() {
        let store = InMemoryTrackerStore::new();
        store.insert(snapshot(1), TrackerStatus::Active);
        store.insert(snapshot(2), TrackerStatus::Active);
        store.set_status(TrackerId(2), TrackerStatus::Exited);

        let ids = store.active_tracker_ids().await.unwrap();
        assert!(ids.contains(&TrackerId(1)));
        assert!(!ids.contains(&TrackerId(2)));
    }
}
