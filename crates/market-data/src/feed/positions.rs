//! Index of open positions by security id

use dashmap::DashMap;
use std::collections::HashSet;
use tracing::debug;

use common::{InstrumentKey, TrackerId, TrackerRef, TrackerSnapshot};
use storage::{StorageResult, TrackerStore};

/// Lookup of externally tracked open positions
pub trait ActivePositionIndex: Send + Sync {
    /// Open positions on a security id
    fn trackers_for(&self, security_id: &str) -> Vec<TrackerRef>;

    fn is_tracked(&self, segment: &str, security_id: &str) -> bool;

    /// Instruments with at least one open position
    fn active_instruments(&self) -> Vec<InstrumentKey>;
}

/// In-process position index, refreshed from the tracker store
#[derive(Debug, Default)]
pub struct TrackerIndex {
    by_security: DashMap<String, Vec<TrackerSnapshot>>,
}

impl TrackerIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the index contents with the given open positions
    pub fn replace(&self, trackers: Vec<TrackerSnapshot>) {
        let mut grouped: std::collections::HashMap<String, Vec<TrackerSnapshot>> =
            std::collections::HashMap::new();
        for tracker in trackers {
            grouped
                .entry(tracker.instrument.security_id.clone())
                .or_default()
                .push(tracker);
        }

        self.by_security.retain(|security_id, _| grouped.contains_key(security_id));
        for (security_id, trackers) in grouped {
            self.by_security.insert(security_id, trackers);
        }
    }

    /// Reload from the store of record. Returns the number of open positions.
    pub async fn refresh(&self, store: &dyn TrackerStore) -> StorageResult<usize> {
        let trackers = store.active_trackers().await?;
        let count = trackers.len();
        self.replace(trackers);
        debug!(positions = count, "Position index refreshed");
        Ok(count)
    }

    pub fn snapshot(&self, id: TrackerId) -> Option<TrackerSnapshot> {
        self.by_security
            .iter()
            .find_map(|entry| entry.value().iter().find(|t| t.id == id).cloned())
    }

    pub fn ids(&self) -> HashSet<TrackerId> {
        self.by_security
            .iter()
            .flat_map(|entry| entry.value().iter().map(|t| t.id).collect::<Vec<_>>())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_security.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_security.is_empty()
    }
}

impl ActivePositionIndex for TrackerIndex {
    fn trackers_for(&self, security_id: &str) -> Vec<TrackerRef> {
        self.by_security
            .get(security_id.trim())
            .map(|trackers| trackers.iter().map(TrackerRef::from).collect())
            .unwrap_or_default()
    }

    fn is_tracked(&self, segment: &str, security_id: &str) -> bool {
        self.by_security
            .get(security_id.trim())
            .is_some_and(|trackers| trackers.iter().any(|t| t.instrument.segment == segment.trim()))
    }

    fn active_instruments(&self) -> Vec<InstrumentKey> {
        let set: HashSet<InstrumentKey> = self
            .by_security
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .map(|t| t.instrument.clone())
                    .collect::<Vec<_>>()
            })
            .collect();
        let mut instruments: Vec<_> = set.into_iter().collect();
        instruments.sort();
        instruments
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::{InMemoryTrackerStore, TrackerStatus};

    fn snapshot(id: i64, segment: &str, security_id: &str) -> TrackerSnapshot {
        TrackerSnapshot {
            id: TrackerId(id),
            instrument: InstrumentKey::new(segment, security_id),
            entry_price: 100.0,
            quantity: 50,
            symbol: None,
            side: None,
            order_no: None,
            paper: false,
            entry_at: None,
        }
    }

    #[test]
    fn test_lookup() {
        let index = TrackerIndex::new();
        index.replace(vec![
            snapshot(1, "NSE_FNO", "55"),
            snapshot(2, "NSE_FNO", "55"),
            snapshot(3, "NSE_FNO", "77"),
        ]);

        assert_eq!(index.trackers_for("55").len(), 2);
        assert!(index.is_tracked("NSE_FNO", "77"));
        assert!(!index.is_tracked("BSE_FNO", "77"));
        assert_eq!(index.active_instruments().len(), 2);
        assert_eq!(index.len(), 3);
        assert_eq!(index.snapshot(TrackerId(3)).unwrap().instrument.security_id, "77");
    }

    #[test]
    fn test_replace_drops_closed_positions() {
        let index = TrackerIndex::new();
        index.replace(vec![snapshot(1, "NSE_FNO", "55")]);
        index.replace(vec![snapshot(2, "NSE_FNO", "77")]);

        assert!(index.trackers_for("55").is_empty());
        assert_eq!(index.ids(), HashSet::from([TrackerId(2)]));
    }

    #[tokio::test]
    async fn test_refresh_from_store() {
        let store = InMemoryTrackerStore::new();
        store.insert(snapshot(1, "NSE_FNO", "55"), TrackerStatus::Active);
        store.insert(snapshot(2, "NSE_FNO", "56"), TrackerStatus::Exited);

        let index = TrackerIndex::new();
        assert_eq!(index.refresh(&store).await.unwrap(), 1);
        assert!(index.is_tracked("NSE_FNO", "55"));
        assert!(!index.is_tracked("NSE_FNO", "56"));
    }
}
