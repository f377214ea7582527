//! In-process latest-tick map

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::distributed::DistributedTickStore;
use crate::tick::{RawTick, TickRecord};

/// Canonical latest tick per instrument.
///
/// Writes merge atomically per key, so readers never see a half-merged
/// record. When a distributed tier is attached every write is mirrored to
/// it; failures there are logged and never surface to the caller.
pub struct TickStore {
    ticks: DashMap<String, TickRecord>,
    distributed: Option<Arc<DistributedTickStore>>,
}

impl TickStore {
    pub fn new(distributed: Option<Arc<DistributedTickStore>>) -> Self {
        Self {
            ticks: DashMap::new(),
            distributed,
        }
    }

    /// Local-only store
    pub fn local() -> Self {
        Self::new(None)
    }

    fn key(segment: &str, security_id: &str) -> String {
        format!("{}:{}", segment.trim(), security_id.trim())
    }

    /// Merge a tick and return the resulting record.
    ///
    /// Returns `None`, leaving state untouched, when the identity is blank.
    /// A tick without a timestamp is stamped with the current time.
    pub async fn put(&self, tick: TickRecord) -> Option<TickRecord> {
        if tick.is_blank() {
            return None;
        }
        let mut tick = tick;
        if tick.timestamp.is_none() {
            tick.timestamp = Some(Utc::now().timestamp());
        }

        let merged = match self.ticks.entry(tick.composite()) {
            Entry::Occupied(mut slot) => {
                slot.get_mut().merge(tick);
                slot.get().clone()
            }
            Entry::Vacant(slot) => slot.insert(tick).clone(),
        };

        if let Some(distributed) = &self.distributed {
            if let Err(e) = distributed.store_tick(&merged).await {
                warn!(
                    segment = %merged.segment,
                    security_id = %merged.security_id,
                    error = %e,
                    "Failed to mirror tick to distributed cache"
                );
            }
        }
        Some(merged)
    }

    /// Normalize and merge a raw payload
    pub async fn put_raw(&self, raw: &RawTick) -> Option<TickRecord> {
        match TickRecord::from_raw(raw) {
            Some(tick) => self.put(tick).await,
            None => None,
        }
    }

    /// Latest tick, preferring the distributed tier.
    ///
    /// A distributed hit replaces the local slot. Falls back to the local
    /// map on a miss or when the distributed tier is unavailable.
    pub async fn fetch(&self, segment: &str, security_id: &str) -> Option<TickRecord> {
        let key = Self::key(segment, security_id);

        if let Some(distributed) = &self.distributed {
            match distributed.fetch_tick(segment, security_id).await {
                Ok(Some(tick)) => {
                    self.ticks.insert(key, tick.clone());
                    return Some(tick);
                }
                Ok(None) => {}
                Err(e) => warn!(segment, security_id, error = %e, "Distributed tick read failed"),
            }
        }

        self.ticks.get(&key).map(|t| t.clone())
    }

    pub async fn ltp(&self, segment: &str, security_id: &str) -> Option<f64> {
        self.fetch(segment, security_id).await.and_then(|t| t.ltp)
    }

    /// Remove from both tiers. Returns whether either tier held the tick.
    pub async fn delete(&self, segment: &str, security_id: &str) -> bool {
        let mut removed = self.ticks.remove(&Self::key(segment, security_id)).is_some();

        if let Some(distributed) = &self.distributed {
            match distributed.clear_tick(segment, security_id).await {
                Ok(existed) => removed |= existed,
                Err(e) => warn!(segment, security_id, error = %e, "Distributed tick delete failed"),
            }
        }
        removed
    }

    /// Snapshot of every known tick keyed by `segment:security_id`.
    ///
    /// Local entries win over distributed ones for the same key.
    pub async fn all(&self) -> HashMap<String, TickRecord> {
        let mut snapshot = HashMap::new();

        if let Some(distributed) = &self.distributed {
            match distributed.fetch_all().await {
                Ok(ticks) => {
                    snapshot.extend(ticks.into_iter().map(|t| (t.composite(), t)));
                }
                Err(e) => warn!(error = %e, "Distributed tick scan failed"),
            }
        }

        for entry in self.ticks.iter() {
            snapshot.insert(entry.key().clone(), entry.value().clone());
        }
        snapshot
    }

    /// Number of locally held ticks
    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    /// Drop all local ticks
    pub fn clear(&self) {
        self.ticks.clear();
    }
}
