//! TrackerStore trait definition

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use common::{TrackerId, TrackerSnapshot, WatchlistEntry};

use crate::StorageResult;

/// Lifecycle status of a position tracker in the store of record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackerStatus {
    Pending,
    Active,
    Exited,
    Cancelled,
}

impl TrackerStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "exited" => Some(Self::Exited),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Exited => "exited",
            Self::Cancelled => "cancelled",
        }
    }
}

/// PnL fields written back to the tracker row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PnlWriteback {
    pub last_pnl_rupees: f64,
    pub last_pnl_pct: Option<f64>,
    pub high_water_mark_pnl: f64,
    /// Merged into the tracker's metadata blob
    pub meta: serde_json::Value,
}

/// Result of a conditional write-back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Applied,
    /// Tracker exists but is no longer active
    SkippedInactive,
    NotFound,
}

/// TrackerStore trait - the relational store of record for positions
///
/// Implementations can be in-memory or PostgreSQL.
#[async_trait]
pub trait TrackerStore: Send + Sync {
    /// All trackers whose status is active
    async fn active_trackers(&self) -> StorageResult<Vec<TrackerSnapshot>>;

    /// Ids of all active trackers
    async fn active_tracker_ids(&self) -> StorageResult<HashSet<TrackerId>> {
        Ok(self
            .active_trackers()
            .await?
            .into_iter()
            .map(|t| t.id)
            .collect())
    }

    async fn tracker_status(&self, id: TrackerId) -> StorageResult<Option<TrackerStatus>>;

    /// Write PnL fields, but only if the tracker is active
    async fn apply_pnl(&self, id: TrackerId, writeback: &PnlWriteback) -> StorageResult<SyncOutcome>;

    /// Persisted watchlist entries flagged active
    async fn active_watchlist(&self) -> StorageResult<Vec<WatchlistEntry>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse() {
        assert_eq!(TrackerStatus::parse("ACTIVE"), Some(TrackerStatus::Active));
        assert_eq!(TrackerStatus::parse("exited"), Some(TrackerStatus::Exited));
        assert_eq!(TrackerStatus::parse("gone"), None);
        assert_eq!(TrackerStatus::Active.as_str(), "active");
    }
}
