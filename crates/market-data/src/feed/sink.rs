//! Hand-off of price updates to PnL computation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use common::TrackerId;

use crate::{FeedError, FeedResult};

/// Minimal payload forwarded for each open position on a ticking instrument
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PnlUpdate {
    pub tracker_id: TrackerId,
    pub ltp: f64,
}

/// Receives price updates for open positions
#[async_trait]
pub trait PnlUpdateSink: Send + Sync {
    async fn on_pnl_update(&self, update: PnlUpdate) -> FeedResult<()>;
}

/// Never waits: a full queue drops the update, the next tick supersedes it.
#[async_trait]
impl PnlUpdateSink for mpsc::Sender<PnlUpdate> {
    async fn on_pnl_update(&self, update: PnlUpdate) -> FeedResult<()> {
        self.try_send(update).map_err(|e| match e {
            TrySendError::Full(u) => {
                FeedError::Dispatch(format!("PnL queue full, dropped tracker {}", u.tracker_id))
            }
            TrySendError::Closed(_) => FeedError::Dispatch("PnL queue closed".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let update = PnlUpdate {
            tracker_id: TrackerId(7),
            ltp: 101.25,
        };

        tx.on_pnl_update(update).await.unwrap();
        assert!(tx.on_pnl_update(update).await.is_err());
        assert_eq!(rx.recv().await, Some(update));
    }
}
