//! Background tasks run by `tickd start`
//!
//! Every task runs until its token is cancelled and degrades on errors by
//! logging and waiting for the next round.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use common::{InstrumentKey, TrackerId};
use market_data::{
    ActivePositionIndex, DistributedTickStore, FeedError, FeedState, FeedSubscriptionManager, PnlUpdate,
    TrackerIndex,
};
use pnl::{compute_sample, PositionPnlStore};
use storage::TrackerStore;

const MAX_RECONNECT_BACKOFF: Duration = Duration::from_secs(60);

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Reload open positions and keep their instruments subscribed
pub async fn run_position_refresh(
    trackers: Arc<dyn TrackerStore>,
    index: Arc<TrackerIndex>,
    manager: FeedSubscriptionManager,
    period: Duration,
    token: CancellationToken,
) {
    let mut ticker = ticker(period);
    let mut previous: HashSet<InstrumentKey> = HashSet::new();

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match index.refresh(trackers.as_ref()).await {
            Ok(positions) => debug!(positions, "Open positions reloaded"),
            Err(e) => {
                warn!(error = %e, "Position refresh failed, keeping previous index");
                continue;
            }
        }
        if !manager.is_running() {
            continue;
        }

        let current: HashSet<InstrumentKey> = index
            .active_instruments()
            .into_iter()
            .filter(InstrumentKey::is_derivative)
            .collect();

        for key in &current {
            if manager.is_subscribed(&key.segment, &key.security_id) {
                continue;
            }
            let result = manager.subscribe_instrument(&key.segment, &key.security_id).await;
            match result.error {
                Some(error) => warn!(instrument = %key, %error, "Position instrument subscribe failed"),
                None => info!(instrument = %key, "Subscribed position instrument"),
            }
        }
        for key in previous.difference(&current) {
            let result = manager.unsubscribe_instrument(&key.segment, &key.security_id).await;
            if let Some(error) = result.error {
                warn!(instrument = %key, %error, "Position instrument unsubscribe failed");
            }
        }
        previous = current;
    }
    debug!("Position refresh stopped");
}

/// Periodic sweep of stale distributed tick hashes
pub async fn run_tick_prune(
    distributed: Arc<DistributedTickStore>,
    index: Arc<TrackerIndex>,
    manager: FeedSubscriptionManager,
    max_age: Duration,
    period: Duration,
    token: CancellationToken,
) {
    let mut ticker = ticker(period);
    // First tick fires immediately; give the feed a round to populate
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        prune_ticks(&distributed, index.as_ref(), &manager, max_age).await;
    }
    debug!("Tick prune stopped");
}

async fn prune_ticks(
    distributed: &DistributedTickStore,
    positions: &dyn ActivePositionIndex,
    manager: &FeedSubscriptionManager,
    max_age: Duration,
) {
    let watchlist = manager.watchlist();
    match distributed.prune_stale(max_age, positions, &watchlist).await {
        Ok(0) => debug!("No stale ticks"),
        Ok(pruned) => debug!(pruned, "Tick prune sweep finished"),
        Err(e) => warn!(error = %e, "Tick prune sweep failed"),
    }
}

/// Periodic removal of cached PnL for exited trackers
pub async fn run_pnl_purge(store: Arc<PositionPnlStore>, period: Duration, token: CancellationToken) {
    let mut ticker = ticker(period);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match store.purge_exited().await {
            Ok(0) => {}
            Ok(purged) => info!(purged, "Purged PnL of exited positions"),
            Err(e) => warn!(error = %e, "PnL purge failed"),
        }
    }
    debug!("PnL purge stopped");
}

/// Turns `{tracker_id, ltp}` updates from the feed into cached PnL
pub async fn run_pnl_worker(
    mut updates: mpsc::Receiver<PnlUpdate>,
    index: Arc<TrackerIndex>,
    store: Arc<PositionPnlStore>,
    token: CancellationToken,
) {
    // High-water marks of open positions, seeded from the cache
    let mut marks: HashMap<TrackerId, f64> = HashMap::new();

    loop {
        let update = tokio::select! {
            _ = token.cancelled() => break,
            next = updates.recv() => match next {
                Some(update) => update,
                None => break,
            },
        };

        let Some(snapshot) = index.snapshot(update.tracker_id) else {
            marks.remove(&update.tracker_id);
            continue;
        };

        let previous = match marks.get(&update.tracker_id) {
            Some(mark) => Some(*mark),
            None => match store.fetch_pnl(update.tracker_id).await {
                Ok(record) => record.map(|r| r.high_water_mark_pnl),
                Err(e) => {
                    warn!(tracker_id = %update.tracker_id, error = %e, "Cached PnL unreadable");
                    None
                }
            },
        };

        let sample = compute_sample(&snapshot, update.ltp, previous);
        marks.insert(update.tracker_id, sample.high_water_mark_pnl);
        if let Err(e) = store.store_pnl(sample, Some(&snapshot)).await {
            warn!(tracker_id = %update.tracker_id, error = %e, "PnL store failed");
        }
    }
    debug!("PnL worker stopped");
}

/// Restart the feed when it stops or loses connectivity, with backoff
pub async fn run_feed_supervisor(manager: FeedSubscriptionManager, period: Duration, token: CancellationToken) {
    let mut backoff = period;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = sleep(backoff) => {}
        }

        let state = manager.state();
        if state == FeedState::Starting || (state.is_running() && manager.is_connected()) {
            backoff = period;
            continue;
        }
        if state.is_running() {
            warn!(?state, "Feed connectivity lost, reconnecting");
            manager.stop().await;
        }

        match manager.start().await {
            Ok(()) => backoff = period,
            Err(FeedError::MissingCredentials) => {
                error!("Feed credentials missing, supervisor giving up");
                break;
            }
            Err(e) => {
                backoff = (backoff * 2).min(MAX_RECONNECT_BACKOFF);
                warn!(error = %e, retry_in = ?backoff, "Feed restart failed");
            }
        }
    }
    debug!("Feed supervisor stopped");
}

/// Push the latest cached PnL of every open position to the store of record
pub async fn flush_pnl(index: &TrackerIndex, store: &PositionPnlStore) {
    let mut flushed = 0usize;
    for tracker_id in index.ids() {
        match store.sync_pnl_to_database_forced(tracker_id).await {
            Ok(pnl::WritebackOutcome::Applied) => flushed += 1,
            Ok(_) => {}
            Err(e) => warn!(%tracker_id, error = %e, "Final PnL sync failed"),
        }
    }
    info!(flushed, "PnL flushed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::TrackerSnapshot;
    use pnl::PnlStoreSettings;
    use storage::{InMemoryKvStore, InMemoryTrackerStore, TrackerStatus};

    fn snapshot(id: i64) -> TrackerSnapshot {
        TrackerSnapshot {
            id: TrackerId(id),
            instrument: InstrumentKey::new("NSE_FNO", "55"),
            entry_price: 100.0,
            quantity: 50,
            symbol: Some("NIFTY 25JAN 22000 CE".into()),
            side: Some("BUY".into()),
            order_no: None,
            paper: false,
            entry_at: None,
        }
    }

    fn fixture() -> (Arc<InMemoryTrackerStore>, Arc<TrackerIndex>, Arc<PositionPnlStore>) {
        let trackers = Arc::new(InMemoryTrackerStore::new());
        trackers.insert(snapshot(7), TrackerStatus::Active);
        let index = Arc::new(TrackerIndex::new());
        index.replace(vec![snapshot(7)]);
        let store = Arc::new(PositionPnlStore::new(
            Arc::new(InMemoryKvStore::new()),
            trackers.clone(),
            PnlStoreSettings::default(),
        ));
        (trackers, index, store)
    }

    #[tokio::test]
    async fn test_pnl_worker_tracks_high_water_mark() {
        let (trackers, index, store) = fixture();
        let (tx, rx) = mpsc::channel(8);

        tx.send(PnlUpdate { tracker_id: TrackerId(7), ltp: 110.0 }).await.unwrap();
        tx.send(PnlUpdate { tracker_id: TrackerId(7), ltp: 104.0 }).await.unwrap();
        tx.send(PnlUpdate { tracker_id: TrackerId(99), ltp: 1.0 }).await.unwrap();
        drop(tx);

        run_pnl_worker(rx, index, store.clone(), CancellationToken::new()).await;

        let record = store.fetch_pnl(TrackerId(7)).await.unwrap().unwrap();
        assert_eq!(record.pnl, 200.0);
        assert_eq!(record.high_water_mark_pnl, 500.0);
        assert_eq!(record.details.drawdown_rupees, Some(300.0));
        assert!(store.fetch_pnl(TrackerId(99)).await.unwrap().is_none());
        // Second update falls inside the sync interval
        assert_eq!(trackers.write_count(TrackerId(7)), 1);
    }

    #[tokio::test]
    async fn test_pnl_worker_stops_on_cancel() {
        let (_trackers, index, store) = fixture();
        let (_tx, rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        token.cancel();

        run_pnl_worker(rx, index, store, token).await;
    }

    #[tokio::test]
    async fn test_flush_forces_writeback() {
        let (trackers, index, store) = fixture();
        store
            .store_pnl(compute_sample(&snapshot(7), 110.0, None), None)
            .await
            .unwrap();

        flush_pnl(&index, &store).await;

        assert_eq!(trackers.write_count(TrackerId(7)), 2);
        assert_eq!(trackers.last_writeback(TrackerId(7)).unwrap().last_pnl_rupees, 500.0);
    }
}
