//! Prometheus metrics infrastructure
//!
//! Metric handles are resolved once at construction, so recording on the
//! tick path is a single atomic update.

use metrics::{counter, gauge, Counter, Gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Initialize the Prometheus metrics exporter
///
/// Starts an HTTP listener exposing `/metrics` on the given port.
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    tracing::info!(%addr, "Metrics server listening");
    Ok(())
}

/// Upstream feed metrics
///
/// * `feed_ticks_received_total` - every inbound tick
/// * `feed_ticks_dropped_total` - ticks without a usable identity
/// * `feed_ticks_cached_total` - ticks written into the tick store
/// * `feed_resubscriptions_total` - resubscription passes after a gap
/// * `feed_listener_panics_total` - tick listeners that panicked
/// * `feed_subscriptions` - size of the subscription registry
#[derive(Clone)]
pub struct FeedMetrics {
    ticks_received: Counter,
    ticks_dropped: Counter,
    ticks_cached: Counter,
    resubscriptions: Counter,
    listener_panics: Counter,
    subscriptions: Gauge,
}

impl FeedMetrics {
    pub fn new(feed_name: &str) -> Self {
        let name = feed_name.to_string();

        Self {
            ticks_received: counter!("feed_ticks_received_total", "feed" => name.clone()),
            ticks_dropped: counter!("feed_ticks_dropped_total", "feed" => name.clone()),
            ticks_cached: counter!("feed_ticks_cached_total", "feed" => name.clone()),
            resubscriptions: counter!("feed_resubscriptions_total", "feed" => name.clone()),
            listener_panics: counter!("feed_listener_panics_total", "feed" => name.clone()),
            subscriptions: gauge!("feed_subscriptions", "feed" => name),
        }
    }

    pub fn tick_received(&self) {
        self.ticks_received.increment(1);
    }

    pub fn tick_dropped(&self) {
        self.ticks_dropped.increment(1);
    }

    pub fn tick_cached(&self) {
        self.ticks_cached.increment(1);
    }

    pub fn resubscribed(&self) {
        self.resubscriptions.increment(1);
    }

    pub fn listener_panicked(&self) {
        self.listener_panics.increment(1);
    }

    pub fn set_subscriptions(&self, count: usize) {
        self.subscriptions.set(count as f64);
    }
}

/// Distributed cache and write-back metrics
#[derive(Clone)]
pub struct CacheMetrics {
    write_failures: Counter,
    pruned_keys: Counter,
    pnl_synced: Counter,
    pnl_sync_skipped: Counter,
    pnl_sync_throttled: Counter,
}

impl CacheMetrics {
    pub fn new(cache_name: &str) -> Self {
        let name = cache_name.to_string();

        Self {
            write_failures: counter!("cache_write_failures_total", "cache" => name.clone()),
            pruned_keys: counter!("cache_pruned_keys_total", "cache" => name.clone()),
            pnl_synced: counter!("pnl_sync_applied_total", "cache" => name.clone()),
            pnl_sync_skipped: counter!("pnl_sync_skipped_total", "cache" => name.clone()),
            pnl_sync_throttled: counter!("pnl_sync_throttled_total", "cache" => name),
        }
    }

    pub fn write_failed(&self) {
        self.write_failures.increment(1);
    }

    pub fn pruned(&self, count: usize) {
        self.pruned_keys.increment(count as u64);
    }

    pub fn pnl_synced(&self) {
        self.pnl_synced.increment(1);
    }

    pub fn pnl_sync_skipped(&self) {
        self.pnl_sync_skipped.increment(1);
    }

    pub fn pnl_sync_throttled(&self) {
        self.pnl_sync_throttled.increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_without_recorder_are_noops() {
        // No recorder installed: handles are no-ops and must not panic
        let feed = FeedMetrics::new("test");
        feed.tick_received();
        feed.listener_panicked();
        feed.set_subscriptions(3);

        let cache = CacheMetrics::new("test");
        cache.pruned(2);
        cache.pnl_sync_throttled();
    }
}
