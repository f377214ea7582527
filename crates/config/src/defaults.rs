pub const DEFAULT_FEED_MODE: &str = "ticker";

pub fn default_feed_mode() -> String {
    DEFAULT_FEED_MODE.to_string()
}

pub fn default_feed_url() -> String {
    "wss://feed.example.invalid/marketfeed".to_string()
}

pub fn default_connect_timeout_ms() -> u64 {
    3000
}

pub fn default_stale_after_seconds() -> u64 {
    30
}

pub fn default_watchlist_env() -> String {
    "FEED_WATCHLIST".to_string()
}

pub fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}

pub fn default_redis_port() -> u16 {
    6379
}

pub fn default_max_connections() -> u32 {
    10
}

pub fn default_pnl_ttl_seconds() -> u64 {
    6 * 60 * 60
}

pub fn default_prune_max_age_seconds() -> u64 {
    3600
}

pub fn default_prune_interval_seconds() -> u64 {
    300
}

pub fn default_index_segment() -> String {
    "IDX_I".to_string()
}

pub fn default_sync_interval_seconds() -> u64 {
    30
}

pub fn default_purge_interval_seconds() -> u64 {
    60
}

pub fn default_index_refresh_seconds() -> u64 {
    15
}

pub fn default_log_format() -> String {
    "pretty".to_string()
}

pub fn default_metrics_port() -> u16 {
    9090
}
