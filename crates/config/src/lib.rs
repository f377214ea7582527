use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod defaults;
pub mod parser;
pub mod substitution;
pub mod validator;

pub use defaults::*;
pub use parser::*;
pub use substitution::*;
pub use validator::*;

/// Root of the YAML configuration file
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MasterConfig {
    pub feed: FeedConfig,
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub pnl: PnlConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Upstream market-data feed settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default = "default_feed_url")]
    pub url: String,
    #[serde(default = "default_feed_mode")]
    pub mode: String,
    #[serde(rename = "connect_timeout_ms")]
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(rename = "stale_after_seconds")]
    #[serde(default = "default_stale_after_seconds")]
    pub stale_after_seconds: u64,
    /// Name of the environment variable holding the fallback watchlist
    #[serde(rename = "watchlist_env")]
    #[serde(default = "default_watchlist_env")]
    pub watchlist_env: String,
}

impl FeedConfig {
    /// Both credentials are present and non-blank
    pub fn has_credentials(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.access_token.trim().is_empty()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_seconds)
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            access_token: String::new(),
            url: default_feed_url(),
            mode: default_feed_mode(),
            connect_timeout_ms: default_connect_timeout_ms(),
            stale_after_seconds: default_stale_after_seconds(),
            watchlist_env: default_watchlist_env(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_host")]
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    #[serde(default)]
    pub password: String,
    #[serde(rename = "db_index")]
    #[serde(default)]
    pub db_index: u8,
}

impl RedisConfig {
    pub fn connection_url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}:{}/{}", self.host, self.port, self.db_index)
        } else {
            format!(
                "redis://:{}@{}:{}/{}",
                self.password, self.host, self.port, self.db_index
            )
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: default_redis_host(),
            port: default_redis_port(),
            password: String::new(),
            db_index: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(rename = "max_connections")]
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// Tick and PnL cache tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Absent means tick hashes carry no expiry and rely on pruning
    #[serde(rename = "tick_ttl_seconds")]
    #[serde(default)]
    pub tick_ttl_seconds: Option<u64>,
    #[serde(rename = "pnl_ttl_seconds")]
    #[serde(default = "default_pnl_ttl_seconds")]
    pub pnl_ttl_seconds: u64,
    #[serde(rename = "prune_max_age_seconds")]
    #[serde(default = "default_prune_max_age_seconds")]
    pub prune_max_age_seconds: u64,
    #[serde(rename = "prune_interval_seconds")]
    #[serde(default = "default_prune_interval_seconds")]
    pub prune_interval_seconds: u64,
    #[serde(rename = "index_segment")]
    #[serde(default = "default_index_segment")]
    pub index_segment: String,
}

impl CacheConfig {
    pub fn tick_ttl(&self) -> Option<Duration> {
        self.tick_ttl_seconds.map(Duration::from_secs)
    }

    pub fn pnl_ttl(&self) -> Duration {
        Duration::from_secs(self.pnl_ttl_seconds)
    }

    pub fn prune_max_age(&self) -> Duration {
        Duration::from_secs(self.prune_max_age_seconds)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            tick_ttl_seconds: None,
            pnl_ttl_seconds: default_pnl_ttl_seconds(),
            prune_max_age_seconds: default_prune_max_age_seconds(),
            prune_interval_seconds: default_prune_interval_seconds(),
            index_segment: default_index_segment(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PnlConfig {
    /// Minimum interval between relational writes per tracker
    #[serde(rename = "sync_interval_seconds")]
    #[serde(default = "default_sync_interval_seconds")]
    pub sync_interval_seconds: u64,
    #[serde(rename = "purge_interval_seconds")]
    #[serde(default = "default_purge_interval_seconds")]
    pub purge_interval_seconds: u64,
    #[serde(rename = "index_refresh_seconds")]
    #[serde(default = "default_index_refresh_seconds")]
    pub index_refresh_seconds: u64,
}

impl PnlConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_seconds)
    }
}

impl Default for PnlConfig {
    fn default() -> Self {
        Self {
            sync_interval_seconds: default_sync_interval_seconds(),
            purge_interval_seconds: default_purge_interval_seconds(),
            index_refresh_seconds: default_index_refresh_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_yaml_fills_defaults() {
        let yaml = r#"
feed:
  client_id: "1000"
  access_token: "secret"
"#;
        let config: MasterConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.feed.has_credentials());
        assert_eq!(config.feed.mode, "ticker");
        assert_eq!(config.feed.stale_after(), Duration::from_secs(30));
        assert_eq!(config.cache.pnl_ttl(), Duration::from_secs(21600));
        assert_eq!(config.cache.tick_ttl(), None);
        assert_eq!(config.pnl.sync_interval(), Duration::from_secs(30));
        assert!(config.redis.is_none());
    }

    #[test]
    fn test_blank_credentials_are_absent() {
        let feed = FeedConfig {
            client_id: "  ".to_string(),
            access_token: "token".to_string(),
            ..FeedConfig::default()
        };
        assert!(!feed.has_credentials());
    }

    #[test]
    fn test_redis_url() {
        let mut redis = RedisConfig::default();
        assert_eq!(redis.connection_url(), "redis://127.0.0.1:6379/0");
        redis.password = "pw".to_string();
        redis.db_index = 2;
        assert_eq!(redis.connection_url(), "redis://:pw@127.0.0.1:6379/2");
    }
}
