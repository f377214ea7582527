use crate::*;
use thiserror::Error;
use url::Url;

pub const VALID_FEED_MODES: &[&str] = &["ticker", "quote", "full"];
pub const VALID_LOG_FORMATS: &[&str] = &["pretty", "json", "compact"];
/// Longest accepted wait for first connectivity
pub const MAX_CONNECT_TIMEOUT_MS: u64 = 120_000;

#[derive(Error, Debug, Clone)]
pub enum ValidationError {
    #[error("Feed URL is invalid: {0}")]
    InvalidFeedUrl(String),

    #[error("Database URL is required when a database section is present")]
    MissingDatabaseUrl,

    #[error("{field} must be a positive integer")]
    InvalidPositiveInteger { field: String },

    #[error("{field} must not exceed {max}")]
    OutOfRange { field: String, max: u64 },

    #[error("Invalid log format: {0}. Must be one of: pretty, json, compact")]
    InvalidLogFormat(String),

    #[error("Environment variable '{var}' is missing or invalid: {message}")]
    InvalidEnvVar { var: String, message: String },
}

#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, field: &str, message: &str) {
        self.warnings.push(ValidationWarning {
            field: field.to_string(),
            message: message.to_string(),
        });
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

pub fn validate_config(config: &MasterConfig) -> ValidationReport {
    let mut report = ValidationReport::new();

    validate_feed(&config.feed, &mut report);
    validate_storage(config, &mut report);
    validate_cache(&config.cache, &config.pnl, &mut report);

    if !VALID_LOG_FORMATS.contains(&config.logging.format.to_lowercase().as_str()) {
        report.add_error(ValidationError::InvalidLogFormat(config.logging.format.clone()));
    }

    report
}

fn validate_feed(feed: &FeedConfig, report: &mut ValidationReport) {
    // Missing credentials are not fatal: the feed simply refuses to start
    if !feed.has_credentials() {
        report.add_warning(
            "feed.client_id/feed.access_token",
            "Feed credentials are absent; the feed will not start",
        );
    }

    for (field, value) in [
        ("feed.client_id", &feed.client_id),
        ("feed.access_token", &feed.access_token),
    ] {
        if has_unresolved_env_vars(value) {
            report.add_error(ValidationError::InvalidEnvVar {
                var: field.to_string(),
                message: format!("unresolved placeholder '{}'", value),
            });
        }
    }

    if let Err(e) = Url::parse(&feed.url) {
        report.add_error(ValidationError::InvalidFeedUrl(format!("{}: {}", feed.url, e)));
    }

    if !VALID_FEED_MODES.contains(&feed.mode.to_lowercase().as_str()) {
        report.add_warning(
            "feed.mode",
            &format!("Unknown mode '{}', falling back to '{}'", feed.mode, DEFAULT_FEED_MODE),
        );
    }

    if feed.connect_timeout_ms == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "feed.connect_timeout_ms".to_string(),
        });
    } else if feed.connect_timeout_ms > MAX_CONNECT_TIMEOUT_MS {
        report.add_error(ValidationError::OutOfRange {
            field: "feed.connect_timeout_ms".to_string(),
            max: MAX_CONNECT_TIMEOUT_MS,
        });
    }

    if feed.stale_after_seconds == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "feed.stale_after_seconds".to_string(),
        });
    }
}

fn validate_storage(config: &MasterConfig, report: &mut ValidationReport) {
    if config.redis.is_none() {
        report.add_warning(
            "redis",
            "No redis section; ticks and PnL are cached in-process only",
        );
    }

    match &config.database {
        Some(db) if db.url.trim().is_empty() => {
            report.add_error(ValidationError::MissingDatabaseUrl)
        }
        Some(db) if has_unresolved_env_vars(&db.url) => {
            report.add_error(ValidationError::InvalidEnvVar {
                var: "database.url".to_string(),
                message: format!("unresolved placeholder '{}'", db.url),
            })
        }
        Some(_) => {}
        None => report.add_warning(
            "database",
            "No database section; watchlist falls back to the environment and PnL is not persisted",
        ),
    }
}

fn validate_cache(cache: &CacheConfig, pnl: &PnlConfig, report: &mut ValidationReport) {
    let positives = [
        ("cache.pnl_ttl_seconds", cache.pnl_ttl_seconds),
        ("cache.prune_max_age_seconds", cache.prune_max_age_seconds),
        ("cache.prune_interval_seconds", cache.prune_interval_seconds),
        ("pnl.purge_interval_seconds", pnl.purge_interval_seconds),
        ("pnl.index_refresh_seconds", pnl.index_refresh_seconds),
    ];

    for (field, value) in positives {
        if value == 0 {
            report.add_error(ValidationError::InvalidPositiveInteger {
                field: field.to_string(),
            });
        }
    }

    if cache.tick_ttl_seconds == Some(0) {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "cache.tick_ttl_seconds".to_string(),
        });
    }

    if pnl.sync_interval_seconds == 0 {
        report.add_warning(
            "pnl.sync_interval_seconds",
            "Zero interval disables write-back throttling",
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> MasterConfig {
        let mut config = generate_default_config();
        config.feed.client_id = "1000".to_string();
        config.feed.access_token = "token".to_string();
        config.database = Some(DatabaseConfig {
            url: "postgres://localhost/ticks".to_string(),
            max_connections: 5,
        });
        config
    }

    #[test]
    fn test_valid_config() {
        let report = validate_config(&valid_config());
        assert!(report.is_valid(), "{:?}", report.errors);
    }

    #[test]
    fn test_missing_credentials_is_warning_only() {
        let mut config = valid_config();
        config.feed.client_id.clear();
        let report = validate_config(&config);
        assert!(report.is_valid());
        assert!(report.warnings.iter().any(|w| w.field.starts_with("feed.client_id")));
    }

    #[test]
    fn test_unknown_mode_is_warning() {
        let mut config = valid_config();
        config.feed.mode = "depth".to_string();
        let report = validate_config(&config);
        assert!(report.is_valid());
        assert!(report.warnings.iter().any(|w| w.field == "feed.mode"));
    }

    #[test]
    fn test_zero_intervals_rejected() {
        let mut config = valid_config();
        config.cache.prune_interval_seconds = 0;
        config.cache.tick_ttl_seconds = Some(0);
        let report = validate_config(&config);
        assert_eq!(report.errors.len(), 2);
    }

    #[test]
    fn test_connect_timeout_upper_bound() {
        let mut config = valid_config();
        config.feed.connect_timeout_ms = u64::MAX;
        let report = validate_config(&config);
        assert!(matches!(
            report.errors.as_slice(),
            [ValidationError::OutOfRange { field, .. }] if field == "feed.connect_timeout_ms"
        ));

        config.feed.connect_timeout_ms = MAX_CONNECT_TIMEOUT_MS;
        assert!(validate_config(&config).is_valid());
    }

    #[test]
    fn test_unresolved_placeholder_rejected() {
        let mut config = valid_config();
        config.feed.access_token = "${NOT_SET_FOR_TICKCACHE}".to_string();
        let report = validate_config(&config);
        assert!(!report.is_valid());
    }
}
