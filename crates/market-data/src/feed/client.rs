//! Upstream feed client contract

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

use common::InstrumentKey;

use crate::tick::RawTick;
use crate::FeedResult;

/// Depth of data requested from the feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedMode {
    #[default]
    Ticker,
    Quote,
    Full,
}

impl FeedMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "ticker" => Some(Self::Ticker),
            "quote" => Some(Self::Quote),
            "full" => Some(Self::Full),
            _ => None,
        }
    }

    /// Parse, falling back to `Ticker` on unknown input
    pub fn parse_or_default(s: &str) -> Self {
        Self::parse(s).unwrap_or_else(|| {
            warn!(mode = s, "Unknown feed mode, using ticker");
            Self::default()
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ticker => "ticker",
            Self::Quote => "quote",
            Self::Full => "full",
        }
    }
}

impl fmt::Display for FeedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broker credentials for the upstream feed
#[derive(Clone)]
pub struct FeedCredentials {
    pub client_id: String,
    pub access_token: String,
}

impl FeedCredentials {
    /// `None` unless both parts are non-blank
    pub fn from_config(config: &config::FeedConfig) -> Option<Self> {
        config.has_credentials().then(|| Self {
            client_id: config.client_id.trim().to_string(),
            access_token: config.access_token.trim().to_string(),
        })
    }
}

impl fmt::Debug for FeedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedCredentials")
            .field("client_id", &self.client_id)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Handle on an open upstream connection
#[async_trait]
pub trait FeedClient: Send + Sync {
    async fn subscribe_one(&self, key: &InstrumentKey) -> FeedResult<()>;

    async fn unsubscribe_one(&self, key: &InstrumentKey) -> FeedResult<()>;

    async fn subscribe_many(&self, keys: &[InstrumentKey]) -> FeedResult<()>;

    async fn unsubscribe_many(&self, keys: &[InstrumentKey]) -> FeedResult<()>;

    async fn disconnect(&self) -> FeedResult<()>;

    /// Connectivity probe; `None` when the client cannot tell
    fn is_connected(&self) -> Option<bool> {
        None
    }
}

/// An open connection: the client handle plus its tick stream
pub struct FeedConnection {
    pub client: Arc<dyn FeedClient>,
    pub ticks: mpsc::Receiver<RawTick>,
}

/// Opens upstream connections
#[async_trait]
pub trait FeedConnector: Send + Sync {
    async fn connect(&self, mode: FeedMode, credentials: &FeedCredentials) -> FeedResult<FeedConnection>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse() {
        assert_eq!(FeedMode::parse("QUOTE"), Some(FeedMode::Quote));
        assert_eq!(FeedMode::parse("depth"), None);
        assert_eq!(FeedMode::parse_or_default("depth"), FeedMode::Ticker);
    }

    #[test]
    fn test_credentials_require_both_parts() {
        let mut cfg = config::FeedConfig {
            client_id: "100".into(),
            ..Default::default()
        };
        assert!(FeedCredentials::from_config(&cfg).is_none());

        cfg.access_token = "secret".into();
        let creds = FeedCredentials::from_config(&cfg).unwrap();
        assert!(!format!("{:?}", creds).contains("secret"));
    }
}
