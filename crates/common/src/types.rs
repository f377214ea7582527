//! Common types used across TickCache
//!
//! This module provides the instrument identity shared by the feed,
//! the tick caches and the PnL cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Segment carrying index values rather than tradable instruments.
pub const INDEX_SEGMENT: &str = "IDX_I";

/// Segments that hold options, futures or currency derivatives.
pub const DERIVATIVE_SEGMENTS: &[&str] = &[
    "NSE_FNO",
    "BSE_FNO",
    "MCX_COMM",
    "NSE_CURRENCY",
    "BSE_CURRENCY",
];

/// Returns true if the segment carries options, futures or currency contracts
pub fn is_derivative_segment(segment: &str) -> bool {
    let segment = segment.trim();
    DERIVATIVE_SEGMENTS
        .iter()
        .any(|s| s.eq_ignore_ascii_case(segment))
}

/// Identity of a tradable instrument on the upstream feed
///
/// Both parts are kept as strings so the composite key is stable
/// regardless of how callers typed the security id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstrumentKey {
    pub segment: String,
    pub security_id: String,
}

impl InstrumentKey {
    /// Create a key, trimming surrounding whitespace
    pub fn new(segment: impl AsRef<str>, security_id: impl AsRef<str>) -> Self {
        Self {
            segment: segment.as_ref().trim().to_string(),
            security_id: security_id.as_ref().trim().to_string(),
        }
    }

    /// Create a key, rejecting blank parts
    pub fn try_new(segment: impl AsRef<str>, security_id: impl AsRef<str>) -> Result<Self> {
        let key = Self::new(segment, security_id);
        if key.is_blank() {
            return Err(Error::BlankInstrument {
                segment: key.segment,
                security_id: key.security_id,
            });
        }
        Ok(key)
    }

    /// Parse a `segment:security_id` token
    pub fn parse(token: &str) -> Option<Self> {
        let (segment, security_id) = token.trim().split_once(':')?;
        Self::try_new(segment, security_id).ok()
    }

    /// True if either part is empty
    pub fn is_blank(&self) -> bool {
        self.segment.is_empty() || self.security_id.is_empty()
    }

    /// Composite `segment:security_id` key
    pub fn composite(&self) -> String {
        format!("{}:{}", self.segment, self.security_id)
    }

    pub fn is_derivative(&self) -> bool {
        is_derivative_segment(&self.segment)
    }

    pub fn is_index(&self) -> bool {
        self.segment.eq_ignore_ascii_case(INDEX_SEGMENT)
    }
}

impl std::fmt::Display for InstrumentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.segment, self.security_id)
    }
}

/// Statically configured, always-subscribed instrument
pub type WatchlistEntry = InstrumentKey;

/// Identifier of an externally tracked position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackerId(pub i64);

impl TrackerId {
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl From<i64> for TrackerId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TrackerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TrackerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<i64>()
            .map(TrackerId)
            .map_err(|_| Error::InvalidTrackerId(s.to_string()))
    }
}

/// Open position reference as seen by the tick path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerRef {
    pub id: TrackerId,
    pub instrument: InstrumentKey,
    pub entry_price: f64,
    pub quantity: i64,
}

/// Entry-time details of an open position, used to derive PnL snapshot fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerSnapshot {
    pub id: TrackerId,
    pub instrument: InstrumentKey,
    pub entry_price: f64,
    pub quantity: i64,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub order_no: Option<String>,
    #[serde(default)]
    pub paper: bool,
    #[serde(default)]
    pub entry_at: Option<DateTime<Utc>>,
}

impl From<&TrackerSnapshot> for TrackerRef {
    fn from(snapshot: &TrackerSnapshot) -> Self {
        Self {
            id: snapshot.id,
            instrument: snapshot.instrument.clone(),
            entry_price: snapshot.entry_price,
            quantity: snapshot.quantity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instrument_key_trims_and_composes() {
        let key = InstrumentKey::new(" NSE_EQ ", "11536 ");
        assert_eq!(key.composite(), "NSE_EQ:11536");
        assert_eq!(key.to_string(), "NSE_EQ:11536");
    }

    #[test]
    fn test_instrument_key_rejects_blank() {
        assert_eq!(
            InstrumentKey::try_new("", "11536"),
            Err(Error::BlankInstrument {
                segment: String::new(),
                security_id: "11536".into(),
            })
        );
        assert!(InstrumentKey::try_new("NSE_EQ", "  ").is_err());
        assert!(InstrumentKey::try_new("NSE_EQ", "1").is_ok());
    }

    #[test]
    fn test_parse_token() {
        assert_eq!(
            InstrumentKey::parse("IDX_I:13"),
            Some(InstrumentKey::new("IDX_I", "13"))
        );
        assert_eq!(InstrumentKey::parse("IDX_I"), None);
        assert_eq!(InstrumentKey::parse(":13"), None);
    }

    #[test]
    fn test_segment_classification() {
        assert!(is_derivative_segment("NSE_FNO"));
        assert!(is_derivative_segment("nse_currency"));
        assert!(!is_derivative_segment("NSE_EQ"));
        assert!(InstrumentKey::new("IDX_I", "25").is_index());
    }

    #[test]
    fn test_tracker_id_parse() {
        assert_eq!("7".parse::<TrackerId>().unwrap(), TrackerId(7));
        assert_eq!(
            "seven".parse::<TrackerId>(),
            Err(Error::InvalidTrackerId("seven".into()))
        );
    }
}
