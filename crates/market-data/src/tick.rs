//! Canonical tick record
//!
//! Upstream payloads are loosely typed: ids arrive as numbers or strings,
//! keys arrive in camelCase or upper case, prices arrive as numbers or
//! numeric strings. Everything is normalized here, at the ingestion
//! boundary, before any merge logic runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::collections::{BTreeMap, HashMap};

use common::InstrumentKey;

/// Raw tick payload as delivered by the feed client
pub type RawTick = serde_json::Map<String, Value>;

const SEGMENT: &str = "segment";
const SECURITY_ID: &str = "security_id";
const LTP: &str = "ltp";
const PREV_CLOSE: &str = "prev_close";
const OI: &str = "oi";
const OI_PREV: &str = "oi_prev";
const TIMESTAMP: &str = "timestamp";

/// Latest known state of one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickRecord {
    pub segment: String,
    pub security_id: String,
    /// Last traded price
    pub ltp: Option<f64>,
    pub prev_close: Option<f64>,
    pub oi: Option<f64>,
    pub oi_prev: Option<f64>,
    /// Unix seconds of the last update
    pub timestamp: Option<i64>,
    /// Passthrough fields, never null
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

impl TickRecord {
    pub fn new(segment: impl AsRef<str>, security_id: impl AsRef<str>) -> Self {
        let key = InstrumentKey::new(segment, security_id);
        Self {
            segment: key.segment,
            security_id: key.security_id,
            ltp: None,
            prev_close: None,
            oi: None,
            oi_prev: None,
            timestamp: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_ltp(mut self, ltp: f64) -> Self {
        self.ltp = Some(ltp);
        self
    }

    pub fn with_prev_close(mut self, prev_close: f64) -> Self {
        self.prev_close = Some(prev_close);
        self
    }

    pub fn with_timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.timestamp = Some(at.timestamp());
        self
    }

    /// Normalize a raw payload. Returns `None` without a usable identity.
    pub fn from_raw(raw: &RawTick) -> Option<Self> {
        let mut segment = None;
        let mut security_id = None;
        let mut record = Self::new("", "");

        for (key, value) in raw {
            if value.is_null() {
                continue;
            }
            let key = normalize_key(key);
            match key.as_str() {
                SEGMENT | "exchange_segment" => segment = value_as_string(value),
                SECURITY_ID => security_id = value_as_string(value),
                LTP | "last_price" => record.ltp = value_as_f64(value),
                PREV_CLOSE | "close" => record.prev_close = value_as_f64(value),
                OI => record.oi = value_as_f64(value),
                OI_PREV => record.oi_prev = value_as_f64(value),
                TIMESTAMP => record.timestamp = value_as_timestamp(value),
                _ => {
                    record.extra.insert(key, value.clone());
                }
            }
        }

        let key = InstrumentKey::try_new(segment?, security_id?).ok()?;
        record.segment = key.segment;
        record.security_id = key.security_id;
        Some(record)
    }

    pub fn instrument(&self) -> InstrumentKey {
        InstrumentKey::new(&self.segment, &self.security_id)
    }

    /// Composite `segment:security_id` key
    pub fn composite(&self) -> String {
        format!("{}:{}", self.segment, self.security_id)
    }

    pub fn is_blank(&self) -> bool {
        self.segment.trim().is_empty() || self.security_id.trim().is_empty()
    }

    /// Carries a price worth caching
    pub fn has_price_signal(&self) -> bool {
        self.ltp.is_some_and(|p| p > 0.0) || self.prev_close.is_some_and(|p| p > 0.0)
    }

    /// Merge a newer update into this record.
    ///
    /// Every present incoming field overwrites, except `ltp`: a stored
    /// positive `ltp` is only replaced by a strictly positive one.
    pub fn merge(&mut self, incoming: TickRecord) {
        let keep_ltp = self.ltp.is_some_and(|p| p > 0.0);
        match incoming.ltp {
            Some(ltp) if ltp > 0.0 => self.ltp = Some(ltp),
            Some(ltp) if !keep_ltp => self.ltp = Some(ltp),
            _ => {}
        }

        if incoming.prev_close.is_some() {
            self.prev_close = incoming.prev_close;
        }
        if incoming.oi.is_some() {
            self.oi = incoming.oi;
        }
        if incoming.oi_prev.is_some() {
            self.oi_prev = incoming.oi_prev;
        }
        if incoming.timestamp.is_some() {
            self.timestamp = incoming.timestamp;
        }
        for (key, value) in incoming.extra {
            if !value.is_null() {
                self.extra.insert(key, value);
            }
        }
    }

    /// Flatten into string fields for a hash store
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            (SEGMENT.to_string(), self.segment.clone()),
            (SECURITY_ID.to_string(), self.security_id.clone()),
        ];

        let numeric = [
            (LTP, self.ltp),
            (PREV_CLOSE, self.prev_close),
            (OI, self.oi),
            (OI_PREV, self.oi_prev),
        ];
        for (name, value) in numeric {
            if let Some(v) = value {
                fields.push((name.to_string(), v.to_string()));
            }
        }
        if let Some(ts) = self.timestamp {
            fields.push((TIMESTAMP.to_string(), ts.to_string()));
        }

        for (key, value) in &self.extra {
            let text = match value {
                Value::Null => continue,
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            fields.push((key.clone(), text));
        }
        fields
    }

    /// Rebuild from a hash read back from the store.
    ///
    /// Numeric-looking strings become floats; everything else stays a string.
    /// `fallback` supplies the identity when the hash lacks it.
    pub fn from_fields(fields: &HashMap<String, String>, fallback: &InstrumentKey) -> Option<Self> {
        if fields.is_empty() {
            return None;
        }

        let segment = fields.get(SEGMENT).map(String::as_str).unwrap_or(&fallback.segment);
        let security_id = fields
            .get(SECURITY_ID)
            .map(String::as_str)
            .unwrap_or(&fallback.security_id);
        let mut record = Self::new(segment, security_id);
        if record.is_blank() {
            return None;
        }

        for (key, text) in fields {
            match key.as_str() {
                SEGMENT | SECURITY_ID => {}
                LTP => record.ltp = parse_number(text),
                PREV_CLOSE => record.prev_close = parse_number(text),
                OI => record.oi = parse_number(text),
                OI_PREV => record.oi_prev = parse_number(text),
                TIMESTAMP => record.timestamp = parse_timestamp(text),
                _ => {
                    let value = parse_number(text)
                        .and_then(Number::from_f64)
                        .map(Value::Number)
                        .unwrap_or_else(|| Value::String(text.clone()));
                    record.extra.insert(key.clone(), value);
                }
            }
        }
        Some(record)
    }
}

/// `securityId` -> `security_id`, `LTP` -> `ltp`
fn normalize_key(key: &str) -> String {
    let key = key.trim();
    if !key.chars().any(|c| c.is_ascii_lowercase()) {
        return key.to_ascii_lowercase().replace(['-', ' '], "_");
    }

    let mut out = String::with_capacity(key.len() + 4);
    for (i, c) in key.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 && !out.ends_with('_') {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else if c == '-' || c == ' ' {
            out.push('_');
        } else {
            out.push(c);
        }
    }
    out
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_number(s),
        _ => None,
    }
}

fn value_as_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_f64().map(epoch_seconds),
        Value::String(s) => parse_timestamp(s),
        _ => None,
    }
}

fn parse_number(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Unix seconds, unix millis or RFC 3339
fn parse_timestamp(text: &str) -> Option<i64> {
    if let Some(n) = parse_number(text) {
        return Some(epoch_seconds(n));
    }
    DateTime::parse_from_rfc3339(text.trim())
        .ok()
        .map(|dt| dt.timestamp())
}

fn epoch_seconds(n: f64) -> i64 {
    if n > 1e12 {
        (n / 1000.0) as i64
    } else {
        n as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> RawTick {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_from_raw_normalizes_keys_and_types() {
        let tick = TickRecord::from_raw(&raw(json!({
            "exchangeSegment": "NSE_FNO",
            "securityId": 55,
            "LTP": "101.25",
            "prevClose": 99,
            "oiPrev": null,
            "volume": 1200
        })))
        .unwrap();

        assert_eq!(tick.segment, "NSE_FNO");
        assert_eq!(tick.security_id, "55");
        assert_eq!(tick.ltp, Some(101.25));
        assert_eq!(tick.prev_close, Some(99.0));
        assert_eq!(tick.oi_prev, None);
        assert_eq!(tick.extra.get("volume"), Some(&json!(1200)));
    }

    #[test]
    fn test_from_raw_requires_identity() {
        assert!(TickRecord::from_raw(&raw(json!({"segment": "NSE_EQ", "ltp": 1.0}))).is_none());
        assert!(TickRecord::from_raw(&raw(json!({"segment": " ", "security_id": "1"}))).is_none());
    }

    #[test]
    fn test_merge_never_erases_positive_ltp() {
        let mut stored = TickRecord::new("NSE_EQ", "11536").with_ltp(101.25);

        for incoming in [Some(0.0), Some(-3.0), None] {
            let mut update = TickRecord::new("NSE_EQ", "11536").with_prev_close(100.5);
            update.ltp = incoming;
            stored.merge(update);
            assert_eq!(stored.ltp, Some(101.25));
        }

        stored.merge(TickRecord::new("NSE_EQ", "11536").with_ltp(102.0));
        assert_eq!(stored.ltp, Some(102.0));
        assert_eq!(stored.prev_close, Some(100.5));
    }

    #[test]
    fn test_merge_takes_zero_ltp_when_nothing_positive_stored() {
        let mut stored = TickRecord::new("NSE_EQ", "1");
        stored.merge(TickRecord::new("NSE_EQ", "1").with_ltp(0.0));
        assert_eq!(stored.ltp, Some(0.0));
    }

    #[test]
    fn test_fields_read_back_as_numbers_or_strings() {
        let mut tick = TickRecord::new("NSE_EQ", "11536").with_ltp(101.25);
        tick.timestamp = Some(1_700_000_000);
        tick.extra.insert("symbol".into(), json!("RELIANCE"));
        tick.extra.insert("volume".into(), json!(1200));

        let fields: HashMap<String, String> = tick.to_fields().into_iter().collect();
        assert_eq!(fields.get("ltp").map(String::as_str), Some("101.25"));

        let back = TickRecord::from_fields(&fields, &tick.instrument()).unwrap();
        assert_eq!(back.ltp, Some(101.25));
        assert_eq!(back.timestamp, Some(1_700_000_000));
        assert_eq!(back.extra.get("symbol"), Some(&json!("RELIANCE")));
        assert_eq!(back.extra.get("volume"), Some(&json!(1200.0)));
    }

    #[test]
    fn test_timestamp_formats() {
        assert_eq!(parse_timestamp("1700000000"), Some(1_700_000_000));
        assert_eq!(parse_timestamp("1700000000000"), Some(1_700_000_000));
        assert_eq!(parse_timestamp("2023-11-14T22:13:20Z"), Some(1_700_000_000));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("securityId"), "security_id");
        assert_eq!(normalize_key("LTP"), "ltp");
        assert_eq!(normalize_key("prev_close"), "prev_close");
        assert_eq!(normalize_key("oi-prev"), "oi_prev");
    }
}
