//! Cached PnL record
//!
//! Stored as a flat string hash under `pnl:tracker:<id>`. Core fields are
//! written on every update; snapshot fields only when the caller supplies
//! the tracker's entry details.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use common::{TrackerId, TrackerSnapshot};

use crate::metadata::InstrumentMetadata;
use crate::{PnlError, PnlResult};

/// One PnL observation from the computation side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PnlSample {
    pub tracker_id: TrackerId,
    pub pnl: f64,
    pub ltp: f64,
    pub high_water_mark_pnl: f64,
    pub pnl_pct: Option<f64>,
    pub hwm_pnl_pct: Option<f64>,
    /// Observation time; defaults to now when stored
    pub timestamp: Option<DateTime<Utc>>,
}

impl PnlSample {
    pub fn new(tracker_id: TrackerId, pnl: f64, ltp: f64, high_water_mark_pnl: f64) -> Self {
        Self {
            tracker_id,
            pnl,
            ltp,
            high_water_mark_pnl,
            pnl_pct: None,
            hwm_pnl_pct: None,
            timestamp: None,
        }
    }

    pub fn with_pcts(mut self, pnl_pct: f64, hwm_pnl_pct: f64) -> Self {
        self.pnl_pct = Some(pnl_pct);
        self.hwm_pnl_pct = Some(hwm_pnl_pct);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Every field a cached record may carry
pub const RECORD_FIELDS: &[&str] = &[
    "tracker_id",
    "pnl",
    "pnl_pct",
    "ltp",
    "high_water_mark_pnl",
    "hwm_pnl_pct",
    "timestamp",
    "updated_at",
    "entry_price",
    "quantity",
    "segment",
    "security_id",
    "symbol",
    "side",
    "order_no",
    "paper",
    "entry_timestamp",
    "price_change_pct",
    "capital_deployed",
    "time_in_position_sec",
    "drawdown_rupees",
    "drawdown_pct",
    "index_key",
    "direction",
];

fn price_change_pct(entry: f64, ltp: f64) -> Option<f64> {
    (entry > 0.0).then(|| (ltp - entry) * 100.0 / entry)
}

/// Drawdown from the high-water mark, in currency and percent of the mark
fn drawdown(sample: &PnlSample) -> (f64, Option<f64>) {
    let drawdown = (sample.high_water_mark_pnl - sample.pnl).max(0.0);
    let pct = (sample.high_water_mark_pnl > 0.0).then(|| drawdown * 100.0 / sample.high_water_mark_pnl);
    (drawdown, pct)
}

/// Fields derived from the tracker's entry details
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionDetails {
    pub entry_price: Option<f64>,
    pub quantity: Option<i64>,
    pub segment: Option<String>,
    pub security_id: Option<String>,
    pub symbol: Option<String>,
    pub side: Option<String>,
    pub order_no: Option<String>,
    pub paper: Option<bool>,
    pub entry_timestamp: Option<DateTime<Utc>>,
    pub price_change_pct: Option<f64>,
    pub capital_deployed: Option<f64>,
    pub time_in_position_sec: Option<i64>,
    pub drawdown_rupees: Option<f64>,
    pub drawdown_pct: Option<f64>,
    pub index_key: Option<String>,
    pub direction: Option<String>,
}

impl PositionDetails {
    pub fn derive(
        sample: &PnlSample,
        snapshot: &TrackerSnapshot,
        metadata: InstrumentMetadata,
        now: DateTime<Utc>,
    ) -> Self {
        let entry = snapshot.entry_price;
        let (drawdown, drawdown_pct) = drawdown(sample);

        Self {
            entry_price: Some(entry),
            quantity: Some(snapshot.quantity),
            segment: Some(snapshot.instrument.segment.clone()),
            security_id: Some(snapshot.instrument.security_id.clone()),
            symbol: snapshot.symbol.clone(),
            side: snapshot.side.clone(),
            order_no: snapshot.order_no.clone(),
            paper: Some(snapshot.paper),
            entry_timestamp: snapshot.entry_at,
            price_change_pct: price_change_pct(entry, sample.ltp),
            capital_deployed: Some(entry * snapshot.quantity.unsigned_abs() as f64),
            time_in_position_sec: snapshot.entry_at.map(|at| (now - at).num_seconds().max(0)),
            drawdown_rupees: Some(drawdown),
            drawdown_pct,
            index_key: metadata.index_key,
            direction: metadata.direction,
        }
    }

    /// Recompute the price-dependent fields of previously derived details.
    ///
    /// Details without an entry price carry nothing to recompute from and
    /// come back empty.
    pub fn rederive(&self, sample: &PnlSample, now: DateTime<Utc>) -> Self {
        let Some(entry) = self.entry_price else {
            return Self::default();
        };
        let (drawdown, drawdown_pct) = drawdown(sample);

        Self {
            price_change_pct: price_change_pct(entry, sample.ltp),
            time_in_position_sec: self.entry_timestamp.map(|at| (now - at).num_seconds().max(0)),
            drawdown_rupees: Some(drawdown),
            drawdown_pct,
            ..self.clone()
        }
    }
}

/// Full cached PnL state of one position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PnlRecord {
    pub tracker_id: TrackerId,
    pub pnl: f64,
    pub pnl_pct: Option<f64>,
    pub ltp: f64,
    pub high_water_mark_pnl: f64,
    pub hwm_pnl_pct: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub details: PositionDetails,
}

impl PnlRecord {
    pub fn from_sample(sample: &PnlSample, details: PositionDetails, now: DateTime<Utc>) -> Self {
        Self {
            tracker_id: sample.tracker_id,
            pnl: sample.pnl,
            pnl_pct: sample.pnl_pct,
            ltp: sample.ltp,
            high_water_mark_pnl: sample.high_water_mark_pnl,
            hwm_pnl_pct: sample.hwm_pnl_pct,
            timestamp: sample.timestamp.unwrap_or(now),
            updated_at: now,
            details,
        }
    }

    /// Flatten into string fields, omitting absent values
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = FieldWriter::default();
        fields.put("tracker_id", Some(self.tracker_id));
        fields.put("pnl", Some(self.pnl));
        fields.put("pnl_pct", self.pnl_pct);
        fields.put("ltp", Some(self.ltp));
        fields.put("high_water_mark_pnl", Some(self.high_water_mark_pnl));
        fields.put("hwm_pnl_pct", self.hwm_pnl_pct);
        fields.put("timestamp", Some(self.timestamp.to_rfc3339()));
        fields.put("updated_at", Some(self.updated_at.to_rfc3339()));

        let d = &self.details;
        fields.put("entry_price", d.entry_price);
        fields.put("quantity", d.quantity);
        fields.put("segment", d.segment.as_ref());
        fields.put("security_id", d.security_id.as_ref());
        fields.put("symbol", d.symbol.as_ref());
        fields.put("side", d.side.as_ref());
        fields.put("order_no", d.order_no.as_ref());
        fields.put("paper", d.paper);
        fields.put("entry_timestamp", d.entry_timestamp.map(|t| t.to_rfc3339()));
        fields.put("price_change_pct", d.price_change_pct);
        fields.put("capital_deployed", d.capital_deployed);
        fields.put("time_in_position_sec", d.time_in_position_sec);
        fields.put("drawdown_rupees", d.drawdown_rupees);
        fields.put("drawdown_pct", d.drawdown_pct);
        fields.put("index_key", d.index_key.as_ref());
        fields.put("direction", d.direction.as_ref());
        fields.0
    }

    /// Known fields this record leaves unset
    pub fn unset_fields(&self) -> Vec<String> {
        let set: HashSet<String> = self.to_fields().into_iter().map(|(name, _)| name).collect();
        RECORD_FIELDS
            .iter()
            .filter(|name| !set.contains(**name))
            .map(|name| name.to_string())
            .collect()
    }

    /// Rebuild from a cached hash. `None` when the hash is empty.
    pub fn from_fields(tracker_id: TrackerId, fields: &HashMap<String, String>) -> PnlResult<Option<Self>> {
        if fields.is_empty() {
            return Ok(None);
        }
        let reader = FieldReader { tracker_id, fields };

        let details = PositionDetails {
            entry_price: reader.opt("entry_price")?,
            quantity: reader.opt("quantity")?,
            segment: reader.text("segment"),
            security_id: reader.text("security_id"),
            symbol: reader.text("symbol"),
            side: reader.text("side"),
            order_no: reader.text("order_no"),
            paper: reader.opt("paper")?,
            entry_timestamp: reader.time("entry_timestamp")?,
            price_change_pct: reader.opt("price_change_pct")?,
            capital_deployed: reader.opt("capital_deployed")?,
            time_in_position_sec: reader.opt("time_in_position_sec")?,
            drawdown_rupees: reader.opt("drawdown_rupees")?,
            drawdown_pct: reader.opt("drawdown_pct")?,
            index_key: reader.text("index_key"),
            direction: reader.text("direction"),
        };

        Ok(Some(Self {
            tracker_id,
            pnl: reader.required("pnl")?,
            pnl_pct: reader.opt("pnl_pct")?,
            ltp: reader.required("ltp")?,
            high_water_mark_pnl: reader.required("high_water_mark_pnl")?,
            hwm_pnl_pct: reader.opt("hwm_pnl_pct")?,
            timestamp: reader.required_time("timestamp")?,
            updated_at: reader.required_time("updated_at")?,
            details,
        }))
    }
}

#[derive(Default)]
struct FieldWriter(Vec<(String, String)>);

impl FieldWriter {
    fn put<T: ToString>(&mut self, name: &str, value: Option<T>) {
        if let Some(v) = value {
            self.0.push((name.to_string(), v.to_string()));
        }
    }
}

struct FieldReader<'a> {
    tracker_id: TrackerId,
    fields: &'a HashMap<String, String>,
}

impl FieldReader<'_> {
    fn invalid(&self, name: &str, message: impl std::fmt::Display) -> PnlError {
        PnlError::InvalidRecord {
            tracker_id: self.tracker_id.to_string(),
            message: format!("{}: {}", name, message),
        }
    }

    fn text(&self, name: &str) -> Option<String> {
        self.fields.get(name).filter(|v| !v.is_empty()).cloned()
    }

    fn opt<T: std::str::FromStr>(&self, name: &str) -> PnlResult<Option<T>> {
        match self.fields.get(name).map(|v| v.trim()).filter(|v| !v.is_empty()) {
            Some(v) => v.parse().map(Some).map_err(|_| self.invalid(name, v)),
            None => Ok(None),
        }
    }

    fn required<T: std::str::FromStr>(&self, name: &str) -> PnlResult<T> {
        self.opt(name)?.ok_or_else(|| self.invalid(name, "missing"))
    }

    fn time(&self, name: &str) -> PnlResult<Option<DateTime<Utc>>> {
        match self.fields.get(name).filter(|v| !v.is_empty()) {
            Some(v) => DateTime::parse_from_rfc3339(v)
                .map(|t| Some(t.with_timezone(&Utc)))
                .map_err(|e| self.invalid(name, e)),
            None => Ok(None),
        }
    }

    fn required_time(&self, name: &str) -> PnlResult<DateTime<Utc>> {
        self.time(name)?.ok_or_else(|| self.invalid(name, "missing"))
    }
}
