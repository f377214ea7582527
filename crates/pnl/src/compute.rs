//! PnL of an open position at a given price

use common::TrackerSnapshot;

use crate::record::PnlSample;

fn is_short(snapshot: &TrackerSnapshot) -> bool {
    snapshot.quantity < 0
        || snapshot.side.as_deref().is_some_and(|s| {
            let s = s.trim().to_ascii_uppercase();
            s == "SELL" || s == "SHORT"
        })
}

/// PnL sample at `ltp`, carrying the high-water mark forward.
///
/// The high-water mark never decreases: it is the larger of
/// `previous_hwm` and the current PnL.
pub fn compute_sample(snapshot: &TrackerSnapshot, ltp: f64, previous_hwm: Option<f64>) -> PnlSample {
    let quantity = snapshot.quantity.unsigned_abs() as f64;
    let per_unit = if is_short(snapshot) {
        snapshot.entry_price - ltp
    } else {
        ltp - snapshot.entry_price
    };
    let pnl = per_unit * quantity;
    let hwm = previous_hwm.map_or(pnl, |prev| prev.max(pnl));

    let mut sample = PnlSample::new(snapshot.id, pnl, ltp, hwm);
    let capital = snapshot.entry_price * quantity;
    if capital > 0.0 {
        sample = sample.with_pcts(pnl * 100.0 / capital, hwm * 100.0 / capital);
    }
    sample
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{InstrumentKey, TrackerId};

    fn snapshot(side: &str) -> TrackerSnapshot {
        TrackerSnapshot {
            id: TrackerId(7),
            instrument: InstrumentKey::new("NSE_FNO", "55"),
            entry_price: 100.0,
            quantity: 50,
            symbol: None,
            side: Some(side.to_string()),
            order_no: None,
            paper: false,
            entry_at: None,
        }
    }

    #[test]
    fn test_long_position() {
        let sample = compute_sample(&snapshot("BUY"), 110.0, None);
        assert_eq!(sample.pnl, 500.0);
        assert_eq!(sample.high_water_mark_pnl, 500.0);
        assert_eq!(sample.pnl_pct, Some(10.0));
    }

    #[test]
    fn test_short_position() {
        let sample = compute_sample(&snapshot("SELL"), 110.0, None);
        assert_eq!(sample.pnl, -500.0);
    }

    #[test]
    fn test_hwm_never_decreases() {
        let sample = compute_sample(&snapshot("BUY"), 104.0, Some(600.0));
        assert_eq!(sample.pnl, 200.0);
        assert_eq!(sample.high_water_mark_pnl, 600.0);
        assert_eq!(sample.hwm_pnl_pct, Some(12.0));
    }
}
