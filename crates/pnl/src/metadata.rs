//! Classification metadata for cached positions

use serde::{Deserialize, Serialize};

use common::TrackerSnapshot;

/// Grouping key and market direction of a position
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentMetadata {
    /// Underlying index, e.g. `NIFTY`
    pub index_key: Option<String>,
    /// `bullish` or `bearish`
    pub direction: Option<String>,
}

/// Resolves classification metadata for a position
pub trait MetadataResolver: Send + Sync {
    fn resolve(&self, snapshot: &TrackerSnapshot) -> InstrumentMetadata;
}

/// Longest first so `BANKNIFTY` is not read as `NIFTY`
const INDEX_KEYS: &[&str] = &["MIDCPNIFTY", "BANKNIFTY", "FINNIFTY", "NIFTY", "BANKEX", "SENSEX"];

/// Derives metadata from the trading symbol.
///
/// Calls are bullish and puts bearish when bought; futures follow the
/// side. A sell inverts the direction.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymbolMetadataResolver;

impl SymbolMetadataResolver {
    fn index_key(symbol: &str) -> Option<String> {
        INDEX_KEYS
            .iter()
            .find(|key| symbol.starts_with(*key))
            .map(|key| key.to_string())
    }

    fn direction(symbol: &str, side: Option<&str>) -> Option<String> {
        let short = side.is_some_and(|s| {
            let s = s.trim().to_ascii_uppercase();
            s == "SELL" || s == "SHORT" || s == "S"
        });

        let long_view = if is_option(symbol, &["CE", "CALL"]) {
            true
        } else if is_option(symbol, &["PE", "PUT"]) {
            false
        } else if symbol.contains("FUT") {
            true
        } else {
            return None;
        };

        let bullish = long_view != short;
        Some(if bullish { "bullish" } else { "bearish" }.to_string())
    }
}

/// Option symbols end in a strike followed by the option type
fn is_option(symbol: &str, suffixes: &[&str]) -> bool {
    suffixes.iter().any(|suffix| {
        symbol
            .strip_suffix(suffix)
            .is_some_and(|rest| rest.ends_with(|c: char| c.is_ascii_digit()))
    })
}

impl MetadataResolver for SymbolMetadataResolver {
    fn resolve(&self, snapshot: &TrackerSnapshot) -> InstrumentMetadata {
        let Some(symbol) = snapshot.symbol.as_deref() else {
            return InstrumentMetadata::default();
        };
        let symbol: String = symbol
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-')
            .collect::<String>()
            .to_ascii_uppercase();

        InstrumentMetadata {
            index_key: Self::index_key(&symbol),
            direction: Self::direction(&symbol, snapshot.side.as_deref()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{InstrumentKey, TrackerId};

    fn snapshot(symbol: &str, side: &str) -> TrackerSnapshot {
        TrackerSnapshot {
            id: TrackerId(1),
            instrument: InstrumentKey::new("NSE_FNO", "1"),
            entry_price: 1.0,
            quantity: 1,
            symbol: Some(symbol.to_string()),
            side: Some(side.to_string()),
            order_no: None,
            paper: false,
            entry_at: None,
        }
    }

    #[test]
    fn test_index_key() {
        let resolver = SymbolMetadataResolver;
        let cases = [
            ("NIFTY 25JAN 22000 CE", "NIFTY"),
            ("BANKNIFTY-Jan2024-48000-PE", "BANKNIFTY"),
            ("FINNIFTY24JAN21000CE", "FINNIFTY"),
            ("MIDCPNIFTY JAN FUT", "MIDCPNIFTY"),
            ("SENSEX 72000 CE", "SENSEX"),
            ("BANKEX 50000 PE", "BANKEX"),
        ];
        for (symbol, key) in cases {
            assert_eq!(resolver.resolve(&snapshot(symbol, "BUY")).index_key.as_deref(), Some(key));
        }
        assert_eq!(resolver.resolve(&snapshot("RELIANCE", "BUY")).index_key, None);
    }

    #[test]
    fn test_direction() {
        let resolver = SymbolMetadataResolver;
        let direction = |symbol, side| resolver.resolve(&snapshot(symbol, side)).direction;

        assert_eq!(direction("NIFTY 22000 CE", "BUY").as_deref(), Some("bullish"));
        assert_eq!(direction("NIFTY 22000 PE", "BUY").as_deref(), Some("bearish"));
        assert_eq!(direction("NIFTY JAN FUT", "BUY").as_deref(), Some("bullish"));
        assert_eq!(direction("NIFTY JAN FUT", "SELL").as_deref(), Some("bearish"));
        assert_eq!(direction("NIFTY 22000 CE", "SELL").as_deref(), Some("bearish"));
        assert_eq!(direction("RELIANCE", "BUY"), None);
    }
}
