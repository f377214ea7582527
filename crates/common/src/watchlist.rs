//! Environment watchlist parsing
//!
//! The fallback watchlist is a list of `segment:security_id` tokens
//! separated by `;`, newlines or `,`.

use tracing::warn;

use crate::types::WatchlistEntry;

/// Parse a delimiter-separated watchlist, skipping malformed tokens
/// and duplicates while preserving order.
pub fn parse_watchlist(raw: &str) -> Vec<WatchlistEntry> {
    let mut entries: Vec<WatchlistEntry> = Vec::new();

    for token in raw.split(|c| c == ';' || c == '\n' || c == ',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }

        match WatchlistEntry::parse(token) {
            Some(entry) if !entries.contains(&entry) => entries.push(entry),
            Some(_) => {}
            None => warn!(token, "Ignoring malformed watchlist token"),
        }
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mixed_delimiters() {
        let entries = parse_watchlist("IDX_I:13;IDX_I:25\nNSE_EQ:11536, NSE_FNO:55");
        let keys: Vec<String> = entries.iter().map(|e| e.composite()).collect();
        assert_eq!(
            keys,
            vec!["IDX_I:13", "IDX_I:25", "NSE_EQ:11536", "NSE_FNO:55"]
        );
    }

    #[test]
    fn test_parse_skips_garbage_and_duplicates() {
        let entries = parse_watchlist(";;IDX_I:13;bogus;IDX_I:13;:7;\n");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].security_id, "13");
    }

    #[test]
    fn test_parse_empty() {
        assert!(parse_watchlist("").is_empty());
        assert!(parse_watchlist("  \n ").is_empty());
    }
}
