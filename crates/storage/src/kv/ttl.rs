//! Expiry refresh policy
//!
//! Under high write volume most writes land on a key whose expiry is still
//! fresh. The expiry is only rewritten once less than half of `max_ttl`
//! remains, or when the key has none.

use std::time::Duration;
use tracing::debug;

use super::traits::{KeyTtl, KvStore};
use crate::StorageResult;

/// Refresh `key`'s expiry if it is missing or below `max_ttl / 2`.
///
/// Returns whether an `EXPIRE` was issued.
pub async fn refresh_ttl_if_needed(
    kv: &dyn KvStore,
    key: &str,
    max_ttl: Duration,
) -> StorageResult<bool> {
    let needs_refresh = match kv.ttl(key).await? {
        KeyTtl::Missing => return Ok(false),
        KeyTtl::Persistent => true,
        KeyTtl::Expires(remaining) => remaining < max_ttl / 2,
    };

    if needs_refresh {
        debug!(key, ttl_secs = max_ttl.as_secs(), "Refreshing key expiry");
        kv.expire(key, max_ttl).await?;
    }

    Ok(needs_refresh)
}
