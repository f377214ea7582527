//! Key-value hash store
//!
//! The distributed tick tier and the PnL cache only need flat
//! field/value hashes with per-key expiry, so that is all this
//! abstraction exposes.

mod memory;
mod redis;
mod traits;
mod ttl;

pub use self::memory::InMemoryKvStore;
pub use self::redis::RedisKvStore;
pub use self::traits::*;
pub use self::ttl::refresh_ttl_if_needed;

use std::sync::Arc;
use tracing::info;

use crate::StorageResult;

/// Create a store from the optional redis section of the config
pub async fn create_kv_store(
    redis_config: Option<&config::RedisConfig>,
) -> StorageResult<Arc<dyn KvStore>> {
    match redis_config {
        Some(redis) => {
            info!("Creating Redis key-value store");
            Ok(Arc::new(RedisKvStore::connect(redis).await?))
        }
        None => {
            info!("Creating in-memory key-value store");
            Ok(Arc::new(InMemoryKvStore::new()))
        }
    }
}
