//! Storage abstractions for TickCache
//!
//! - [`kv`] - flat field/value hash store (Redis or in-memory) backing the
//!   distributed tick tier and the PnL cache
//! - [`tracker`] - relational store of record for position trackers and the
//!   persisted watchlist (Postgres or in-memory)

pub mod error;
pub mod kv;
pub mod tracker;

pub use error::StorageError;
pub use kv::{create_kv_store, refresh_ttl_if_needed, InMemoryKvStore, KeyTtl, KvStore, RedisKvStore};
pub use tracker::{
    InMemoryTrackerStore, PnlWriteback, SyncOutcome, TrackerStatus, TrackerStore,
};

#[cfg(feature = "postgres")]
pub use tracker::PostgresTrackerStore;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;
