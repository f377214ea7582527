//! Market data ingestion for TickCache
//!
//! This crate owns the upstream feed connection and the two-tier tick cache.
//!
//! # Core Components
//!
//! - [`feed`] - Feed subscription lifecycle, reconnection and tick dispatch
//! - [`tick_store`] - In-process latest tick per instrument
//! - [`distributed`] - Key-value mirror of the tick map with a prune sweep
//! - [`tick`] - Canonical tick record and payload normalization
//!
//! # Key Invariants
//!
//! - A stored positive `ltp` is never replaced by a zero, negative or absent one
//! - Watchlist instruments are never unsubscribed by the dynamic path
//! - The prune sweep never removes index, watchlist or open-position ticks
//! - The tick path never waits on the dynamic subscription mutex

pub mod distributed;
pub mod error;
pub mod feed;
pub mod tick;
pub mod tick_store;

pub use distributed::{DistributedTickStore, TICK_KEY_PREFIX};
pub use error::FeedError;
pub use feed::{
    ActivePositionIndex, FeedClient, FeedConnection, FeedConnector, FeedCredentials, FeedDependencies,
    FeedHealth, FeedMode, FeedSettings, FeedState, FeedSubscriptionManager, MarketSession, NseSession,
    PnlUpdate, PnlUpdateSink, StaticWatchlist, StoreWatchlist, SubscriptionResult, TrackerIndex,
    WatchlistSource, WsFeedConnector,
};
pub use tick::{RawTick, TickRecord};
pub use tick_store::TickStore;

/// Result type for feed operations
pub type FeedResult<T> = std::result::Result<T, FeedError>;
