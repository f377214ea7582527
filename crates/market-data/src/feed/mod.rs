//! Upstream feed subscription management
//!
//! - [`client`] - feed client and connector contracts
//! - [`manager`] - connection lifecycle, subscription registry, tick dispatch
//! - [`ws`] - JSON WebSocket connector
//! - [`positions`] - open-position index consulted on every tick
//! - [`watchlist`] - always-subscribed instrument sources
//! - [`session`] - trading hours gating position resubscription
//! - [`sink`] - hand-off to PnL computation

pub mod client;
pub mod manager;
pub mod positions;
pub mod session;
pub mod sink;
pub mod watchlist;
pub mod ws;

pub use client::{FeedClient, FeedConnection, FeedConnector, FeedCredentials, FeedMode};
pub use manager::{
    FeedDependencies, FeedDiagnostics, FeedHealth, FeedSettings, FeedState, FeedSubscriptionManager,
    SubscriptionResult, TickListener,
};
pub use positions::{ActivePositionIndex, TrackerIndex};
pub use session::{MarketSession, NseSession};
pub use sink::{PnlUpdate, PnlUpdateSink};
pub use watchlist::{StaticWatchlist, StoreWatchlist, WatchlistSource};
pub use ws::{WsFeedClient, WsFeedConnector};
