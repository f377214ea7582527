//! Relational store of record for position trackers and the watchlist

mod memory;
#[cfg(feature = "postgres")]
mod postgres;
mod traits;

pub use memory::InMemoryTrackerStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresTrackerStore;
pub use traits::*;
