//! Position PnL cache for TickCache
//!
//! # Core Components
//!
//! - [`store`] - `PositionPnlStore`: cached PnL per tracker with throttled
//!   write-back to the relational store of record
//! - [`record`] - cached record layout and derived position fields
//! - [`metadata`] - index grouping key and direction of a position
//! - [`compute`] - PnL and high-water mark at a given price
//!
//! # Key Invariants
//!
//! - At most one relational write per tracker per sync interval, except forced syncs
//! - Write-backs only land on trackers whose status is active
//! - Cached entries carry an absolute expiry refreshed on write

pub mod compute;
pub mod error;
pub mod metadata;
pub mod record;
pub mod store;

pub use compute::compute_sample;
pub use error::PnlError;
pub use metadata::{InstrumentMetadata, MetadataResolver, SymbolMetadataResolver};
pub use record::{PnlRecord, PnlSample, PositionDetails};
pub use store::{PnlStoreSettings, PositionPnlStore, WritebackOutcome, PNL_KEY_PREFIX};

/// Result type for PnL cache operations
pub type PnlResult<T> = std::result::Result<T, PnlError>;
