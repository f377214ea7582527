//! Common types and utilities for TickCache
//!
//! This crate provides shared types used across the tick ingestion,
//! caching and PnL crates.
//!
//! # Modules
//!
//! - [`error`] - Common error types
//! - [`types`] - Instrument identity, tracker ids and segment classification
//! - [`watchlist`] - Parsing of the environment-declared watchlist

pub mod error;
pub mod types;
pub mod watchlist;

pub use error::{Error, Result};
pub use types::*;
pub use watchlist::parse_watchlist;
