//! Observability infrastructure for TickCache
//!
//! This crate provides:
//! - Structured logging via tracing
//! - Prometheus metrics
//! - Feed and cache metric helpers
//!
//! # Quick Start
//!
//! ```ignore
//! use observability::{init_logging, LogFormat};
//!
//! init_logging("tickd", LogFormat::Pretty)?;
//! observability::metrics::init_metrics(9090)?;
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, init_logging_from_str, LogFormat};
pub use metrics::{init_metrics, CacheMetrics, FeedMetrics};
