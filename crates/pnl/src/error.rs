//! PnL cache error types

use thiserror::Error;

/// Errors that can occur during PnL cache operations
#[derive(Error, Debug)]
pub enum PnlError {
    /// Backing store error
    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    /// Cached hash could not be read back as a record
    #[error("Invalid PnL record for tracker {tracker_id}: {message}")]
    InvalidRecord { tracker_id: String, message: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
