//! Feed and tick cache error types

use thiserror::Error;

/// Errors that can occur during feed operations
#[derive(Error, Debug)]
pub enum FeedError {
    /// Operation needs a running feed
    #[error("Feed is not running")]
    NotRunning,

    /// Start is in progress and the connection handle is not ready yet
    #[error("Feed is starting")]
    Starting,

    /// Client id or access token absent
    #[error("Feed credentials are missing")]
    MissingCredentials,

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Subscription error
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// Invalid instrument
    #[error("Invalid instrument: {0}")]
    InvalidInstrument(String),

    /// Listener or sink failure
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        FeedError::Connection(e.to_string())
    }
}
