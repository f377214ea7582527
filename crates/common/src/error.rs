//! Errors raised by the shared identity types

use thiserror::Error;

/// Rejected identity input
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Segment or security id is blank
    #[error("segment and security_id are required (got '{segment}:{security_id}')")]
    BlankInstrument { segment: String, security_id: String },

    #[error("invalid tracker id: {0}")]
    InvalidTrackerId(String),
}

pub type Result<T> = std::result::Result<T, Error>;
