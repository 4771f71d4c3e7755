//! Error taxonomy for page operations.
//!
//! The first four variants are what callers branch on and map one-to-one onto
//! HTTP statuses (404/400/403/409). `RealtimeUnavailable` is kept apart so a
//! dead bus never reads as a failed document write.

use thiserror::Error;

use folio_types::{ValidationError, VersionParseError};

/// Errors from access resolution, mutation and ephemeral publishing.
#[derive(Error, Debug)]
pub enum PageError {
    /// The page does not exist (or is archived).
    #[error("page not found")]
    NotFound,

    /// Malformed or missing required fields.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Access resolution failed.
    #[error("forbidden")]
    Forbidden,

    /// The page changed since the caller's `expected` version.
    #[error("version conflict")]
    Conflict,

    /// The realtime bus could not take an ephemeral event.
    #[error("realtime unavailable")]
    RealtimeUnavailable,

    /// Storage failure.
    #[error("storage error: {0}")]
    Storage(String),
}

pub type PageResult<T> = Result<T, PageError>;

impl From<rusqlite::Error> for PageError {
    fn from(e: rusqlite::Error) -> Self {
        PageError::Storage(e.to_string())
    }
}

impl From<ValidationError> for PageError {
    fn from(e: ValidationError) -> Self {
        PageError::InvalidInput(e.to_string())
    }
}

impl From<VersionParseError> for PageError {
    fn from(e: VersionParseError) -> Self {
        PageError::InvalidInput(e.to_string())
    }
}
