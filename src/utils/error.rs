//! Error types for the ingestion pipeline
//!
//! This module defines the per-stage error types. Each stage recovers from its
//! own errors locally; [`crate::error::Error`] wraps them when they escape a run.

use thiserror::Error;

/// Errors produced by a single request against the listing API
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP transport error (connection refused, reset, DNS)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Rate limit exceeded (429)
    #[error("Rate limit exceeded")]
    RateLimit,

    /// Server error with status code
    #[error("Server error: {0}")]
    ServerError(u16),

    /// Client error other than 404
    #[error("Client error: {0}")]
    ClientError(u16),

    /// Entity no longer exists upstream (404)
    #[error("Entity not found")]
    NotFound,

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Response body could not be decoded
    #[error("Decoding error: {0}")]
    Decode(String),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    /// Transient errors are retried with backoff; everything else is terminal
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::RateLimit | Self::ServerError(_) => true,
            Self::Http(e) => !e.is_decode() && !e.is_builder(),
            Self::ClientError(_) | Self::NotFound | Self::Decode(_) | Self::InvalidUrl(_) => false,
        }
    }

    /// Classify an HTTP status that is not a success
    pub fn from_status(status: u16) -> Self {
        match status {
            404 => Self::NotFound,
            429 => Self::RateLimit,
            500..=599 => Self::ServerError(status),
            _ => Self::ClientError(status),
        }
    }
}

/// Errors raised while planning query partitions
#[derive(Error, Debug)]
pub enum PlanningError {
    /// Count query exhausted its retries
    #[error("Count query for partition {partition} failed after {attempts} attempts: {reason}")]
    CountFailed {
        partition: String,
        attempts: u32,
        reason: String,
    },

    /// Sampling a partition for subdivision keys failed
    #[error("Sampling partition {partition} failed on page {page}: {reason}")]
    SampleFailed {
        partition: String,
        page: u32,
        reason: String,
    },

    /// Every primary partition failed its initial count query
    #[error("All {count} primary partitions failed their count query")]
    AllPartitionsFailed { count: usize },

    /// No primary partitions were supplied
    #[error("No primary partitions given")]
    NoPartitions,
}

/// Errors raised while mapping a raw payload
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MappingError {
    /// Payload has no usable primary key
    #[error("Payload is missing its primary key field")]
    MissingPrimaryKey,

    /// Payload does not match the expected schema
    #[error("Malformed payload: {0}")]
    Malformed(String),
}

/// Errors raised by the record store
#[derive(Error, Debug)]
pub enum StoreError {
    /// Store cannot be reached or opened; fatal for a run
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A write was rejected
    #[error("Write rejected for {id}: {message}")]
    Write { id: String, message: String },

    /// Underlying SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Row could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether this error means the store itself is gone rather than one batch being bad
    ///
    /// A busy or locked database counts: it is only reported after the
    /// connection's busy timeout has run out.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Unavailable(_) => true,
            Self::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy
                    | rusqlite::ErrorCode::DatabaseLocked
                    | rusqlite::ErrorCode::CannotOpen
                    | rusqlite::ErrorCode::NotADatabase
                    | rusqlite::ErrorCode::DatabaseCorrupt
                    | rusqlite::ErrorCode::SystemIoFailure
                    | rusqlite::ErrorCode::DiskFull
                    | rusqlite::ErrorCode::ReadOnly
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(FetchError::from_status(404), FetchError::NotFound));
        assert!(matches!(FetchError::from_status(429), FetchError::RateLimit));
        assert!(matches!(
            FetchError::from_status(503),
            FetchError::ServerError(503)
        ));
        assert!(matches!(
            FetchError::from_status(400),
            FetchError::ClientError(400)
        ));
    }

    #[test]
    fn test_transient_errors() {
        assert!(FetchError::Timeout.is_transient());
        assert!(FetchError::RateLimit.is_transient());
        assert!(FetchError::ServerError(502).is_transient());

        assert!(!FetchError::NotFound.is_transient());
        assert!(!FetchError::ClientError(403).is_transient());
        assert!(!FetchError::Decode("bad json".into()).is_transient());
    }

    #[test]
    fn test_store_unavailable() {
        assert!(StoreError::Unavailable("lock poisoned".into()).is_unavailable());
        assert!(!StoreError::Write {
            id: "a".into(),
            message: "constraint".into()
        }
        .is_unavailable());
    }

    #[test]
    fn test_busy_database_is_unavailable() {
        use rusqlite::ffi;
        let failure = |code| rusqlite::Error::SqliteFailure(ffi::Error::new(code), None);

        let busy = failure(ffi::SQLITE_BUSY);
        let locked = failure(ffi::SQLITE_LOCKED);
        let constraint = failure(ffi::SQLITE_CONSTRAINT);

        assert!(StoreError::Database(busy).is_unavailable());
        assert!(StoreError::Database(locked).is_unavailable());
        assert!(!StoreError::Database(constraint).is_unavailable());
    }
}
