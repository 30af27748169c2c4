//! Error types for the reply-tracker library.
//!
//! This module provides custom error types using `thiserror` so that callers can tell
//! transient provider conditions (rate limits, missing resources) apart from failures
//! that should be reported.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur while tracking conversations.
#[derive(Error, Debug)]
pub enum TrackerError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Mail provider call failed
    #[error("Mail provider error: {0}")]
    Provider(String),

    /// The provider no longer knows about the requested resource
    #[error("Not found: {0}")]
    NotFound(String),

    /// The provider asked us to back off until `retry_at`
    #[error("Provider rate limit hit, retry at {retry_at}")]
    RateLimited {
        /// Earliest time the provider accepts requests for this account again
        retry_at: DateTime<Utc>,
    },

    /// AI classification failed
    #[error("Classifier error: {0}")]
    Classifier(String),

    /// Follow-up draft generation failed
    #[error("Draft generation error: {0}")]
    DraftGeneration(String),

    /// Rejected input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Blocking task panicked or was cancelled
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// General error with context
    #[error("{0}")]
    Other(String),
}

impl TrackerError {
    /// Retry time when this error is a provider rate limit.
    #[must_use]
    pub const fn retry_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::RateLimited { retry_at } => Some(*retry_at),
            _ => None,
        }
    }

    /// True for conditions that resolve on their own and only warrant a log line.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::NotFound(_))
    }
}

/// Convenience type alias for Result with TrackerError
pub type Result<T> = std::result::Result<T, TrackerError>;

impl From<anyhow::Error> for TrackerError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
