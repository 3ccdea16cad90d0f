//! Error types for the name-server scraper
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

/// Result type alias for scraper operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the name-server scraper
#[derive(Error, Debug)]
pub enum Error {
    /// Query backend errors
    #[error("Name server query error: {0}")]
    Query(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The scraper loop is already running
    #[error("Scraper is already running")]
    AlreadyRunning,

    /// HTTP client errors (from backend APIs)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Authentication errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Rate limiting errors
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Zone or record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Backend-specific error
    #[error("Query backend error ({backend}): {message}")]
    Backend {
        /// Backend name
        backend: String,
        /// Error message
        message: String,
    },

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a query error
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a rate limit error
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a backend-specific error
    pub fn backend(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Whether retrying later could succeed
    ///
    /// Used only for log levels; the scraper retries every failure on backoff.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Config(_) | Self::Authentication(_) | Self::AlreadyRunning)
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
