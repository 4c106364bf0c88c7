//! Error types for resload
//!
//! Centralized error handling using thiserror.
//!
//! `LoaderError` covers caller mistakes that are surfaced synchronously.
//! `LoadError` describes a single resource failing mid-flight; it is never
//! returned from the scheduler, only relayed on error/abort/timeout signals.

use thiserror::Error;

/// Errors surfaced synchronously to the caller
#[derive(Debug, Error)]
pub enum LoaderError {
    /// A group or batch was submitted with zero tasks
    #[error("Invalid group: {0}")]
    InvalidGroup(String),

    /// No middleware registered under the given id
    #[error("Middleware not found: {0}")]
    MiddlewareNotFound(String),

    /// Load arguments could not be turned into a request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// HTTP client construction or transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for resload operations
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Failure of a single resource while loading
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    /// The task arguments did not describe a loadable request
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Server answered with a non-success status
    #[error("HTTP status {status} for {url}")]
    Http { url: String, status: u16 },

    /// Connection or transport failure
    #[error("network error: {0}")]
    Network(String),

    /// The request exceeded its timeout
    #[error("timed out after {0}ms")]
    Timeout(u64),

    /// The load was aborted before it finished
    #[error("aborted")]
    Aborted,

    /// The body could not be decoded as the requested response type
    #[error("decode error: {0}")]
    Decode(String),

    /// `start` was called outside a tokio runtime
    #[error("no async runtime available")]
    NoRuntime,
}

impl From<reqwest::Error> for LoadError {
    fn from(err: reqwest::Error) -> Self {
        LoadError::Network(err.to_string())
    }
}
