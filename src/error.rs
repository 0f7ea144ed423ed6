//! Error types for the offline-shim library.

use thiserror::Error;

/// Errors that can occur while installing or serving through the cache.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP client error from the network layer.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Network request failed without a client error to carry.
    #[error("Network error for {url}: {message}")]
    Network {
        /// URL that was being fetched.
        url: String,
        /// Failure description.
        message: String,
    },

    /// A batch add received a response that is not ok (2xx).
    #[error("Bad response status {status} for {url}")]
    BadStatus {
        /// URL that was fetched.
        url: String,
        /// Status code returned.
        status: u16,
    },

    /// The same request appears more than once in a batch add.
    #[error("Duplicate request in batch: {url}")]
    DuplicateRequest {
        /// URL of the duplicated request.
        url: String,
    },

    /// A path or URL could not be resolved.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// I/O error from the on-disk store or configuration files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error from the on-disk store.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration could not be parsed or written.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A stored entry could not be decoded.
    #[error("Corrupt cache entry {path}: {message}")]
    Corrupt {
        /// Path of the offending file.
        path: String,
        /// What was wrong with it.
        message: String,
    },

    /// `respond_with` was called more than once for the same fetch event.
    #[error("Fetch event already has a response")]
    AlreadyResponded,

    /// Lifecycle operation attempted in the wrong worker state.
    #[error("Invalid worker state: {0}")]
    InvalidState(String),

    /// Install did not complete.
    #[error("Install failed: {0}")]
    Install(Box<Error>),
}

/// A specialized `Result` type for offline-shim operations.
pub type Result<T> = std::result::Result<T, Error>;
