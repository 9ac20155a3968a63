// src/error.rs

//! Unified error handling for the safe browsing client.

use thiserror::Error;

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Transport failure outside of reqwest (e.g. a test transport)
    #[error("network error: {0}")]
    Network(String),

    /// Non-2xx status from the provider, other than 503
    #[error("unexpected server response code: {0}")]
    Upstream(u16),

    /// Provider returned 503; a background retry has been scheduled
    #[error("service temporarily unavailable")]
    TemporarilyUnavailable,

    /// Binary chunk stream could not be decoded
    #[error("malformed chunk: {0}")]
    MalformedChunk(String),

    /// Redirect/directive response could not be parsed
    #[error("malformed redirect list: {0}")]
    MalformedRedirectList(String),

    /// gethash response could not be parsed
    #[error("malformed full hash response: {0}")]
    MalformedFullHashResponse(String),

    /// Persisted chunk journal failed to decode; operator intervention needed
    #[error("journal corrupt: {0}")]
    JournalCorrupt(String),

    /// No successful update for 45 minutes; full-hash confirmation refused
    #[error("unable to check listing, list hasn't been updated for 45 mins")]
    StaleLists,

    /// Caller misuse, e.g. mixed prefix lengths in a single gethash call
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `e:` directive received from the provider
    #[error("error received from server: {0}")]
    Server(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Initial synchronous update failed in online mode
    #[error("initialization failed: {0}")]
    Init(String),
}

impl AppError {
    /// Create a malformed-chunk error.
    pub fn malformed_chunk(message: impl Into<String>) -> Self {
        Self::MalformedChunk(message.into())
    }

    /// Create a malformed-redirect-list error.
    pub fn malformed_redirect(message: impl Into<String>) -> Self {
        Self::MalformedRedirectList(message.into())
    }

    /// Create a malformed-full-hash-response error.
    pub fn malformed_full_hash(message: impl Into<String>) -> Self {
        Self::MalformedFullHashResponse(message.into())
    }

    /// Create a journal-corruption error.
    pub fn journal_corrupt(message: impl Into<String>) -> Self {
        Self::JournalCorrupt(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
