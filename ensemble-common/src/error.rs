//! Common error types for Ensemble

use thiserror::Error;

/// Common result type for Ensemble operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared across the queue engine and its collaborators
///
/// The first five variants are the domain errors callers are expected to
/// recover from; the remainder wrap infrastructure failures.
#[derive(Error, Debug)]
pub enum Error {
    /// No more (playable) items left in the queue
    #[error("Queue is empty: {0}")]
    QueueEmpty(String),

    /// Media resolution failed (bad uri, item removed, no stream details)
    #[error("Media not found: {0}")]
    MediaNotFound(String),

    /// Requested feature is not supported by any available provider
    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// Command is not valid for the current queue state
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Player (queue) is not registered or not available
    #[error("Player unavailable: {0}")]
    PlayerUnavailable(String),

    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for errors that playback logic recovers from locally
    /// (skip to the next item, end the flow session, ...).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::QueueEmpty(_) | Error::MediaNotFound(_))
    }
}
