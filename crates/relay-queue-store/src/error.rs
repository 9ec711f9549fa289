//! Queue store error types.

use thiserror::Error;

/// Queue store error type.
#[derive(Error, Debug)]
pub enum QueueError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The store has been closed; no further reads or writes are accepted
    #[error("Queue store is closed")]
    Closed,

    /// Topic names must be non-empty
    #[error("Invalid topic: {0:?}")]
    InvalidTopic(String),

    /// Another thread panicked while holding the connection
    #[error("Queue store lock poisoned during {0}")]
    LockPoisoned(&'static str),
}

/// Result type alias using QueueError.
pub type QueueResult<T> = Result<T, QueueError>;
