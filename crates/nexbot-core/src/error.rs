//! Error types for the core subsystems.

use thiserror::Error;

/// Errors from the message bus.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    /// The topic's bounded buffer is at capacity; the publish was rejected
    /// without blocking.
    #[error("bus buffer full")]
    BufferFull,

    /// The bus has been stopped; no further publishes are accepted.
    #[error("bus stopped")]
    Stopped,
}

/// Errors from the session store. I/O failures are fatal for the request
/// that hit them and propagate unchanged.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("session record encoding: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors from the worker pool submission path.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    /// The pool has been stopped; the queue no longer accepts tasks.
    #[error("worker pool stopped")]
    Stopped,

    /// The caller's cancellation fired while waiting for queue capacity.
    #[error("submission cancelled")]
    Cancelled,
}
