//! Error types and handling for the pull/push adapters
//!
//! Every failure an endpoint can observe is represented here and forwarded
//! to the push-side consumer through events and write callbacks.

use std::sync::{Mutex, MutexGuard};

/// Main error type for adapter operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// The wrapped pull source reported an error
    #[error("Source error: {0}")]
    Source(String),
    /// The wrapped pull sink reported an error through its completion
    #[error("Sink error: {0}")]
    Sink(String),
    /// Caller-initiated abort carrying a reason
    #[error("Aborted: {0}")]
    Aborted(String),
    /// The endpoint was destroyed before the operation could complete
    #[error("Stream destroyed")]
    Destroyed,
    /// A write or end was issued after the writable side finished
    #[error("Write after end")]
    WriteAfterEnd,
    /// The sink stopped pulling before the written data reached it
    #[error("Sink closed before consuming all writes")]
    SinkClosed,
    /// I/O related errors
    #[error("IO error: {0}")]
    IO(String),
    /// Custom error with message
    #[error("Stream error: {0}")]
    Custom(String),
}

impl StreamError {
    /// Build an abort reason from any displayable message
    pub fn aborted(reason: impl Into<String>) -> Self {
        StreamError::Aborted(reason.into())
    }
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::IO(err.to_string())
    }
}

/// Result type for adapter operations
pub type StreamResult<T> = Result<T, StreamError>;

/// Callback invoked once with the outcome of a write, an end, or a sink
pub type Completion = Box<dyn FnOnce(StreamResult<()>) + Send + 'static>;

/// Lock a mutex, recovering the data if a handler panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
