//! Error types for the dwin core library.
//!
//! Uses hierarchical domain-specific errors following the thiserror pattern.

use thiserror::Error;

/// Result type alias for dwin operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for dwin.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Window-related error
    #[error("Window error: {0}")]
    Window(#[from] WindowError),

    /// Dispatcher-related error
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Window-specific errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WindowError {
    /// The window was closed and accepts no more events
    #[error("Window is closed")]
    Closed,

    /// The queue hard capacity (size + 1) was exceeded
    #[error("Queue full: capacity {capacity}")]
    QueueFull { capacity: usize },

    /// Construction happened outside a tokio runtime
    #[error("Window must be created inside a tokio runtime")]
    NoRuntime,
}

/// Dispatcher-specific errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Every worker is busy and the pool does not block
    #[error("Worker pool saturated: {pool_size} workers busy")]
    Saturated { pool_size: usize },

    /// The pool was released
    #[error("Worker pool released")]
    Closed,
}

// Conversion implementations for external error types

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
