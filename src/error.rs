//! Error types for the agent supervisor.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Filesystem or process I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The external CLI binary could not be located or started.
    #[error("{0}")]
    Spawn(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Invalid input supplied by a caller.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Tool-related error surfaced from a decoded segment.
    #[error("Tool error: {0}")]
    Tool(String),

    /// Other errors that don't fit a more specific variant.
    #[error("Error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new spawn error. The message is surfaced verbatim to users
    /// per the "CLI not found" contract.
    pub fn spawn(msg: impl Into<String>) -> Self {
        Error::Spawn(msg.into())
    }

    /// Create a new config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new invalid input error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Create a new tool error.
    pub fn tool(msg: impl Into<String>) -> Self {
        Error::Tool(msg.into())
    }

    /// Create a new other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }
}
