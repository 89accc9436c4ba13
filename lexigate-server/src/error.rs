//! Error types for the LexiGate server.

use lexigate_core::config::ConfigError;
use thiserror::Error;

/// Fatal bootstrap and serving errors. None of these is produced on the
/// request path.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// A server loop failed while accepting connections.
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),

    /// A background task panicked.
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result type alias for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
