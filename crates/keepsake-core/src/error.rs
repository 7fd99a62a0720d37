//! Error types for keepsake-core

use thiserror::Error;

use crate::remote::RemoteError;

/// Result type alias using keepsake-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in keepsake-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote document store error
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// No user is signed in
    #[error("No signed-in user")]
    NotSignedIn,

    /// Engine has no active session
    #[error("Sync engine is not configured for a user session")]
    NotConfigured,

    /// Engine worker has shut down
    #[error("Sync engine has stopped")]
    EngineStopped,
}
