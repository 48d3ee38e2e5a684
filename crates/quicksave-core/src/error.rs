//! Error types for quicksave-core

use thiserror::Error;

/// Result type alias using quicksave-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in quicksave-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Row not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote save-server error
    #[error("Remote error: {0}")]
    Remote(#[from] crate::remote::RemoteError),
}
