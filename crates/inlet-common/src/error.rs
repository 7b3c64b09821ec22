//! Error types for Inlet

use thiserror::Error;

/// Main error type for Inlet
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    /// Blob store read, write or delete failure
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint rejected the write
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for Inlet
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// HTTP status an API caller should see for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::NotFound(_) => 404,
            Error::Conflict(_) => 409,
            Error::Config(_)
            | Error::Database(_)
            | Error::Storage(_)
            | Error::Internal(_)
            | Error::Other(_) => 500,
        }
    }

    /// Whether this error came from a uniqueness violation
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}
