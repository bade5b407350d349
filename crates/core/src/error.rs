//! Error types for Pointroom Core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Store unreachable: {0}")]
    Unreachable(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl Error {
    /// Store failed or rejected the request
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            Error::Persistence(_) | Error::Unreachable(_) | Error::Database(_)
        )
    }

    /// Failure caused by the transport rather than by the request itself
    pub fn is_network(&self) -> bool {
        matches!(self, Error::Unreachable(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
