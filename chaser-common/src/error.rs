//! Common error types for Chaser

use thiserror::Error;

/// Common result type for Chaser operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the Chaser services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// External collaborator (ERP, PDF, mail) failure
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error is worth retrying with backoff.
    ///
    /// Only upstream transport failures and database contention qualify;
    /// everything else fails immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Upstream(_) => true,
            Error::Database(db_err) => db_err.to_string().contains("database is locked"),
            _ => false,
        }
    }
}
