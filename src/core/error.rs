/// SQLQ Error Module
///
/// This module defines the error type shared by the connection manager,
/// the query builder and the configuration layer.
use thiserror::Error;

/// Error type for every fallible SQLQ operation.
///
/// Empty result sets are never errors: `fetch` returns an empty `Vec` and
/// `fetch_single` returns an empty `Row`.
#[derive(Error, Debug)]
pub enum SqlqError {
    /// Malformed URL, unsupported backend, rejected open or failed `db_init`
    #[error("Connection error: {0}")]
    Connection(String),

    /// Invalid begin/commit/rollback for the current connection state
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Backend failure while preparing, binding or running a statement
    #[error("Execution error: {0}")]
    Execution(#[from] rusqlite::Error),

    /// Builder misuse detected before anything reaches the backend
    #[error("Query error: {0}")]
    Query(String),

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML configuration parse errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON encoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Type alias for Result to use SqlqError as the error type.
pub type Result<T> = std::result::Result<T, SqlqError>;
