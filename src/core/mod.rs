/// Core Module for SQLQ
///
/// This module contains the connection manager, the query builder and the
/// shared error type.

pub mod db;
pub mod error;

// Re-export commonly used types for convenience
pub use error::{Result, SqlqError};
