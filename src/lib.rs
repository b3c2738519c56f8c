//! A thin relational-database access layer: a connection handle plus a fluent
//! query builder for CRUD, simple filtering and manual transactions over
//! SQLite.
//!
//! ```
//! use sqlq::{ConnectOptions, Database};
//!
//! let db = Database::open(ConnectOptions::new("sqlite::memory:"))?;
//! db.raw("CREATE TABLE account (id INTEGER PRIMARY KEY, email TEXT)").exec()?;
//! let id = db.insert("account").values([("email", "a@x.com")]).exec_last_insert_id()?;
//! let row = db.select("account").filter("id =", id).fetch_single()?;
//! assert_eq!(row["email"].as_str(), Some("a@x.com"));
//! # Ok::<(), sqlq::SqlqError>(())
//! ```

// Core infrastructure modules
pub mod core;

pub mod config;

#[cfg(test)]
mod test_utils;

pub use crate::config::ConnectOptions;
pub use crate::core::db::{
    BackendKind, ConnectTarget, Database, Direction, Logic, Query, QueryKind, Row, Search,
    Statement, StatementType, TransactionState, Value,
};
pub use crate::core::{Result, SqlqError};
