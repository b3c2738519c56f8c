/// Database Module
///
/// This module provides the database access layer of SQLQ, organized into
/// focused submodules.
///
/// ## Architecture
///
/// - **Values** (`value.rs`): Scalars bound into statements and rows read back
/// - **Connection Management** (`connection.rs`): The database handle, transactions and quoting
/// - **Query Building** (`query.rs`): Fluent statement assembly and execution
/// - **CRUD Helpers** (`crud.rs`): Map-based insert/update/delete/upsert/count shortcuts
///
/// ## Error Handling
///
/// All database operations use the standardized `SqlqError` type for consistent error propagation.
pub mod connection;
pub mod crud;
pub mod query;
pub mod value;

pub use connection::*;
pub use crud::*;
pub use query::*;
pub use value::*;
