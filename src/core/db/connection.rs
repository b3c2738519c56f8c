/// Connection Management Module
///
/// This module provides the database handle used by every query: opening and
/// closing the connection, transaction control, literal quoting and the
/// statement trace.

use crate::config::ConnectOptions;
use crate::core::{Result, SqlqError};
use rusqlite::Connection;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::collections::VecDeque;
use tracing::{debug, error, info, warn};

/// Entries kept in the statement trace; older entries are dropped first.
pub const TRACE_CAPACITY: usize = 1000;

/// Backends a connection URL can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Sqlite,
    Mysql,
}

impl BackendKind {
    /// Splits a connection URL into its backend and the backend-specific
    /// remainder.
    ///
    /// `sqlite::memory:` and `sqlite:<path>` open SQLite databases; `mysql:`
    /// URLs are recognized so they can be rejected with a clear message.
    pub fn parse_url(url: &str) -> Result<(BackendKind, &str)> {
        let url = url.trim();
        if let Some(path) = url.strip_prefix("sqlite:") {
            if path.is_empty() {
                return Err(SqlqError::Connection(format!(
                    "malformed url `{}`: missing database path",
                    url
                )));
            }
            return Ok((BackendKind::Sqlite, path));
        }
        if let Some(dsn) = url.strip_prefix("mysql:") {
            return Ok((BackendKind::Mysql, dsn));
        }
        Err(SqlqError::Connection(format!(
            "malformed url `{}`: expected `sqlite:` or `mysql:` scheme",
            url
        )))
    }
}

/// Represents database transaction states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionState {
    /// No active transaction (autocommit mode)
    #[default]
    Autocommit,
    /// Transaction in progress
    Transaction,
}

/// What `Database::connect` opens: an existing handle or a set of options.
pub enum ConnectTarget {
    Handle(Connection),
    Options(ConnectOptions),
}

impl From<Connection> for ConnectTarget {
    fn from(conn: Connection) -> Self {
        ConnectTarget::Handle(conn)
    }
}

impl From<ConnectOptions> for ConnectTarget {
    fn from(options: ConnectOptions) -> Self {
        ConnectTarget::Options(options)
    }
}

/// A handle to one backend connection.
///
/// Queries borrow the handle, so it cannot be disconnected while a query is
/// being built. The handle is not `Sync`; callers sharing it across threads
/// must wrap it in their own lock.
#[derive(Debug, Default)]
pub struct Database {
    connection: Option<Connection>,
    backend: Option<BackendKind>,
    persistent: bool,
    trace: RefCell<VecDeque<String>>,
}

impl Database {
    /// Creates a disconnected handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a handle and connects it.
    ///
    /// # Examples
    ///
    /// ```
    /// use sqlq::{ConnectOptions, Database};
    ///
    /// let db = Database::open(ConnectOptions::new("sqlite::memory:"))?;
    /// assert!(db.is_connected());
    /// # Ok::<(), sqlq::SqlqError>(())
    /// ```
    pub fn open(target: impl Into<ConnectTarget>) -> Result<Self> {
        let mut db = Database::new();
        db.connect(target)?;
        Ok(db)
    }

    /// Connects to the backend, replacing any previous connection.
    ///
    /// An already open `rusqlite::Connection` is adopted as is. Options are
    /// resolved through their URL; `db_init` runs once after the connection
    /// opens and its failure counts as a connection failure.
    ///
    /// # Errors
    ///
    /// Returns `SqlqError::Connection` for a malformed URL, an unsupported
    /// backend, a backend that refuses to open, or a failing `db_init`.
    pub fn connect(&mut self, target: impl Into<ConnectTarget>) -> Result<()> {
        match target.into() {
            ConnectTarget::Handle(conn) => {
                self.record("connected with an existing connection handle");
                self.connection = Some(conn);
                self.backend = Some(BackendKind::Sqlite);
                self.persistent = false;
                Ok(())
            }
            ConnectTarget::Options(options) => self.connect_with_options(&options),
        }
    }

    fn connect_with_options(&mut self, options: &ConnectOptions) -> Result<()> {
        self.record(format!("trying to connect with {}", options.url));
        let (backend, path) = BackendKind::parse_url(&options.url).map_err(|e| {
            self.record(e.to_string());
            e
        })?;

        if backend == BackendKind::Mysql {
            let err = SqlqError::Connection(format!(
                "backend `mysql` is not available in this build (url `{}`)",
                options.url
            ));
            self.record(err.to_string());
            return Err(err);
        }

        if options.username.is_some() || options.password.is_some() {
            debug!("sqlite ignores username/password");
        }
        if options.mysql_ssl {
            warn!("mysql_ssl is set but the sqlite backend has no SSL layer; ignoring ssl_* keys");
        }

        let conn = Connection::open(path).map_err(|e| {
            let err = SqlqError::Connection(format!("failed to open `{}`: {}", options.url, e));
            self.record(err.to_string());
            err
        })?;

        if let Some(init) = options.db_init.as_deref() {
            self.record(format!("running db_init: {}", init));
            conn.execute_batch(init).map_err(|e| {
                let err = SqlqError::Connection(format!("db_init failed: {}", e));
                self.record(err.to_string());
                err
            })?;
        }

        self.connection = Some(conn);
        self.backend = Some(backend);
        self.persistent = options.persistent;
        self.record("connected using options");
        info!(url = %options.url, "database connected");
        Ok(())
    }

    /// Connects, terminating the process on failure unless `dont_die` is set.
    ///
    /// The fatal path prints the error, the statement trace and a captured
    /// back-trace to stderr and exits with status 1.
    pub fn connect_or_exit(&mut self, options: ConnectOptions) -> Result<()> {
        let dont_die = options.dont_die;
        match self.connect(options) {
            Ok(()) => Ok(()),
            Err(e) if dont_die => Err(e),
            Err(e) => {
                error!("fatal connection failure: {}", e);
                self.record("fatal error encountered");
                eprintln!("Error!: {}", e);
                for entry in self.debug_trace() {
                    eprintln!("  {}", entry);
                }
                eprintln!("{}", Backtrace::force_capture());
                std::process::exit(1);
            }
        }
    }

    /// Closes the connection. Disconnecting a closed handle is a no-op.
    pub fn disconnect(&mut self) {
        if self.connection.take().is_some() {
            self.record("disconnected");
            info!("database disconnected");
        }
        self.backend = None;
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Backend of the open connection, `None` when disconnected.
    pub fn backend(&self) -> Option<BackendKind> {
        self.backend
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    /// Returns the open connection.
    pub(crate) fn connection(&self) -> Result<&Connection> {
        self.connection
            .as_ref()
            .ok_or_else(|| SqlqError::Connection("no open connection".to_string()))
    }

    fn transaction_connection(&self) -> Result<&Connection> {
        self.connection
            .as_ref()
            .ok_or_else(|| SqlqError::Transaction("no open connection".to_string()))
    }

    /// Gets the current transaction state
    pub fn transaction_state(&self) -> TransactionState {
        match &self.connection {
            Some(conn) if !conn.is_autocommit() => TransactionState::Transaction,
            _ => TransactionState::Autocommit,
        }
    }

    /// Starts a transaction. Transactions do not nest.
    pub fn begin(&self) -> Result<()> {
        let conn = self.transaction_connection()?;
        if !conn.is_autocommit() {
            return Err(SqlqError::Transaction("Transaction already in progress".to_string()));
        }
        self.record("BEGIN");
        conn.execute_batch("BEGIN")
            .map_err(|e| SqlqError::Transaction(format!("begin failed: {}", e)))
    }

    pub fn commit(&self) -> Result<()> {
        let conn = self.transaction_connection()?;
        if conn.is_autocommit() {
            return Err(SqlqError::Transaction("No transaction in progress".to_string()));
        }
        self.record("COMMIT");
        conn.execute_batch("COMMIT")
            .map_err(|e| SqlqError::Transaction(format!("commit failed: {}", e)))
    }

    pub fn rollback(&self) -> Result<()> {
        let conn = self.transaction_connection()?;
        if conn.is_autocommit() {
            return Err(SqlqError::Transaction("No transaction in progress".to_string()));
        }
        self.record("ROLLBACK");
        conn.execute_batch("ROLLBACK")
            .map_err(|e| SqlqError::Transaction(format!("rollback failed: {}", e)))
    }

    /// Most recent auto-generated row id; 0 before any insert or when
    /// disconnected.
    pub fn last_insert_id(&self) -> i64 {
        self.connection
            .as_ref()
            .map(Connection::last_insert_rowid)
            .unwrap_or(0)
    }

    /// Quotes `text` as a string literal using the backend's own escaping.
    ///
    /// Values should be bound, not quoted. This exists for SQL that is
    /// assembled outside the builder.
    pub fn quote(&self, text: &str) -> Result<String> {
        let conn = self.connection()?;
        let quoted = conn.query_row("SELECT quote(?1)", [text], |row| row.get(0))?;
        Ok(quoted)
    }

    /// Quotes a table or column name as an identifier.
    pub fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Appends an entry to the statement trace, keeping at most
    /// `TRACE_CAPACITY` entries.
    pub(crate) fn record(&self, entry: impl Into<String>) {
        let entry = entry.into();
        debug!("{}", entry);
        let mut trace = self.trace.borrow_mut();
        if trace.len() == TRACE_CAPACITY {
            trace.pop_front();
        }
        trace.push_back(entry);
    }

    /// The most recent statements and connection events, oldest first.
    pub fn debug_trace(&self) -> Vec<String> {
        self.trace.borrow().iter().cloned().collect()
    }

    pub fn clear_debug_trace(&self) {
        self.trace.borrow_mut().clear();
    }
}
