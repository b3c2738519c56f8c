/// Query Building Module
///
/// This module provides the fluent statement builder. A `Query` accumulates
/// fragments through chained calls, renders them into a `Statement` with
/// named bound parameters, and is consumed by exactly one terminal call.
///
/// Table names, column names, operators and `sql()` fragments are
/// interpolated into the statement text as given. Only values are bound.

use crate::core::db::connection::Database;
use crate::core::db::value::{Row, Value};
use crate::core::{Result, SqlqError};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::ToSql;
use rusqlite::Connection;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

static LEADING_IDENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)").expect("valid regex"));

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_]").expect("valid regex"));

/// The statement a `Query` renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Select,
    Insert,
    Update,
    Delete,
    Raw,
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            QueryKind::Select => "select",
            QueryKind::Insert => "insert",
            QueryKind::Update => "update",
            QueryKind::Delete => "delete",
            QueryKind::Raw => "raw",
        };
        f.write_str(label)
    }
}

/// Logical joiner placed between two filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Logic {
    #[default]
    And,
    Or,
}

impl Logic {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Logic::And => "AND",
            Logic::Or => "OR",
        }
    }
}

impl FromStr for Logic {
    type Err = SqlqError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "AND" => Ok(Logic::And),
            "OR" => Ok(Logic::Or),
            other => Err(SqlqError::Query(format!("unknown logical operator `{}`", other))),
        }
    }
}

/// Sort direction for `Query::order`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

impl FromStr for Direction {
    type Err = SqlqError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "ASC" => Ok(Direction::Asc),
            "DESC" => Ok(Direction::Desc),
            other => Err(SqlqError::Query(format!("unknown sort direction `{}`", other))),
        }
    }
}

/// One fragment of a WHERE condition.
#[derive(Debug, Clone, PartialEq)]
enum Clause {
    /// `expression :param`, e.g. `id > :id`
    Compare { expression: String, value: Value },
    /// `expression (:p, :p_1, ...)`
    In { expression: String, values: Vec<Value> },
    /// Caller-supplied text, used verbatim
    Raw(String),
}

#[derive(Debug, Clone, PartialEq)]
struct Filter {
    joiner: Logic,
    clause: Clause,
}

/// A rendered statement: SQL text plus its named parameters in binding
/// order. Parameter names carry their `:` prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<(String, Value)>,
}

impl Statement {
    fn named_params(&self) -> Vec<(&str, &dyn ToSql)> {
        self.params
            .iter()
            .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
            .collect()
    }
}

/// Allocates unique placeholder names within one statement.
#[derive(Default)]
struct Binder {
    names: HashSet<String>,
    params: Vec<(String, Value)>,
}

impl Binder {
    /// Binds `value` under a name derived from `hint` and returns the
    /// placeholder to splice into the SQL text.
    fn bind(&mut self, hint: &str, value: Value) -> String {
        let mut base = NON_WORD.replace_all(hint.trim(), "_").into_owned();
        if base.is_empty() || base.starts_with(|c: char| c.is_ascii_digit()) {
            base.insert(0, 'p');
        }

        let mut name = base.clone();
        let mut suffix = 0;
        while self.names.contains(&name) {
            suffix += 1;
            name = format!("{}_{}", base, suffix);
        }
        self.names.insert(name.clone());

        let placeholder = format!(":{}", name);
        self.params.push((placeholder.clone(), value));
        placeholder
    }
}

/// Placeholder hint for a filter expression: its leading identifier.
fn expression_hint(expression: &str) -> &str {
    LEADING_IDENT
        .captures(expression)
        .and_then(|caps| caps.get(1))
        .map_or("p", |m| m.as_str())
}

/// An in-progress statement bound to a database handle.
///
/// Configuration calls take and return the query; terminal calls consume
/// it. Builder misuse is reported when the query is rendered.
#[derive(Debug, Clone)]
#[must_use = "a query does nothing until a terminal call such as exec() or fetch()"]
pub struct Query<'db> {
    db: &'db Database,
    kind: QueryKind,
    /// Table name, or the full SQL text for raw statements
    target: String,
    fields: Vec<String>,
    values: Vec<(String, Value)>,
    filters: Vec<Filter>,
    pending_joiner: Option<Logic>,
    order: Option<(String, Direction)>,
    limit: Option<(u64, u64)>,
}

impl Database {
    /// Starts a `SELECT * FROM table`.
    pub fn select(&self, table: &str) -> Query<'_> {
        Query::new(self, QueryKind::Select, table)
    }

    /// Starts a SELECT of the given columns, in the given order.
    pub fn select_fields<I, S>(&self, table: &str, fields: I) -> Query<'_>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut query = Query::new(self, QueryKind::Select, table);
        query.fields = fields.into_iter().map(Into::into).collect();
        query
    }

    pub fn insert(&self, table: &str) -> Query<'_> {
        Query::new(self, QueryKind::Insert, table)
    }

    pub fn update(&self, table: &str) -> Query<'_> {
        Query::new(self, QueryKind::Update, table)
    }

    pub fn delete(&self, table: &str) -> Query<'_> {
        Query::new(self, QueryKind::Delete, table)
    }

    /// Wraps a complete SQL statement (or batch, for `exec`).
    pub fn raw(&self, sql: &str) -> Query<'_> {
        Query::new(self, QueryKind::Raw, sql)
    }
}

impl<'db> Query<'db> {
    fn new(db: &'db Database, kind: QueryKind, target: &str) -> Self {
        Query {
            db,
            kind,
            target: target.to_string(),
            fields: Vec::new(),
            values: Vec::new(),
            filters: Vec::new(),
            pending_joiner: None,
            order: None,
            limit: None,
        }
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    /// Sets column values for INSERT or UPDATE. Keys keep their first
    /// insertion position; a repeated key takes the latest value.
    pub fn values<I, K, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        for (column, value) in values {
            let column = column.into();
            let value = value.into();
            match self.values.iter_mut().find(|(c, _)| *c == column) {
                Some(slot) => slot.1 = value,
                None => self.values.push((column, value)),
            }
        }
        self
    }

    /// Adds `expression :param`, where `expression` ends in a comparison
    /// operator (`"id >"`, `"email LIKE"`).
    pub fn filter(self, expression: &str, value: impl Into<Value>) -> Self {
        self.push_clause(Clause::Compare {
            expression: expression.trim().to_string(),
            value: value.into(),
        })
    }

    /// Sets the joiner between the previous filter and the next one.
    /// Filters without an explicit condition are joined with AND.
    pub fn condition(mut self, logic: Logic) -> Self {
        self.pending_joiner = Some(logic);
        self
    }

    /// Adds one filter per pair, joined to each other with `logic`.
    pub fn filter_array<I, K, V>(mut self, filters: I, logic: Logic) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        for (i, (expression, value)) in filters.into_iter().enumerate() {
            if i > 0 {
                self.pending_joiner = Some(logic);
            }
            self = self.filter(expression.as_ref(), value);
        }
        self
    }

    /// Adds a set-membership clause, `expression (:p, :p_1, ...)`, with every
    /// element bound separately.
    pub fn filter_in<I, V>(self, expression: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.push_clause(Clause::In {
            expression: expression.trim().to_string(),
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    /// Appends a raw WHERE fragment verbatim.
    pub fn sql(self, fragment: &str) -> Self {
        self.push_clause(Clause::Raw(fragment.trim().to_string()))
    }

    /// Orders the result; the latest call wins.
    pub fn order(mut self, field: &str, direction: Direction) -> Self {
        self.order = Some((field.to_string(), direction));
        self
    }

    /// Renders `LIMIT offset, count`; the latest call wins. Both are
    /// clamped to SQLite's signed 64-bit integer range.
    pub fn limit(mut self, offset: u64, count: u64) -> Self {
        let clamp = |n: u64| n.min(i64::MAX as u64);
        self.limit = Some((clamp(offset), clamp(count)));
        self
    }

    fn push_clause(mut self, clause: Clause) -> Self {
        let joiner = self.pending_joiner.take().unwrap_or_default();
        self.filters.push(Filter { joiner, clause });
        self
    }

    fn validate(&self) -> Result<()> {
        let misuse = |msg: &str| -> Result<()> {
            Err(SqlqError::Query(format!("{} ({} on `{}`)", msg, self.kind, self.target)))
        };
        let ordered = self.order.is_some() || self.limit.is_some();

        match self.kind {
            QueryKind::Select if !self.values.is_empty() => misuse("values() applies only to INSERT and UPDATE"),
            QueryKind::Select => Ok(()),
            QueryKind::Insert if self.values.is_empty() => misuse("INSERT needs at least one value"),
            QueryKind::Insert if !self.filters.is_empty() => misuse("filters do not apply to INSERT"),
            QueryKind::Update if self.values.is_empty() => misuse("UPDATE needs at least one value"),
            QueryKind::Delete if !self.values.is_empty() => misuse("values() applies only to INSERT and UPDATE"),
            QueryKind::Insert | QueryKind::Update | QueryKind::Delete if ordered => {
                misuse("order() and limit() apply only to SELECT")
            }
            QueryKind::Insert | QueryKind::Update | QueryKind::Delete => Ok(()),
            QueryKind::Raw if !self.values.is_empty() || !self.filters.is_empty() || ordered => {
                misuse("raw statements take no builder clauses")
            }
            QueryKind::Raw => Ok(()),
        }
    }

    /// Renders the statement without executing it.
    pub fn build(&self) -> Result<Statement> {
        self.validate()?;
        let mut binder = Binder::default();

        let sql = match self.kind {
            QueryKind::Select => {
                let fields = if self.fields.is_empty() {
                    "*".to_string()
                } else {
                    self.fields.join(", ")
                };
                let mut sql = format!(
                    "SELECT {} FROM {} WHERE {}",
                    fields,
                    self.target,
                    self.where_clause(&mut binder)
                );
                if let Some((field, direction)) = &self.order {
                    sql.push_str(&format!(" ORDER BY {} {}", field, direction.as_sql()));
                }
                if let Some((offset, count)) = self.limit {
                    sql.push_str(&format!(" LIMIT {}, {}", offset, count));
                }
                sql
            }
            QueryKind::Insert => {
                let columns: Vec<&str> = self.values.iter().map(|(c, _)| c.as_str()).collect();
                let placeholders: Vec<String> = self
                    .values
                    .iter()
                    .map(|(c, v)| binder.bind(c, v.clone()))
                    .collect();
                format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    self.target,
                    columns.join(", "),
                    placeholders.join(", ")
                )
            }
            QueryKind::Update => {
                let assignments: Vec<String> = self
                    .values
                    .iter()
                    .map(|(c, v)| format!("{} = {}", c, binder.bind(c, v.clone())))
                    .collect();
                format!(
                    "UPDATE {} SET {} WHERE {}",
                    self.target,
                    assignments.join(", "),
                    self.where_clause(&mut binder)
                )
            }
            QueryKind::Delete => format!(
                "DELETE FROM {} WHERE {}",
                self.target,
                self.where_clause(&mut binder)
            ),
            QueryKind::Raw => self.target.clone(),
        };

        Ok(Statement {
            sql,
            params: binder.params,
        })
    }

    /// Joined filter clauses, or `1=1` when there are none.
    fn where_clause(&self, binder: &mut Binder) -> String {
        if self.filters.is_empty() {
            return "1=1".to_string();
        }

        let mut out = String::new();
        for (i, filter) in self.filters.iter().enumerate() {
            if i > 0 {
                out.push(' ');
                out.push_str(filter.joiner.as_sql());
                out.push(' ');
            }
            match &filter.clause {
                Clause::Compare { expression, value } => {
                    let placeholder = binder.bind(expression_hint(expression), value.clone());
                    out.push_str(&format!("{} {}", expression, placeholder));
                }
                Clause::In { expression, values } => {
                    let hint = expression_hint(expression);
                    let placeholders: Vec<String> =
                        values.iter().map(|v| binder.bind(hint, v.clone())).collect();
                    out.push_str(&format!("{} ({})", expression, placeholders.join(", ")));
                }
                Clause::Raw(fragment) => out.push_str(fragment),
            }
        }
        out
    }

    /// Renders, traces and returns the statement with its connection.
    fn prepare_run(&self) -> Result<(Statement, &'db Connection)> {
        let statement = self.build()?;
        let conn = self.db.connection()?;
        self.db.record(format!("{} sql: {}", self.kind, statement.sql));
        Ok((statement, conn))
    }

    /// Runs an INSERT, UPDATE, DELETE or raw statement.
    ///
    /// # Errors
    ///
    /// `SqlqError::Execution` for malformed SQL or constraint violations,
    /// `SqlqError::Query` when called on a SELECT.
    pub fn exec(self) -> Result<bool> {
        self.exec_count().map(|_| true)
    }

    /// Like `exec`, returning the number of rows changed.
    ///
    /// Raw statements may be batches; their count covers every statement in
    /// the batch.
    pub fn exec_count(self) -> Result<usize> {
        if self.kind == QueryKind::Select {
            return Err(SqlqError::Query(
                "exec() cannot run a SELECT; use fetch()".to_string(),
            ));
        }
        let (statement, conn) = self.prepare_run()?;

        if self.kind == QueryKind::Raw {
            let before = total_changes(conn)?;
            conn.execute_batch(&statement.sql)?;
            let after = total_changes(conn)?;
            return Ok((after - before).max(0) as usize);
        }

        let mut stmt = conn.prepare(&statement.sql)?;
        let affected = stmt.execute(statement.named_params().as_slice())?;
        Ok(affected)
    }

    /// Runs an INSERT and returns the generated row id.
    pub fn exec_last_insert_id(self) -> Result<i64> {
        if !matches!(self.kind, QueryKind::Insert | QueryKind::Raw) {
            return Err(SqlqError::Query(format!(
                "exec_last_insert_id() needs an INSERT, not {}",
                self.kind
            )));
        }
        let db = self.db;
        self.exec_count()?;
        Ok(db.last_insert_id())
    }

    /// Runs a SELECT (or raw query) and returns every row, possibly none.
    pub fn fetch(self) -> Result<Vec<Row>> {
        self.query_rows(None)
    }

    /// Runs a SELECT and returns its first row, or an empty `Row`.
    ///
    /// No `LIMIT 1` is added: ORDER BY and LIMIT set on the query are kept,
    /// and only the first row the backend produces is read.
    pub fn fetch_single(self) -> Result<Row> {
        Ok(self.query_rows(Some(1))?.into_iter().next().unwrap_or_default())
    }

    fn query_rows(self, max_rows: Option<usize>) -> Result<Vec<Row>> {
        if !matches!(self.kind, QueryKind::Select | QueryKind::Raw) {
            return Err(SqlqError::Query(format!(
                "fetch() needs a SELECT or raw statement, not {}",
                self.kind
            )));
        }
        let (statement, conn) = self.prepare_run()?;

        let mut stmt = conn.prepare(&statement.sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let params = statement.named_params();
        let mut rows = stmt.query(params.as_slice())?;

        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let mut out = Row::new();
            for (i, column) in columns.iter().enumerate() {
                out.push(column.clone(), Value::from(row.get_ref(i)?));
            }
            result.push(out);
            if max_rows.map_or(false, |max| result.len() >= max) {
                break;
            }
        }
        Ok(result)
    }
}

fn total_changes(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT total_changes()", [], |row| row.get(0))?)
}

/// Represents different SQL statement types for introspection
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatementType {
    /// SELECT statement
    Select,
    /// INSERT statement
    Insert,
    /// UPDATE statement
    Update,
    /// DELETE statement
    Delete,
    /// CREATE statement
    Create,
    /// DROP statement
    Drop,
    /// ALTER statement
    Alter,
    /// PRAGMA statement
    Pragma,
    /// EXPLAIN or EXPLAIN QUERY PLAN
    Explain,
    /// BEGIN/COMMIT/ROLLBACK transaction commands
    Transaction,
    /// Other statement types
    Other,
}

impl StatementType {
    /// Determines the statement type from a SQL string
    pub fn from_sql(sql: &str) -> Self {
        let sql_upper = sql.trim().to_uppercase();

        if sql_upper.starts_with("SELECT")
            || sql_upper.starts_with("WITH")
            || sql_upper.starts_with("VALUES")
        {
            StatementType::Select
        } else if sql_upper.starts_with("INSERT") || sql_upper.starts_with("REPLACE") {
            StatementType::Insert
        } else if sql_upper.starts_with("UPDATE") {
            StatementType::Update
        } else if sql_upper.starts_with("DELETE") {
            StatementType::Delete
        } else if sql_upper.starts_with("CREATE") {
            StatementType::Create
        } else if sql_upper.starts_with("DROP") {
            StatementType::Drop
        } else if sql_upper.starts_with("ALTER") {
            StatementType::Alter
        } else if sql_upper.starts_with("PRAGMA") {
            StatementType::Pragma
        } else if sql_upper.starts_with("EXPLAIN") {
            StatementType::Explain
        } else if sql_upper.starts_with("BEGIN")
            || sql_upper.starts_with("COMMIT")
            || sql_upper.starts_with("ROLLBACK")
        {
            StatementType::Transaction
        } else {
            StatementType::Other
        }
    }

    /// Whether running this statement is expected to yield rows.
    pub fn returns_rows(&self) -> bool {
        matches!(
            self,
            StatementType::Select | StatementType::Pragma | StatementType::Explain
        )
    }
}
