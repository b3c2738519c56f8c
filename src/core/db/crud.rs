/// CRUD Helpers Module
///
/// Map-based shortcuts over the query builder: insert a row from a column
/// mapping, update or delete by search, count rows, upsert, and a few raw
/// query conveniences.

use crate::core::db::connection::Database;
use crate::core::db::query::{Direction, Logic};
use crate::core::db::value::{Row, Value};
use crate::core::{Result, SqlqError};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

static BARE_IDENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*[A-Za-z_][A-Za-z0-9_]*\s*$").expect("valid regex"));

/// Which rows an update, delete or count applies to.
///
/// Both forms are bound as parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Search {
    /// Primary key match, `id = :id`
    Id(Value),
    /// AND-joined filters. Keys are filter expressions (`"id >"`); a bare
    /// column name means equality. No pairs matches every row for reads
    /// and counts; updates and deletes refuse it.
    Fields(Vec<(String, Value)>),
    #[default]
    All,
}

impl Search {
    pub fn id(value: impl Into<Value>) -> Self {
        Search::Id(value.into())
    }

    pub fn fields<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Search::Fields(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    fn into_filters(self) -> Vec<(String, Value)> {
        match self {
            Search::Id(value) => vec![("id =".to_string(), value)],
            Search::Fields(pairs) => pairs
                .into_iter()
                .map(|(key, value)| {
                    if BARE_IDENT.is_match(&key) {
                        (format!("{} =", key.trim()), value)
                    } else {
                        (key, value)
                    }
                })
                .collect(),
            Search::All => Vec::new(),
        }
    }

    /// Filters for UPDATE and DELETE. An empty `Fields` is refused so a
    /// whole-table write always names `Search::All`.
    fn into_write_filters(self, table: &str) -> Result<Vec<(String, Value)>> {
        if matches!(&self, Search::Fields(pairs) if pairs.is_empty()) {
            return Err(SqlqError::Query(format!(
                "empty search for a write on `{}`; use Search::All to target every row",
                table
            )));
        }
        Ok(self.into_filters())
    }
}

impl Database {
    /// Inserts one row built from `values`.
    pub fn insert_row<I, K, V>(&self, table: &str, values: I) -> Result<bool>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.insert(table).values(values).exec()
    }

    /// Updates the rows matching `search`.
    pub fn update_rows<I, K, V>(&self, table: &str, values: I, search: Search) -> Result<bool>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let filters = search.into_write_filters(table)?;
        self.update(table)
            .values(values)
            .filter_array(filters, Logic::And)
            .exec()
    }

    /// Deletes the rows matching `search`.
    pub fn delete_rows(&self, table: &str, search: Search) -> Result<bool> {
        let filters = search.into_write_filters(table)?;
        self.delete(table).filter_array(filters, Logic::And).exec()
    }

    /// Selects `fields` (every column when empty) from the rows matching
    /// `search`.
    pub fn select_rows<I, S>(&self, table: &str, fields: I, search: Search) -> Result<Vec<Row>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select_fields(table, fields)
            .filter_array(search.into_filters(), Logic::And)
            .fetch()
    }

    /// First row matching `search`, or an empty `Row`.
    pub fn select_one<I, S>(&self, table: &str, fields: I, search: Search) -> Result<Row>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select_fields(table, fields)
            .filter_array(search.into_filters(), Logic::And)
            .fetch_single()
    }

    /// `select_rows` with optional ordering and an optional
    /// `(offset, count)` page.
    pub fn select_all<I, S>(
        &self,
        table: &str,
        fields: I,
        search: Search,
        page: Option<(u64, u64)>,
        order: Option<(&str, Direction)>,
    ) -> Result<Vec<Row>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut query = self
            .select_fields(table, fields)
            .filter_array(search.into_filters(), Logic::And);
        if let Some((field, direction)) = order {
            query = query.order(field, direction);
        }
        if let Some((offset, count)) = page {
            query = query.limit(offset, count);
        }
        query.fetch()
    }

    /// Counts the rows matching `search`.
    pub fn num_rows(&self, table: &str, search: Search) -> Result<i64> {
        let row = self
            .select_fields(table, ["count(*) AS num_rows"])
            .filter_array(search.into_filters(), Logic::And)
            .fetch_single()?;
        Ok(row.get("num_rows").and_then(Value::as_i64).unwrap_or(0))
    }

    /// Inserts `values` when nothing matches `search`, otherwise updates the
    /// matching rows.
    ///
    /// The count and the write run in one `BEGIN IMMEDIATE` transaction, or
    /// inside the caller's transaction when one is already open.
    pub fn replace<I, K, V>(&self, table: &str, values: I, search: Search) -> Result<bool>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let values: Vec<(String, Value)> = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let conn = self.connection()?;
        let owns_transaction = conn.is_autocommit();
        if owns_transaction {
            self.record("BEGIN IMMEDIATE");
            conn.execute_batch("BEGIN IMMEDIATE")
                .map_err(|e| SqlqError::Transaction(format!("replace could not begin: {}", e)))?;
        }

        let result = match self.num_rows(table, search.clone()) {
            Ok(0) => self.insert_row(table, values),
            Ok(_) => self.update_rows(table, values, search),
            Err(e) => Err(e),
        };

        if owns_transaction {
            match &result {
                Ok(_) => {
                    self.record("COMMIT");
                    conn.execute_batch("COMMIT")
                        .map_err(|e| SqlqError::Transaction(format!("replace could not commit: {}", e)))?;
                }
                Err(e) => {
                    warn!("replace on `{}` failed, rolling back: {}", table, e);
                    self.record("ROLLBACK");
                    if let Err(rollback_err) = conn.execute_batch("ROLLBACK") {
                        warn!("rollback after failed replace also failed: {}", rollback_err);
                    }
                }
            }
        }
        result
    }

    /// Runs a raw SELECT and returns every row.
    pub fn select_query(&self, sql: &str) -> Result<Vec<Row>> {
        self.raw(sql).fetch()
    }

    /// Runs a raw SELECT and returns its first row, or an empty `Row`.
    pub fn select_query_one(&self, sql: &str) -> Result<Row> {
        self.raw(sql).fetch_single()
    }

    /// Whether `table` has a column named `field`. A missing table yields
    /// `false`.
    pub fn field_exists(&self, table: &str, field: &str) -> Result<bool> {
        let conn = self.connection()?;
        let sql = format!("SELECT * FROM {} LIMIT 0", table);
        self.record(format!("field_exists sql: {}", sql));

        match conn.prepare(&sql) {
            Ok(stmt) => Ok(stmt.column_names().iter().any(|column| *column == field)),
            Err(rusqlite::Error::SqliteFailure(_, Some(msg))) if msg.contains("no such table") => {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{account_db, seeded_account_db};

    #[test]
    fn test_search_into_filters() {
        assert_eq!(Search::id(3).into_filters(), vec![("id =".to_string(), Value::Integer(3))]);
        assert_eq!(
            Search::fields([("email", "a"), ("id >", "1")]).into_filters(),
            vec![
                ("email =".to_string(), Value::from("a")),
                ("id >".to_string(), Value::from("1")),
            ]
        );
        assert!(Search::All.into_filters().is_empty());
    }

    #[test]
    fn test_update_and_delete_by_search() {
        let db = seeded_account_db();

        assert!(db.update_rows("account", [("password", "changed")], Search::id(2)).unwrap());
        let row = db.select("account").filter("id =", 2).fetch_single().unwrap();
        assert_eq!(row["password"], Value::from("changed"));

        assert!(db
            .delete_rows("account", Search::fields([("email", "a@x.com")]))
            .unwrap());
        assert_eq!(db.num_rows("account", Search::All).unwrap(), 2);
    }

    #[test]
    fn test_empty_field_search_refuses_writes() {
        let db = seeded_account_db();
        let empty = || Search::fields(Vec::<(String, Value)>::new());

        assert!(matches!(db.delete_rows("account", empty()), Err(SqlqError::Query(_))));
        assert!(matches!(
            db.update_rows("account", [("password", "x")], empty()),
            Err(SqlqError::Query(_))
        ));
        assert_eq!(db.num_rows("account", Search::fields([("password", "x")])).unwrap(), 0);
        assert_eq!(db.num_rows("account", empty()).unwrap(), 3);

        assert!(db.update_rows("account", [("password", "x")], Search::All).unwrap());
        assert_eq!(db.num_rows("account", Search::fields([("password", "x")])).unwrap(), 3);
        assert!(db.delete_rows("account", Search::All).unwrap());
        assert_eq!(db.num_rows("account", Search::All).unwrap(), 0);
    }

    #[test]
    fn test_map_based_selects() {
        let db = seeded_account_db();

        let rows = db
            .select_rows("account", ["email"], Search::fields([("password", "p2")]))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].columns().collect::<Vec<_>>(), vec!["email"]);
        assert_eq!(rows[0]["email"], Value::from("b@x.com"));

        let one = db.select_one("account", Vec::<String>::new(), Search::id(3)).unwrap();
        assert_eq!(one["email"], Value::from("c@x.com"));
        assert_eq!(one.len(), 3);
        assert!(db
            .select_one("account", ["id"], Search::id(42))
            .unwrap()
            .is_empty());

        let page = db
            .select_all(
                "account",
                ["id"],
                Search::All,
                Some((1, 1)),
                Some(("id", Direction::Desc)),
            )
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0]["id"], Value::Integer(2));

        let everything = db
            .select_all("account", Vec::<String>::new(), Search::fields(Vec::<(String, Value)>::new()), None, None)
            .unwrap();
        assert_eq!(everything.len(), 3);
    }

    #[test]
    fn test_num_rows_with_search() {
        let db = seeded_account_db();
        assert_eq!(db.num_rows("account", Search::All).unwrap(), 3);
        assert_eq!(db.num_rows("account", Search::fields([("id >", 1)])).unwrap(), 2);
        assert_eq!(db.num_rows("account", Search::id(99)).unwrap(), 0);
    }

    #[test]
    fn test_replace_inserts_then_updates() {
        let db = account_db();
        let search = Search::fields([("email", "a@x.com")]);

        assert!(db
            .replace("account", [("email", "a@x.com"), ("password", "p1")], search.clone())
            .unwrap());
        assert_eq!(db.num_rows("account", Search::All).unwrap(), 1);

        assert!(db
            .replace("account", [("password", "p2")], search)
            .unwrap());
        assert_eq!(db.num_rows("account", Search::All).unwrap(), 1);
        let row = db.select("account").fetch_single().unwrap();
        assert_eq!(row["password"], Value::from("p2"));
        assert!(db.is_connected());
    }

    #[test]
    fn test_replace_inside_caller_transaction() {
        let db = account_db();
        db.begin().unwrap();
        db.replace("account", [("email", "t@x.com")], Search::fields([("email", "t@x.com")]))
            .unwrap();
        db.rollback().unwrap();
        assert_eq!(db.num_rows("account", Search::All).unwrap(), 0);
    }

    #[test]
    fn test_failed_replace_rolls_back() {
        let db = account_db();
        let result = db.replace("account", [("no_such_column", "x")], Search::id(1));
        assert!(matches!(result, Err(SqlqError::Execution(_))));
        assert_eq!(db.transaction_state(), crate::core::db::TransactionState::Autocommit);
    }

    #[test]
    fn test_select_query_helpers() {
        let db = seeded_account_db();
        assert_eq!(db.select_query("SELECT * FROM account").unwrap().len(), 3);
        assert_eq!(
            db.select_query_one("SELECT email FROM account ORDER BY id").unwrap()["email"],
            Value::from("a@x.com")
        );
        assert!(db
            .select_query_one("SELECT * FROM account WHERE id = 0")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_field_exists() {
        let db = account_db();
        assert!(db.field_exists("account", "email").unwrap());
        assert!(!db.field_exists("account", "age").unwrap());
        assert!(!db.field_exists("missing", "email").unwrap());
        assert!(db.field_exists("main.account", "password").unwrap());
    }
}
