/// # Test Utilities Module
///
/// Database fixtures shared by the unit tests. Every fixture is an isolated
/// in-memory database, so tests can run in parallel.

use crate::config::ConnectOptions;
use crate::core::db::Database;

const ACCOUNT_TABLE_SQL: &str = r#"
CREATE TABLE account (
    id INTEGER PRIMARY KEY,
    email TEXT,
    password TEXT
)"#;

/// A connected in-memory database holding an empty `account` table.
pub fn account_db() -> Database {
    let options = ConnectOptions::new("sqlite::memory:").with_db_init(ACCOUNT_TABLE_SQL);
    Database::open(options).expect("in-memory database should open")
}

/// `account_db` with three rows, ids 1 to 3.
pub fn seeded_account_db() -> Database {
    let db = account_db();
    for (email, password) in [("a@x.com", "p1"), ("b@x.com", "p2"), ("c@x.com", "p3")] {
        db.insert("account")
            .values([("email", email), ("password", password)])
            .exec()
            .expect("seed insert should succeed");
    }
    db
}
