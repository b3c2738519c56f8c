use crate::core::{Result, SqlqError};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level configuration structure parsed from a TOML file.
#[derive(Debug, Deserialize)]
pub struct Config {
    pub database: ConnectOptions,
    pub logging: Option<LoggingConfig>,
}

/// Logging configuration for the `sqlq` binary.
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// One of `trace`, `debug`, `info`, `warn`, `error`
    pub level: Option<String>,
}

/// Options recognized by `Database::connect`.
///
/// Only `url` is required. Credentials, persistence and the SSL keys are
/// accepted for every backend but only consumed by backends that use them.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ConnectOptions {
    /// Backend connection string, e.g. `sqlite::memory:` or `sqlite:app.db`
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Statement run once right after the connection opens
    pub db_init: Option<String>,
    /// Report connection failures to the caller instead of terminating
    #[serde(default)]
    pub dont_die: bool,
    #[serde(default = "default_persistent")]
    pub persistent: bool,
    #[serde(default)]
    pub mysql_ssl: bool,
    pub ssl_key: Option<String>,
    pub ssl_cert: Option<String>,
    pub ssl_ca: Option<String>,
}

fn default_persistent() -> bool {
    true
}

impl ConnectOptions {
    /// Creates options for `url` with every other key at its default.
    pub fn new(url: impl Into<String>) -> Self {
        ConnectOptions {
            url: url.into(),
            username: None,
            password: None,
            db_init: None,
            dont_die: false,
            persistent: true,
            mysql_ssl: false,
            ssl_key: None,
            ssl_cert: None,
            ssl_ca: None,
        }
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self
    }

    pub fn with_db_init(mut self, sql: &str) -> Self {
        self.db_init = Some(sql.to_string());
        self
    }

    pub fn dont_die(mut self) -> Self {
        self.dont_die = true;
        self
    }
}

/// Loads configuration from a TOML file at the given path.
///
/// # Example
///
/// ```no_run
/// let config = sqlq::config::load_config("config.toml").expect("Failed to load config");
/// println!("{:?}", config.database.url);
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    if config.database.url.trim().is_empty() {
        return Err(SqlqError::Config("database.url must not be empty".to_string()));
    }
    Ok(config)
}

/// Default configuration file location, `<config dir>/sqlq/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("sqlq").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE_CONFIG: &str = r#"
[database]
url = "sqlite::memory:"
username = "app"
password = "secret"
db_init = "PRAGMA foreign_keys = ON"
dont_die = true

[logging]
level = "debug"
"#;

    #[test]
    fn test_load_config_from_str() {
        let config: Config = toml::from_str(SAMPLE_CONFIG).expect("Failed to parse sample config");
        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.database.username.as_deref(), Some("app"));
        assert_eq!(config.database.db_init.as_deref(), Some("PRAGMA foreign_keys = ON"));
        assert!(config.database.dont_die);
        assert!(config.database.persistent);
        assert!(!config.database.mysql_ssl);
        assert_eq!(config.logging.unwrap().level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE_CONFIG.as_bytes()).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.database, ConnectOptions::new("sqlite::memory:")
            .with_credentials("app", "secret")
            .with_db_init("PRAGMA foreign_keys = ON")
            .dont_die());
    }

    #[test]
    fn test_load_config_rejects_empty_url() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[database]\nurl = \"  \"\n").unwrap();

        match load_config(file.path()) {
            Err(SqlqError::Config(msg)) => assert!(msg.contains("url")),
            other => panic!("Expected Config error, got {:?}", other),
        }
    }

    #[test]
    fn test_load_config_missing_file() {
        match load_config("/nonexistent/sqlq/config.toml") {
            Err(SqlqError::Io(_)) => {}
            other => panic!("Expected Io error, got {:?}", other),
        }
    }
}
