use sqlq::config::{default_config_path, load_config, Config};
use sqlq::{ConnectOptions, Database, Result, SqlqError, StatementType};
use std::path::PathBuf;
use tracing::{info, Level};

const USAGE: &str = "usage: sqlq [--config FILE] [URL] SQL";

/// Command line arguments after `--config` has been pulled out.
struct Args {
    config: Option<PathBuf>,
    url: Option<String>,
    sql: String,
}

fn parse_args(raw: Vec<String>) -> Option<Args> {
    let mut config = None;
    let mut positional = Vec::new();
    let mut iter = raw.into_iter();
    while let Some(arg) = iter.next() {
        if arg == "--config" {
            config = Some(PathBuf::from(iter.next()?));
        } else {
            positional.push(arg);
        }
    }

    match positional.len() {
        1 => Some(Args {
            config,
            url: None,
            sql: positional.remove(0),
        }),
        2 => {
            let sql = positional.remove(1);
            Some(Args {
                config,
                url: Some(positional.remove(0)),
                sql,
            })
        }
        _ => None,
    }
}

fn load_optional_config(args: &Args) -> Result<Option<Config>> {
    match &args.config {
        Some(path) => load_config(path).map(Some),
        None => match default_config_path() {
            Some(path) if path.exists() => load_config(path).map(Some),
            _ => Ok(None),
        },
    }
}

fn run(args: Args, config: Option<Config>) -> Result<()> {
    let options = match (&args.url, config) {
        (Some(url), _) => ConnectOptions::new(url.as_str()),
        (None, Some(config)) => config.database,
        (None, None) => {
            return Err(SqlqError::Config(
                "no URL given and no configuration file found".to_string(),
            ))
        }
    };

    let mut db = Database::new();
    db.connect_or_exit(options)?;

    if StatementType::from_sql(&args.sql).returns_rows() {
        let rows = db.raw(&args.sql).fetch()?;
        for row in &rows {
            println!("{}", serde_json::to_string(row)?);
        }
        info!("{} row(s) returned", rows.len());
    } else {
        let changed = db.raw(&args.sql).exec_count()?;
        println!("{} row(s) affected", changed);
    }
    Ok(())
}

fn main() {
    let Some(args) = parse_args(std::env::args().skip(1).collect()) else {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    };

    let config = match load_optional_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize the logging system using tracing subscriber
    let level = config
        .as_ref()
        .and_then(|c| c.logging.as_ref())
        .and_then(|l| l.level.as_deref())
        .and_then(|l| l.parse::<Level>().ok())
        .unwrap_or(Level::WARN);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(args, config) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args() {
        let args = parse_args(strings(&["sqlite::memory:", "SELECT 1"])).unwrap();
        assert_eq!(args.url.as_deref(), Some("sqlite::memory:"));
        assert_eq!(args.sql, "SELECT 1");

        let args = parse_args(strings(&["--config", "c.toml", "SELECT 1"])).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("c.toml")));
        assert!(args.url.is_none());

        assert!(parse_args(strings(&[])).is_none());
        assert!(parse_args(strings(&["SELECT 1", "--config"])).is_none());
    }
}
