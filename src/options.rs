//! Runtime configuration assembled from the command line.

use std::str::FromStr;

use crate::error::{Error, Result};

/// Output verbosity ladder. `Error` suppresses advisory output entirely;
/// the `Debug*` levels progressively widen the per-query diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Error,
    #[default]
    Info,
    Debug,
    Debug2,
    Debug3,
}

impl LogLevel {
    /// Directive used to seed the tracing filter for this level.
    pub fn tracing_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Info => "info",
            LogLevel::Debug | LogLevel::Debug2 | LogLevel::Debug3 => "debug",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "debug2" => Ok(LogLevel::Debug2),
            "debug3" => Ok(LogLevel::Debug3),
            _ => Err(format!(
                "invalid log level: {}. Use info, debug, debug2, debug3, or error.",
                s
            )),
        }
    }
}

/// The `--dbname` argument is a tagged sum: a URI, a key=value connection
/// string, or a bare database name. Classified eagerly so the driver config
/// is built from a known shape instead of string-sniffing at connect time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbTarget {
    Uri(String),
    ConnString(String),
    Database(String),
}

impl DbTarget {
    pub fn parse(raw: &str) -> DbTarget {
        if raw.starts_with("postgres://") || raw.starts_with("postgresql://") {
            DbTarget::Uri(raw.to_string())
        } else if raw.contains('=') {
            DbTarget::ConnString(raw.to_string())
        } else {
            DbTarget::Database(raw.to_string())
        }
    }

    /// Builds the driver configuration, merging in the host/port/user flags
    /// wherever the target itself leaves the field unset.
    pub fn to_config(
        &self,
        host: Option<&str>,
        port: Option<u16>,
        user: Option<&str>,
    ) -> Result<postgres::Config> {
        let mut config = match self {
            DbTarget::Uri(raw) | DbTarget::ConnString(raw) => raw
                .parse::<postgres::Config>()
                .map_err(|e| Error::Config(format!("invalid connection target: {}", e)))?,
            DbTarget::Database(name) => {
                let mut config = postgres::Config::new();
                config.dbname(name);
                config
            }
        };
        if config.get_hosts().is_empty() {
            config.host(host.unwrap_or("localhost"));
        }
        if config.get_ports().is_empty() {
            config.port(port.unwrap_or(5432));
        }
        if config.get_user().is_none() {
            match user {
                Some(user) => {
                    config.user(user);
                }
                None => {
                    if let Ok(user) = std::env::var("USER") {
                        config.user(&user);
                    }
                }
            }
        }
        Ok(config)
    }
}

/// Everything the advisor needs to run, assembled once in `main`.
#[derive(Debug, Clone)]
pub struct Options {
    pub target: DbTarget,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    /// Evaluate this single statement, then exit.
    pub statement: Option<String>,
    /// Files to evaluate, one batch each.
    pub files: Vec<String>,
    /// Create accepted indexes instead of only reporting them.
    pub create: bool,
    /// Seconds between batches on a streaming source.
    pub interval: u64,
    /// Minimum accumulated time, in minutes, for a query to be considered.
    pub min_time_minutes: f64,
    /// Restrict analysis to these tables when set.
    pub include: Option<Vec<String>>,
    /// Tables never to index.
    pub exclude: Vec<String>,
    pub log_level: LogLevel,
    /// Echo every SQL statement issued by the gateway.
    pub log_sql: bool,
    /// Read the workload from pg_stat_statements instead of stdin.
    pub use_stat_statements: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            target: DbTarget::Database(String::new()),
            host: None,
            port: None,
            user: None,
            statement: None,
            files: Vec::new(),
            create: false,
            interval: 60,
            min_time_minutes: 0.0,
            include: None,
            exclude: Vec::new(),
            log_level: LogLevel::default(),
            log_sql: false,
            use_stat_statements: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_target_classification() {
        assert_eq!(
            DbTarget::parse("postgres://u@h/db"),
            DbTarget::Uri("postgres://u@h/db".to_string())
        );
        assert_eq!(
            DbTarget::parse("postgresql://h/db"),
            DbTarget::Uri("postgresql://h/db".to_string())
        );
        assert_eq!(
            DbTarget::parse("host=localhost dbname=db"),
            DbTarget::ConnString("host=localhost dbname=db".to_string())
        );
        assert_eq!(
            DbTarget::parse("movies"),
            DbTarget::Database("movies".to_string())
        );
    }

    #[test]
    fn test_bare_database_config_uses_flags() {
        let target = DbTarget::parse("movies");
        let config = target
            .to_config(Some("db.internal"), Some(5433), Some("advisor"))
            .unwrap();
        assert_eq!(config.get_dbname(), Some("movies"));
        assert_eq!(config.get_ports(), &[5433]);
        assert_eq!(config.get_user(), Some("advisor"));
    }

    #[test]
    fn test_conn_string_wins_over_flags() {
        let target = DbTarget::parse("host=db1 user=owner dbname=movies");
        let config = target
            .to_config(Some("ignored"), None, Some("ignored"))
            .unwrap();
        assert_eq!(config.get_dbname(), Some("movies"));
        assert_eq!(config.get_user(), Some("owner"));
    }

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Error < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Debug2);
        assert!(LogLevel::Debug2 < LogLevel::Debug3);
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!("debug2".parse::<LogLevel>().unwrap(), LogLevel::Debug2);
        assert_eq!("INFO".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert!("verbose".parse::<LogLevel>().is_err());
    }
}
