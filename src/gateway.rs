//! Serialized SQL access to the advised database.
//!
//! One connection is held for the process lifetime and every statement the
//! tool issues flows through it. The extended query protocol is used for
//! everything except `CREATE INDEX CONCURRENTLY`, which goes over the simple
//! protocol so it is never prepared.

use parking_lot::Mutex;
use postgres::error::SqlState;
use postgres::types::ToSql;
use postgres::{Client, NoTls, Row};
use serde_json::Value;
use tracing::info;

use crate::error::{Error, Result};
use crate::options::Options;

pub struct SqlGateway {
    client: Mutex<Client>,
    log_sql: bool,
}

impl SqlGateway {
    /// Connects and prepares the session: bounded DDL waits, quiet notices,
    /// and the HypoPG extension loaded.
    pub fn connect(options: &Options) -> Result<SqlGateway> {
        let config = options.target.to_config(
            options.host.as_deref(),
            options.port,
            options.user.as_deref(),
        )?;
        let client = config.connect(NoTls).map_err(Error::Connection)?;
        let gateway = SqlGateway {
            client: Mutex::new(client),
            log_sql: options.log_sql,
        };
        gateway.setup_session()?;
        Ok(gateway)
    }

    fn setup_session(&self) -> Result<()> {
        self.exec(&format!("SET lock_timeout = {}", quote_literal("5s")), &[])?;
        self.exec(
            &format!("SET client_min_messages = {}", quote_literal("warning")),
            &[],
        )?;
        self.ensure_hypopg()
    }

    fn ensure_hypopg(&self) -> Result<()> {
        match self.exec("CREATE EXTENSION IF NOT EXISTS hypopg", &[]) {
            Ok(_) => Ok(()),
            Err(Error::Database(err)) => {
                if let Some(db_err) = err.as_db_error() {
                    if db_err
                        .message()
                        .contains("could not open extension control file")
                    {
                        return Err(Error::HypopgMissing);
                    }
                    if db_err.code() == &SqlState::INSUFFICIENT_PRIVILEGE {
                        return Err(Error::HypopgPrivilege);
                    }
                }
                Err(Error::Database(err))
            }
            Err(err) => Err(err),
        }
    }

    /// Runs one parameterized statement and returns its rows. The extended
    /// query protocol accepts a single command per call.
    pub fn exec(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Vec<Row>> {
        self.echo(sql);
        Ok(self.client.lock().query(sql, params)?)
    }

    /// Runs one statement over the simple query protocol. Used for DDL that
    /// must not run as a prepared statement.
    pub fn exec_simple(&self, sql: &str) -> Result<()> {
        self.echo(sql);
        self.client.lock().batch_execute(sql)?;
        Ok(())
    }

    /// `EXPLAIN (FORMAT JSON)` for a statement. Semicolons are stripped from
    /// the target so a multi-statement payload cannot ride along.
    pub fn explain(&self, statement: &str) -> Result<Value> {
        let target = statement.replace(';', "");
        let rows = self.exec(&format!("EXPLAIN (FORMAT JSON) {}", target), &[])?;
        let row = rows
            .first()
            .ok_or_else(|| Error::UnexpectedResponse("EXPLAIN returned no rows".to_string()))?;
        Ok(row.try_get(0)?)
    }

    fn echo(&self, sql: &str) {
        if self.log_sql {
            info!("SQL: {}", sql);
        }
    }
}

/// Double-quotes an identifier, doubling any embedded double quote.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Strips the double quotes `quote_identifier` adds. Identifiers that were
/// never quoted pass through unchanged.
pub fn unquote_identifier(name: &str) -> String {
    if name.len() >= 2 && name.starts_with('"') && name.ends_with('"') {
        name[1..name.len() - 1].replace("\"\"", "\"")
    } else {
        name.to_string()
    }
}

/// Single-quotes a literal value, doubling quotes and backslashes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}
