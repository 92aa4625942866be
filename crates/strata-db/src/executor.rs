use rusqlite::OptionalExtension;
use strata_common::{Error, Result};
use tracing::debug;

use crate::database::Database;

/// The SQL execution primitive migration bodies run against.
///
/// An executor is bound to a single target database when it is constructed.
pub trait SqlExecutor: Send + Sync {
    /// Execute one or more `;`-separated statements.
    fn execute(&self, statement: &str) -> Result<()>;

    /// Whether `query` yields at least one row. Meant for precondition hooks.
    fn query_exists(&self, query: &str) -> Result<bool>;

    fn begin(&self) -> Result<()> {
        self.execute("BEGIN")
    }

    fn commit(&self) -> Result<()> {
        self.execute("COMMIT")
    }

    fn rollback(&self) -> Result<()> {
        self.execute("ROLLBACK")
    }
}

impl SqlExecutor for Database {
    fn execute(&self, statement: &str) -> Result<()> {
        let conn = self.connection()?;
        debug!("executing sql: {}", first_line(statement));
        conn.execute_batch(statement)
            .map_err(|e| Error::Execution(e.to_string()))
    }

    fn query_exists(&self, query: &str) -> Result<bool> {
        let conn = self.connection()?;
        let row = conn
            .query_row(query, [], |_| Ok(()))
            .optional()
            .map_err(|e| Error::Execution(e.to_string()))?;
        Ok(row.is_some())
    }
}

fn first_line(statement: &str) -> &str {
    statement
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("")
}
