use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{ErrorCode, params, params_from_iter};
use serde::{Deserialize, Serialize};
use strata_common::{Error, MigrationId, Result, is_sql_identifier};
use tracing::{debug, info};

use crate::database::{Database, format_datetime, parse_datetime};

/// A migration recorded as applied.
///
/// `name` and `description` are copied from the definition when it ran, so
/// later edits to the migration file never rewrite history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: MigrationId,
    pub applied_at: DateTime<Utc>,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LedgerOrder {
    #[default]
    IdAscending,
    IdDescending,
    AppliedAtDescending,
}

/// Filter for [`MigrationLedger::list_applied`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerQuery {
    /// Only entries with an id strictly greater than this.
    pub above: Option<MigrationId>,
    pub limit: Option<usize>,
    /// Only entries applied at or after this instant.
    pub since: Option<DateTime<Utc>>,
    pub order: LedgerOrder,
}

impl LedgerQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn above(mut self, id: Option<MigrationId>) -> Self {
        self.above = id;
        self
    }

    pub fn limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn since(mut self, since: Option<DateTime<Utc>>) -> Self {
        self.since = since;
        self
    }

    pub fn order(mut self, order: LedgerOrder) -> Self {
        self.order = order;
        self
    }
}

/// Durable record of applied migrations. Each call is atomic on its own.
pub trait MigrationLedger: Send + Sync {
    fn list_applied(&self, query: &LedgerQuery) -> Result<Vec<LedgerEntry>>;

    /// Fails with `DuplicateEntry` rather than overwriting.
    fn record_applied(&self, entry: &LedgerEntry) -> Result<()>;

    /// Fails with `NotFound` if the id is not recorded.
    fn remove_applied(&self, id: MigrationId) -> Result<()>;

    fn applied_ids(&self) -> Result<BTreeSet<MigrationId>> {
        Ok(self
            .list_applied(&LedgerQuery::new())?
            .into_iter()
            .map(|e| e.id)
            .collect())
    }
}

/// Ledger kept in a table of the target SQLite database.
pub struct SqliteLedger {
    db: Arc<Database>,
    table: String,
}

impl SqliteLedger {
    pub fn new(db: Arc<Database>, table: &str) -> Result<Self> {
        if !is_sql_identifier(table) {
            return Err(Error::Config(format!(
                "invalid ledger table name '{table}'"
            )));
        }
        Ok(Self {
            db,
            table: table.to_string(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the ledger table. Safe to call on an installed ledger.
    pub fn install(&self) -> Result<()> {
        let conn = self.db.connection()?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT ''
            );

            CREATE INDEX IF NOT EXISTS idx_{table}_applied_at
                ON {table}(applied_at);",
            table = self.table
        ))
        .map_err(|e| Error::Database(format!("failed to install ledger: {e}")))?;

        info!("ledger table '{}' installed", self.table);
        Ok(())
    }

    /// Drop the ledger table and its lease table.
    pub fn uninstall(&self) -> Result<()> {
        let conn = self.db.connection()?;
        conn.execute_batch(&format!(
            "DROP TABLE IF EXISTS {table};
             DROP TABLE IF EXISTS {table}_lease;",
            table = self.table
        ))
        .map_err(|e| Error::Database(format!("failed to uninstall ledger: {e}")))?;

        info!("ledger table '{}' dropped", self.table);
        Ok(())
    }

    pub fn is_installed(&self) -> Result<bool> {
        self.db.table_exists(&self.table)
    }
}

impl MigrationLedger for SqliteLedger {
    fn list_applied(&self, query: &LedgerQuery) -> Result<Vec<LedgerEntry>> {
        let mut sql = format!(
            "SELECT id, applied_at, name, description FROM {}",
            self.table
        );
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(above) = query.above {
            clauses.push("id > ?");
            values.push(Value::Integer(above.to_sql()?));
        }
        // julianday() so rows stored as "YYYY-MM-DD HH:MM:SS" compare by instant
        if let Some(since) = &query.since {
            clauses.push("julianday(applied_at) >= julianday(?)");
            values.push(Value::Text(format_datetime(since)));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        sql.push_str(match query.order {
            LedgerOrder::IdAscending => " ORDER BY id ASC",
            LedgerOrder::IdDescending => " ORDER BY id DESC",
            LedgerOrder::AppliedAtDescending => " ORDER BY julianday(applied_at) DESC, id DESC",
        });

        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            values.push(Value::Integer(limit.min(i64::MAX as usize) as i64));
        }

        let conn = self.db.connection()?;
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| Error::Database(format!("failed to prepare ledger query: {e}")))?;

        let rows = stmt
            .query_map(params_from_iter(values), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(|e| Error::Database(format!("failed to query ledger: {e}")))?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, applied_at, name, description) =
                row.map_err(|e| Error::Database(format!("failed to read ledger row: {e}")))?;
            entries.push(LedgerEntry {
                id: MigrationId::from_sql(id)?,
                applied_at: parse_datetime(&applied_at)?,
                name,
                description,
            });
        }
        Ok(entries)
    }

    fn record_applied(&self, entry: &LedgerEntry) -> Result<()> {
        let conn = self.db.connection()?;
        conn.execute(
            &format!(
                "INSERT INTO {} (id, applied_at, name, description) VALUES (?1, ?2, ?3, ?4)",
                self.table
            ),
            params![
                entry.id.to_sql()?,
                format_datetime(&entry.applied_at),
                entry.name,
                entry.description
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
                Error::DuplicateEntry { id: entry.id }
            }
            other => Error::Database(format!("failed to record migration {}: {other}", entry.id)),
        })?;

        debug!("ledger: recorded migration {}", entry.id);
        Ok(())
    }

    fn remove_applied(&self, id: MigrationId) -> Result<()> {
        let conn = self.db.connection()?;
        let removed = conn
            .execute(
                &format!("DELETE FROM {} WHERE id = ?1", self.table),
                params![id.to_sql()?],
            )
            .map_err(|e| Error::Database(format!("failed to remove migration {id}: {e}")))?;

        if removed == 0 {
            return Err(Error::NotFound { id });
        }

        debug!("ledger: removed migration {id}");
        Ok(())
    }
}
