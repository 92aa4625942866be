use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, TransactionBehavior, params};
use strata_common::{Error, Result, is_sql_identifier};
use tracing::{debug, info, warn};

use crate::database::{Database, format_datetime, parse_datetime};

/// Mutual exclusion between runner invocations against one target.
pub trait RunLock: Send + Sync {
    /// Take the lock for `holder`, failing with `LockUnavailable` if someone
    /// else holds a live lease.
    fn acquire(&self, holder: &str) -> Result<()>;

    /// Restart the staleness clock of a lease `holder` already owns.
    fn refresh(&self, holder: &str) -> Result<()>;

    fn release(&self, holder: &str) -> Result<()>;
}

/// Current lease row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
}

/// Advisory lock stored as a single row in `<ledger table>_lease`.
pub struct LeaseLock {
    db: Arc<Database>,
    table: String,
    stale_after: Duration,
}

impl LeaseLock {
    pub fn new(db: Arc<Database>, ledger_table: &str, stale_after: Duration) -> Result<Self> {
        if !is_sql_identifier(ledger_table) {
            return Err(Error::Config(format!(
                "invalid ledger table name '{ledger_table}'"
            )));
        }
        Ok(Self {
            db,
            table: format!("{ledger_table}_lease"),
            stale_after,
        })
    }

    fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                slot INTEGER PRIMARY KEY CHECK (slot = 1),
                holder TEXT NOT NULL,
                acquired_at TEXT NOT NULL
            );",
            self.table
        )
    }

    /// The lease currently held, if any.
    pub fn current(&self) -> Result<Option<Lease>> {
        if !self.db.table_exists(&self.table)? {
            return Ok(None);
        }
        let conn = self.db.connection()?;
        let row = conn
            .query_row(
                &format!("SELECT holder, acquired_at FROM {} WHERE slot = 1", self.table),
                [],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to read lease: {e}")))?;

        row.map(|(holder, acquired_at)| {
            Ok(Lease {
                holder,
                acquired_at: parse_datetime(&acquired_at)?,
            })
        })
        .transpose()
    }

    fn is_stale(&self, lease: &Lease, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(lease.acquired_at);
        age.to_std().map(|age| age >= self.stale_after).unwrap_or(false)
    }
}

impl RunLock for LeaseLock {
    fn acquire(&self, holder: &str) -> Result<()> {
        let mut conn = self.db.connection()?;
        conn.execute_batch(&self.create_table_sql())
            .map_err(|e| Error::Database(format!("failed to create lease table: {e}")))?;

        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| Error::Database(format!("failed to begin lease transaction: {e}")))?;

        let existing = tx
            .query_row(
                &format!("SELECT holder, acquired_at FROM {} WHERE slot = 1", self.table),
                [],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to read lease: {e}")))?;

        let now = Utc::now();
        if let Some((current_holder, acquired_at)) = existing {
            let lease = Lease {
                holder: current_holder,
                acquired_at: parse_datetime(&acquired_at)?,
            };
            if lease.holder != holder {
                if !self.is_stale(&lease, now) {
                    return Err(Error::LockUnavailable {
                        holder: lease.holder,
                        acquired_at: format_datetime(&lease.acquired_at),
                    });
                }
                warn!(
                    "taking over stale migration lease held by {} since {}",
                    lease.holder,
                    format_datetime(&lease.acquired_at)
                );
            }
        }

        tx.execute(
            &format!(
                "INSERT OR REPLACE INTO {} (slot, holder, acquired_at) VALUES (1, ?1, ?2)",
                self.table
            ),
            params![holder, format_datetime(&now)],
        )
        .map_err(|e| Error::Database(format!("failed to write lease: {e}")))?;

        tx.commit()
            .map_err(|e| Error::Database(format!("failed to commit lease: {e}")))?;

        info!("migration lease acquired by {holder}");
        Ok(())
    }

    fn refresh(&self, holder: &str) -> Result<()> {
        let updated = {
            let conn = self.db.connection()?;
            conn.execute(
                &format!(
                    "UPDATE {} SET acquired_at = ?1 WHERE slot = 1 AND holder = ?2",
                    self.table
                ),
                params![format_datetime(&Utc::now()), holder],
            )
            .map_err(|e| Error::Database(format!("failed to refresh lease: {e}")))?
        };
        if updated > 0 {
            debug!("migration lease refreshed by {holder}");
            return Ok(());
        }

        match self.current()? {
            Some(lease) => Err(Error::LockUnavailable {
                holder: lease.holder,
                acquired_at: format_datetime(&lease.acquired_at),
            }),
            None => Err(Error::Database(format!(
                "migration lease is not held by {holder}"
            ))),
        }
    }

    fn release(&self, holder: &str) -> Result<()> {
        let conn = self.db.connection()?;
        let removed = conn
            .execute(
                &format!("DELETE FROM {} WHERE slot = 1 AND holder = ?1", self.table),
                params![holder],
            )
            .map_err(|e| Error::Database(format!("failed to release lease: {e}")))?;

        if removed == 0 {
            return Err(Error::Database(format!(
                "migration lease is not held by {holder}"
            )));
        }

        info!("migration lease released by {holder}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock(stale_after: Duration) -> LeaseLock {
        LeaseLock::new(Arc::new(Database::in_memory().unwrap()), "migrations", stale_after).unwrap()
    }

    #[test]
    fn acquire_then_release() {
        let lock = lock(Duration::from_secs(60));
        assert!(lock.current().unwrap().is_none());

        lock.acquire("runner-a").unwrap();
        assert_eq!(lock.current().unwrap().unwrap().holder, "runner-a");

        lock.release("runner-a").unwrap();
        assert!(lock.current().unwrap().is_none());
    }

    #[test]
    fn live_lease_blocks_other_holders() {
        let lock = lock(Duration::from_secs(60));
        lock.acquire("runner-a").unwrap();

        let err = lock.acquire("runner-b").unwrap_err();
        assert!(matches!(err, Error::LockUnavailable { ref holder, .. } if holder == "runner-a"));

        // the holder itself may refresh
        lock.acquire("runner-a").unwrap();
    }

    #[test]
    fn stale_lease_is_taken_over() {
        let lock = lock(Duration::from_secs(60));
        {
            let conn = lock.db.connection().unwrap();
            conn.execute_batch(&lock.create_table_sql()).unwrap();
            conn.execute(
                "INSERT INTO migrations_lease (slot, holder, acquired_at) VALUES (1, 'crashed', ?1)",
                params![format_datetime(&(Utc::now() - chrono::Duration::hours(2)))],
            )
            .unwrap();
        }

        lock.acquire("runner-b").unwrap();
        assert_eq!(lock.current().unwrap().unwrap().holder, "runner-b");
    }

    fn backdate(lock: &LeaseLock, by: chrono::Duration) {
        let conn = lock.db.connection().unwrap();
        conn.execute(
            "UPDATE migrations_lease SET acquired_at = ?1 WHERE slot = 1",
            params![format_datetime(&(Utc::now() - by))],
        )
        .unwrap();
    }

    #[test]
    fn refresh_keeps_a_long_run_from_going_stale() {
        let lock = lock(Duration::from_secs(60));
        lock.acquire("runner-a").unwrap();
        backdate(&lock, chrono::Duration::minutes(5));

        lock.refresh("runner-a").unwrap();
        let lease = lock.current().unwrap().unwrap();
        assert!(Utc::now().signed_duration_since(lease.acquired_at) < chrono::Duration::minutes(1));

        let err = lock.acquire("runner-b").unwrap_err();
        assert!(matches!(err, Error::LockUnavailable { ref holder, .. } if holder == "runner-a"));
    }

    #[test]
    fn refresh_fails_once_the_lease_is_taken_over() {
        let lock = lock(Duration::from_secs(60));
        lock.acquire("runner-a").unwrap();
        backdate(&lock, chrono::Duration::minutes(5));
        lock.acquire("runner-b").unwrap();

        let err = lock.refresh("runner-a").unwrap_err();
        assert!(matches!(err, Error::LockUnavailable { ref holder, .. } if holder == "runner-b"));

        lock.release("runner-b").unwrap();
        assert!(matches!(lock.refresh("runner-a"), Err(Error::Database(_))));
    }

    #[test]
    fn release_by_non_holder_fails() {
        let lock = lock(Duration::from_secs(60));
        lock.acquire("runner-a").unwrap();
        assert!(lock.release("runner-b").is_err());
        assert_eq!(lock.current().unwrap().unwrap().holder, "runner-a");
    }
}
