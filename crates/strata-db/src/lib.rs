pub mod database;
pub mod executor;
pub mod ledger;
pub mod lock;

pub use database::Database;
pub use executor::SqlExecutor;
pub use ledger::{LedgerEntry, LedgerOrder, LedgerQuery, MigrationLedger, SqliteLedger};
pub use lock::{Lease, LeaseLock, RunLock};
