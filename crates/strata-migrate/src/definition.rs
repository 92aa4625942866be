use std::sync::Arc;

use strata_common::{MigrationId, Result};
use strata_db::SqlExecutor;

/// A versioned schema change with its inverse.
///
/// Hooks default to no-ops. A failing hook aborts the unit exactly like a
/// failing action does.
pub trait MigrationDefinition: Send + Sync {
    fn id(&self) -> MigrationId;

    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn apply(&self, sql: &dyn SqlExecutor) -> Result<()>;

    fn revert(&self, sql: &dyn SqlExecutor) -> Result<()>;

    fn before_apply(&self, _sql: &dyn SqlExecutor) -> Result<()> {
        Ok(())
    }

    fn after_apply(&self, _sql: &dyn SqlExecutor) -> Result<()> {
        Ok(())
    }

    fn before_revert(&self, _sql: &dyn SqlExecutor) -> Result<()> {
        Ok(())
    }

    fn after_revert(&self, _sql: &dyn SqlExecutor) -> Result<()> {
        Ok(())
    }
}

pub type SharedDefinition = Arc<dyn MigrationDefinition>;
