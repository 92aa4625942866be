use strata_common::{Direction, Error};
use tracing::{error, info};

use crate::definition::MigrationDefinition;

/// Receives per-unit progress while a plan executes.
pub trait RunObserver: Send + Sync {
    fn unit_started(&self, _direction: Direction, _definition: &dyn MigrationDefinition) {}

    fn unit_completed(&self, _direction: Direction, _definition: &dyn MigrationDefinition) {}

    fn unit_skipped(&self, _direction: Direction, _definition: &dyn MigrationDefinition) {}

    fn unit_failed(&self, _direction: Direction, _definition: &dyn MigrationDefinition, _error: &Error) {}
}

/// Reports progress through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl RunObserver for LogObserver {
    fn unit_completed(&self, direction: Direction, definition: &dyn MigrationDefinition) {
        match direction {
            Direction::Up => info!("migration {} ({}) applied", definition.id(), definition.name()),
            Direction::Down => info!("migration {} ({}) rolled back", definition.id(), definition.name()),
        }
    }

    fn unit_skipped(&self, direction: Direction, definition: &dyn MigrationDefinition) {
        info!(
            "migration {} ({}) skipped for {direction}: not permitted",
            definition.id(),
            definition.name()
        );
    }

    fn unit_failed(&self, direction: Direction, definition: &dyn MigrationDefinition, err: &Error) {
        error!(
            "migration {} ({}) failed going {direction}: {err}",
            definition.id(),
            definition.name()
        );
    }
}
