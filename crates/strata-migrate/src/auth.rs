use std::collections::BTreeSet;

use strata_common::{Direction, MigrationId};

use crate::definition::MigrationDefinition;

/// Decides whether a unit may run in the current environment.
///
/// A refusal skips the unit: it is neither run nor recorded, and the plan
/// continues with the next unit.
pub trait Authorization: Send + Sync {
    fn permits(&self, definition: &dyn MigrationDefinition, direction: Direction) -> bool;
}

/// Permits every unit.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authorization for AllowAll {
    fn permits(&self, _definition: &dyn MigrationDefinition, _direction: Direction) -> bool {
        true
    }
}

impl<F> Authorization for F
where
    F: Fn(&dyn MigrationDefinition, Direction) -> bool + Send + Sync,
{
    fn permits(&self, definition: &dyn MigrationDefinition, direction: Direction) -> bool {
        self(definition, direction)
    }
}

/// Refuses a fixed set of ids in both directions.
#[derive(Debug, Clone, Default)]
pub struct ExcludeIds {
    excluded: BTreeSet<MigrationId>,
}

impl ExcludeIds {
    pub fn new(ids: impl IntoIterator<Item = MigrationId>) -> Self {
        Self {
            excluded: ids.into_iter().collect(),
        }
    }
}

impl Authorization for ExcludeIds {
    fn permits(&self, definition: &dyn MigrationDefinition, _direction: Direction) -> bool {
        !self.excluded.contains(&definition.id())
    }
}
