use std::fmt;

use strata_common::{Direction, MigrationId};

use crate::definition::SharedDefinition;

/// Ordered work list for one run: ascending ids going up, descending going down.
///
/// Plans are only built by the runner, so the ordering always holds.
#[derive(Clone)]
pub struct Plan {
    direction: Direction,
    units: Vec<SharedDefinition>,
}

impl Plan {
    pub(crate) fn new(direction: Direction, units: Vec<SharedDefinition>) -> Self {
        Self { direction, units }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn units(&self) -> &[SharedDefinition] {
        &self.units
    }

    pub fn ids(&self) -> Vec<MigrationId> {
        self.units.iter().map(|u| u.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl PartialEq for Plan {
    fn eq(&self, other: &Self) -> bool {
        self.direction == other.direction && self.ids() == other.ids()
    }
}

impl fmt::Debug for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plan")
            .field("direction", &self.direction)
            .field("ids", &self.ids())
            .finish()
    }
}
