use thiserror::Error;

use crate::types::{MigrationId, Step};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("discovery error in {path}: {message}")]
    Discovery { path: String, message: String },

    #[error("invalid migration definition '{artifact}': {message}")]
    Definition { artifact: String, message: String },

    #[error("migration {id} is already recorded in the ledger")]
    DuplicateEntry { id: MigrationId },

    #[error("migration {id} is not recorded in the ledger")]
    NotFound { id: MigrationId },

    #[error("migration {id} ({name}) is recorded in the ledger but has no definition")]
    OrphanedEntry { id: MigrationId, name: String },

    #[error("migration {id} ({name}) failed during {step}: {message}")]
    Action {
        id: MigrationId,
        name: String,
        step: Step,
        message: String,
    },

    #[error("execution error: {0}")]
    Execution(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("migration lock held by {holder} since {acquired_at}")]
    LockUnavailable { holder: String, acquired_at: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// The migration a failure is attributed to, if any.
    pub fn migration_id(&self) -> Option<MigrationId> {
        match self {
            Error::DuplicateEntry { id }
            | Error::NotFound { id }
            | Error::OrphanedEntry { id, .. }
            | Error::Action { id, .. } => Some(*id),
            _ => None,
        }
    }
}
