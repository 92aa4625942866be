//! Migration ledger orchestration.
//!
//! Definitions come from a [`MigrationSource`], applied state lives in a
//! [`strata_db::MigrationLedger`], and the [`Runner`] drives the per-unit
//! protocol in id order, halting on the first failure.

pub mod auth;
pub mod definition;
pub mod naming;
pub mod observer;
pub mod plan;
pub mod runner;
pub mod source;
pub mod sql;

pub use auth::{AllowAll, Authorization, ExcludeIds};
pub use definition::{MigrationDefinition, SharedDefinition};
pub use observer::{LogObserver, RunObserver};
pub use plan::Plan;
pub use runner::{RunReport, Runner};
pub use source::{CompositeSource, DirectorySource, MigrationSource, Registry};
pub use sql::SqlMigration;
