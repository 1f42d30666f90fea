mod apply;
#[cfg(feature = "config")]
pub mod config;
mod discover;
mod drivers;
pub mod error;
mod executor;
mod loader;
mod merge;
mod migration;
mod plan;
mod preprocess;
mod registry;
mod report;
mod session;
mod validate;

pub use crate::apply::{ApplyOutcome, MigrationApplicator};
pub use crate::discover::{discover_migrations, SourceMigration, MAIN_SCRIPT, MIGRATIONS_DIR};
pub use crate::error::Error;
pub use crate::executor::{AsyncExecutor, AsyncQueryRegistry, Connect};
pub use crate::loader::{LoadedContent, PhaseContent};
pub use crate::merge::{merge_migrations, resolve_references};
pub use crate::migration::{
    compare_names, eq_ignore_case, Diagnostic, Migration, MigrationContent, MigrationPhase,
    MigrationReference, MigrationState, BEGIN_PSEUDO_MIGRATION, END_PSEUDO_MIGRATION,
};
pub use crate::plan::{plan_migrations, MigrationPlan, PlanEntry};
pub use crate::registry::{applied_migrations_query, REGISTRY_TABLE_DDL};
pub use crate::report::TargetLog;
pub use crate::session::{MigrationSession, ParallelSet, SessionOptions, Target};
pub use crate::validate::validate_migrations;

#[cfg(feature = "tiberius")]
pub use tiberius;

#[cfg(feature = "tiberius-config")]
pub use crate::drivers::tiberius::TiberiusConnector;
