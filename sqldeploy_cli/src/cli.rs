use std::path::PathBuf;

use clap::{ArgEnum, Parser};
use sqldeploy_core::MigrationPhase;

#[derive(Parser)]
#[clap(
    version,
    about = "Applies phased (pre/core/post) SQL schema migrations to SQL Server databases"
)]
pub enum Cli {
    /// List the migrations defined under a source directory
    List(ListArgs),
    /// Apply one or all deployment phases to the configured targets
    Apply(ApplyArgs),
}

#[derive(Parser)]
pub struct ListArgs {
    /// Directory containing the Migrations tree
    #[clap(short, long, default_value = ".")]
    pub source: PathBuf,
}

#[derive(Parser)]
pub struct ApplyArgs {
    /// Deployment manifest location
    #[clap(short, long, default_value = "./sqldeploy.toml")]
    pub config: PathBuf,
    /// Run a single phase instead of the full pre/core/post sequence
    #[clap(short, long, arg_enum)]
    pub phase: Option<PhaseArg>,
    /// Assert that an outage window is in effect, permitting the Core phase
    #[clap(long)]
    pub allow_core: bool,
    /// Plan, validate, and report without executing any SQL
    #[clap(long)]
    pub what_if: bool,
}

#[derive(Clone, Copy, ArgEnum)]
pub enum PhaseArg {
    Pre,
    Core,
    Post,
}

impl From<PhaseArg> for MigrationPhase {
    fn from(phase: PhaseArg) -> MigrationPhase {
        match phase {
            PhaseArg::Pre => MigrationPhase::Pre,
            PhaseArg::Core => MigrationPhase::Core,
            PhaseArg::Post => MigrationPhase::Post,
        }
    }
}
