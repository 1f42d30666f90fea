use anyhow::{Context, Result};
use sqldeploy_core::discover_migrations;

use crate::cli::ListArgs;

pub fn handle_list_command(args: ListArgs) -> Result<()> {
    let migrations = discover_migrations(&args.source, None)
        .with_context(|| format!("could not discover migrations under {}", args.source.display()))?;

    for migration in &migrations {
        println!("{}  {}", migration.hash(), migration.name());
    }
    println!("{} migration(s)", migrations.len());
    Ok(())
}
