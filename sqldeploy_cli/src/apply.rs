use anyhow::{Context, Result};
use sqldeploy_core::config::Config;
use sqldeploy_core::{MigrationSession, SessionOptions, TiberiusConnector};

use crate::cli::ApplyArgs;

pub fn handle_apply_command(args: ApplyArgs) -> Result<()> {
    let config = Config::from_file_location(&args.config)
        .context("could not parse the deployment manifest")?;

    let runtime = tokio::runtime::Runtime::new().context("could not start the async runtime")?;
    runtime.block_on(run(config, args))
}

async fn run(config: Config, args: ApplyArgs) -> Result<()> {
    let sets = config.parallel_sets();
    let session = MigrationSession::new(
        TiberiusConnector,
        SessionOptions {
            source: config.source().to_path_buf(),
            log_dir: config.log_dir(),
            allow_core_phase: args.allow_core,
            what_if: args.what_if,
        },
    )?;

    let token = session.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("cancellation requested; stopping at the next safe point");
            token.cancel();
        }
    });

    match args.phase {
        Some(phase) => session.run_phase(phase.into(), &sets).await?,
        None => session.run(&sets).await?,
    }
    Ok(())
}
