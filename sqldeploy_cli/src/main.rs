//! Main entry point for the sqldeploy cli tool

mod apply;
mod cli;
mod list;

use anyhow::Error;
use clap::Parser;
use env_logger::{Builder, Target};
use log::LevelFilter;
use std::io::Write;

use cli::Cli;

fn main() -> Result<(), Error> {
    human_panic::setup_panic!();

    let mut builder = Builder::new();
    builder
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .filter_level(LevelFilter::Info)
        .target(Target::Stdout)
        .init();

    let cli = Cli::parse();

    match cli {
        Cli::List(args) => list::handle_list_command(args)?,
        Cli::Apply(args) => apply::handle_apply_command(args)?,
    }

    Ok(())
}
