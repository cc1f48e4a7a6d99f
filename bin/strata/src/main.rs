//! strata command line entry point.

mod cli;
mod commands;
mod config;
mod logging;

use clap::Parser;

fn main() -> eyre::Result<()> {
    let cli = cli::Cli::parse();
    logging::init_logging(&cli.logs)?;
    commands::run(cli)
}
