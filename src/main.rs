mod ancestor;
mod cli;
mod config;
mod controller;
mod error;
mod executor;
mod hanoi;
mod interval_cache;
mod lock;
mod logging;
mod pathref;
mod reporter;
mod scheduler;
mod subprocess;

use clap::Parser;
use cli::Cli;
use std::process::ExitCode;
use tracing::debug;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbosity());

    match controller::run(cli).await {
        Ok(exit) => ExitCode::from(exit.code),
        Err(err) => {
            debug!("internal error: {err:#}");
            eprintln!("jabs: {err:#}");
            ExitCode::from(1)
        }
    }
}
