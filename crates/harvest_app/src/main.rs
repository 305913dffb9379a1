//! `bnmp-harvest`: command-line entry point of the harvester.
mod cli;
mod commands;

use std::process::ExitCode;

use clap::Parser;
use harvest_log::{harvest_error, harvest_warn, LogDestination};
use log::LevelFilter;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = cli::Cli::parse();

    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let destination = if cli.log_file {
        LogDestination::TerminalAndFile(cli.data_dir.clone())
    } else {
        LogDestination::Terminal
    };
    harvest_log::initialize(destination, level);

    let shutdown = CancellationToken::new();
    let on_interrupt = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            harvest_warn!("Interrupted; letting in-flight units finish");
            on_interrupt.cancel();
        }
    });

    match commands::run(cli, shutdown).await {
        Ok(code) => code,
        Err(err) => {
            harvest_error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}
