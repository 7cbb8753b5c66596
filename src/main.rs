//! autoflash - Command line wrapper around esptool for ESP8266 backups.
//!
//! Picks the serial port the chip is most likely on and runs esptool to
//! erase, write or read back the flash.

mod cli;
mod commands;
mod error;
mod esptool;
mod serial;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cli::{Cli, CommandLine};
use commands::Session;
use esptool::Esptool;
use serial::{Platform, PortSelector, SystemPorts};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let line = CommandLine::from(&cli);
    let tool = Esptool::locate(cli.esptool);
    tracing::debug!(esptool = %tool.path().display(), "using esptool");

    let session = Session::new(PortSelector::new(Platform::current(), SystemPorts), tool);

    match session.dispatch(&line).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error::present(&anyhow::Error::from(e));
            ExitCode::FAILURE
        }
    }
}
