//! Exposes the command line application.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tsdns_service::config::Config;
use tsdns_service::metrics;

use crate::logging;
use crate::records::{self, RecordsCommand};
use crate::server;

/// tsdns commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Run the query server.
    Run,

    /// Manage the records of the configured repository.
    #[command(subcommand)]
    Records(RecordsCommand),
}

/// Command line interface parser.
#[derive(Parser, Debug)]
#[command(bin_name = "tsdns", version)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long = "config", short = 'c', global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        ..Default::default()
    });

    // SAFETY: No other threads have been started yet.
    let logger = unsafe { logging::init_logging(&config) };

    match cli.command {
        Command::Run => {
            metrics::configure(&config.metrics).context("failed to configure metrics")?;
            server::run(config, logger).context("failed to run the server")?
        }
        Command::Records(command) => {
            let mut stdout = std::io::stdout().lock();
            records::execute(&config, command, &mut stdout)
                .context("failed to manage records")?
        }
    }

    Ok(())
}
