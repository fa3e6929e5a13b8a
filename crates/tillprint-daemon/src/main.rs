// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Tillprint — point-of-sale print daemon.
//
// Entry point. Parses the command line, initialises logging, loads the
// configuration and runs the daemon until SIGINT/SIGTERM.

mod services;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use services::daemon::Daemon;
use services::settings::{self, Overrides};
use services::{data_dir, shutdown};

#[derive(Parser, Debug)]
#[command(name = "tillprint")]
#[command(version)]
#[command(about = "Receipt print daemon for POS terminals (WebSocket + ESC/POS)")]
struct Cli {
    /// Config file (JSON). Defaults to config.json in the data directory.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on, e.g. 127.0.0.1:8766
    #[arg(long)]
    listen: Option<String>,

    /// Maximum number of queued jobs
    #[arg(long)]
    queue_size: Option<usize>,

    /// Printer used when a document does not name one
    #[arg(long)]
    default_printer: Option<String>,

    /// Log filter when RUST_LOG is unset (e.g. "debug", "tillprint_print=trace")
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let overrides = Overrides {
        listen_addr: cli.listen,
        queue_capacity: cli.queue_size,
        default_printer: cli.default_printer,
    };
    let config = match settings::load(cli.config.as_deref(), &data_dir::data_dir(), overrides) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = shutdown::install_shutdown_handler();
    match Daemon::new(config).run(shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Tillprint exited with an error");
            ExitCode::FAILURE
        }
    }
}
