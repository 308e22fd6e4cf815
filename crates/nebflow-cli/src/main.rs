mod cli;
mod commands;
mod config;
mod error;
mod logging;
mod progress;

use crate::cli::{Cli, Commands};
use crate::error::Result;
use clap::Parser;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    if let Err(e) = run_app().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run_app() -> Result<()> {
    let cli = Cli::parse();
    logging::setup_logging(cli.verbose, cli.quiet, cli.log_file.clone())?;

    info!("nebflow v{} starting up.", env!("CARGO_PKG_VERSION"));
    debug!("Full CLI arguments parsed: {:?}", &cli);

    let result = match cli.command {
        Commands::Init(args) => commands::init::run(args),
        Commands::Run(args) => commands::run::run(args, cli.quiet).await,
        Commands::Status(args) => commands::status::run(args),
        Commands::Clean(args) => commands::clean::run(args),
    };

    if let Err(e) = &result {
        error!("Command failed: {e}");
    }
    result
}
