//! Sleuth CLI entry point.

use anyhow::Result;
use clap::Parser;

use sleuth::cli::commands::{self, load_config};
use sleuth::cli::{Cli, Commands};
use sleuth::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json = cli.json;

    let result = run(cli).await;

    if let Err(err) = result {
        sleuth::cli::handle_error(err, json);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let log_config = LogConfig::from_settings(&config.logging)?.with_verbosity(cli.verbose);
    let _logger = LoggerImpl::init(&log_config)?;

    match cli.command {
        Commands::Run(args) => commands::run::execute(args, config, cli.json).await,
        Commands::Status(args) => commands::status::execute(args, config, cli.json).await,
        Commands::Show(args) => commands::show::execute(args, config, cli.json).await,
    }
}
