// canonguard/src/main.rs
//! canonguard entry point.

use anyhow::Result;
use clap::Parser;

use canonguard::cli::{Cli, Commands};
use canonguard::{commands, logger, output};
use canonguard_core::GuardConfig;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logger::init_logger(logger::level_from_flags(cli.debug, cli.quiet));

    if let Err(e) = run(cli).await {
        output::error_msg(format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = GuardConfig::load_or_default(cli.config.as_deref())?;
    match cli.command {
        Commands::Watch => commands::watch::run_watch(config).await,
        Commands::Inspect { file } => commands::inspect::run_inspect(&config, &file),
        Commands::Check { file } => commands::check::run_check(&config, &file).await,
        Commands::Templates => commands::templates::run_templates(&config),
    }
}
