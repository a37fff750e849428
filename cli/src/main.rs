use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod app;
mod commands;
mod output;

use commands::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => commands::serve::run(cli.config, args).await,
        Commands::Sync(args) => commands::sync::run(cli.config, args).await,
        Commands::Search(args) => commands::search::run(cli.config, args).await,
        Commands::Credentials(cmd) => commands::credentials::run(cli.config, cmd).await,
    }
}
