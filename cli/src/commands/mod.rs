pub mod credentials;
pub mod search;
pub mod serve;
pub mod sync;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "worklens",
    author,
    version,
    about = "Worklens - workplace search over Slack and Confluence",
)]
pub struct Cli {
    /// Path to the config file
    #[arg(long, global = true, env = "WORKLENS_CONFIG", default_value = "worklens.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run the scheduled ingestion daemon")]
    Serve(serve::ServeArgs),

    #[command(about = "Run one sync pass for a provider (or all)")]
    Sync(sync::SyncArgs),

    #[command(about = "Search the ingested documents")]
    Search(search::SearchArgs),

    #[command(subcommand, about = "Manage provider credentials")]
    Credentials(credentials::CredentialsCommand),
}
