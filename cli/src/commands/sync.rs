//! Sync command: one sync pass, outside the schedule.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use connectors::{SyncMode, SyncOutcome, SyncReport};
use wl_core::Provider;

use crate::app::App;
use crate::output;

#[derive(Args)]
pub struct SyncArgs {
    /// Provider to sync (slack, confluence_cloud); omit for all
    #[arg(long)]
    pub provider: Option<Provider>,

    /// Ignore watermarks and re-crawl all history
    #[arg(long)]
    pub full: bool,
}

fn print_report(report: &SyncReport) {
    let outcome = match report.outcome {
        SyncOutcome::Completed => "completed".green(),
        SyncOutcome::SkippedNoCredentials => "skipped (no credentials)".yellow(),
        SyncOutcome::CredentialRevoked => "paused (credential revoked)".red(),
    };
    println!(
        "  {} {} — {} items across {} resources, {} errors",
        report.provider.to_string().cyan(),
        outcome,
        report.items_indexed,
        report.resources_crawled,
        report.errors.len()
    );
    for entry in &report.errors {
        let resource = entry.resource.as_deref().unwrap_or("-");
        println!("    {} [{}] {}", "!".red(), resource.dimmed(), entry.message);
    }
}

pub async fn run(config_path: String, args: SyncArgs) -> Result<()> {
    let app = App::init(&config_path).await?;
    let providers: Vec<Provider> = match args.provider {
        Some(provider) => vec![provider],
        None => Provider::all().to_vec(),
    };

    let mode = if args.full {
        SyncMode::Full
    } else {
        SyncMode::Incremental
    };

    output::header("Sync");
    for provider in providers {
        match app.registry.sync(provider, mode).await {
            Ok(report) => print_report(&report),
            Err(err) => output::error(&format!("{provider}: {err}")),
        }
    }
    Ok(())
}
