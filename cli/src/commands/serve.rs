//! Serve command: schedule repeating sync jobs for every enabled provider
//! and run until interrupted.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use connectors::{ConnectorRegistry, SyncMode, SyncScheduler};
use wl_core::Provider;

use crate::app::App;
use crate::output;

#[derive(Args)]
pub struct ServeArgs {
    /// Override the sync interval (seconds) for all providers
    #[arg(long)]
    pub interval: Option<u64>,
}

fn schedule(
    scheduler: &SyncScheduler,
    registry: &Arc<ConnectorRegistry>,
    provider: Provider,
    interval: std::time::Duration,
) {
    let registry = Arc::clone(registry);
    scheduler.schedule_repeating(provider.as_str(), interval, move || {
        let registry = Arc::clone(&registry);
        async move { registry.sync(provider, SyncMode::Incremental).await }
    });
}

pub async fn run(config_path: String, args: ServeArgs) -> Result<()> {
    let app = App::init(&config_path).await?;
    let scheduler = SyncScheduler::new();

    let override_interval = args.interval.map(std::time::Duration::from_secs);
    if app.config.slack.enabled {
        schedule(
            &scheduler,
            &app.registry,
            Provider::Slack,
            override_interval.unwrap_or_else(|| app.config.slack_interval()),
        );
    }
    if app.config.confluence.enabled {
        schedule(
            &scheduler,
            &app.registry,
            Provider::ConfluenceCloud,
            override_interval.unwrap_or_else(|| app.config.confluence_interval()),
        );
    }

    output::info("worklens ingestion daemon running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    scheduler.stop_all();
    output::info("shutting down");
    Ok(())
}
