//! Search command: query the index partitions from the terminal.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use wl_core::{Provider, ProviderDocType, SearchItem};

use crate::app::App;
use crate::output;

#[derive(Args)]
pub struct SearchArgs {
    /// The query string
    pub query: String,

    /// Restrict to a provider (repeatable)
    #[arg(long)]
    pub provider: Vec<Provider>,

    /// Maximum number of merged results
    #[arg(long, default_value_t = 20)]
    pub limit: usize,

    /// Output the raw response as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(config_path: String, args: SearchArgs) -> Result<()> {
    let app = App::init(&config_path).await?;

    let filter: Option<Vec<ProviderDocType>> = if args.provider.is_empty() {
        None
    } else {
        Some(
            args.provider
                .iter()
                .map(|&provider| ProviderDocType {
                    provider,
                    doc_type: None,
                })
                .collect(),
        )
    };

    let response = app
        .aggregator
        .search(&args.query, filter.as_deref(), args.limit);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    output::header(&format!("Results for \"{}\"", args.query));
    for count in &response.counts {
        println!(
            "  {} {}",
            count.provider.to_string().cyan(),
            count.count.to_string().bold()
        );
    }
    println!();

    for item in &response.items {
        match item {
            SearchItem::Message(message) => {
                let channel = message
                    .group
                    .as_ref()
                    .map_or("-", |g| g.resource_id.as_str());
                println!(
                    "{} {} {}",
                    "slack".cyan(),
                    format!("#{channel}").dimmed(),
                    message.body_text.as_deref().unwrap_or("")
                );
                if let Some(link) = &message.permalink {
                    println!("      {}", link.underline().dimmed());
                }
            }
            SearchItem::Content(content) => {
                println!(
                    "{} {} {}",
                    Provider::ConfluenceCloud.to_string().cyan(),
                    content.title.as_deref().unwrap_or("(untitled)").bold(),
                    content.body_text.as_deref().unwrap_or("")
                );
                if let Some(url) = &content.url {
                    println!("      {}", url.underline().dimmed());
                }
            }
        }
    }
    Ok(())
}
