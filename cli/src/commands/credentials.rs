//! Credentials command: write and inspect the provider credential vault.

use std::collections::HashMap;

use anyhow::{Result, bail};
use clap::{Args, Subcommand};
use colored::Colorize;
use wl_core::{CredentialKey, Provider, provider_fields};

use crate::app::App;
use crate::output;

#[derive(Subcommand)]
pub enum CredentialsCommand {
    #[command(about = "Store a provider credential (key=value pairs)")]
    Set(SetArgs),

    #[command(about = "Show a provider's public credential fields")]
    Show(ShowArgs),
}

#[derive(Args)]
pub struct SetArgs {
    pub provider: Provider,

    /// Credential fields as key=value, e.g. slack_bot_token=xoxb-...
    /// The key set must match the provider's schema exactly.
    #[arg(required = true)]
    pub fields: Vec<String>,
}

#[derive(Args)]
pub struct ShowArgs {
    pub provider: Provider,
}

fn parse_fields(raw: &[String]) -> Result<HashMap<CredentialKey, String>> {
    let mut fields = HashMap::new();
    for pair in raw {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("expected key=value, got {pair:?}");
        };
        let key: CredentialKey = key.parse().map_err(|e: String| anyhow::anyhow!(e))?;
        fields.insert(key, value.to_string());
    }
    Ok(fields)
}

pub async fn run(config_path: String, command: CredentialsCommand) -> Result<()> {
    let app = App::init(&config_path).await?;
    match command {
        CredentialsCommand::Set(args) => {
            let fields = parse_fields(&args.fields)?;
            let credential = app.vault.put(args.provider, fields).await?;
            output::success(&format!(
                "stored {} credential (generation {})",
                args.provider, credential.generation
            ));
        }
        CredentialsCommand::Show(args) => {
            let Some(credential) = app.vault.get(args.provider).await? else {
                output::warn(&format!("no credential stored for {}", args.provider));
                return Ok(());
            };
            output::header(&args.provider.to_string());
            for (key, value) in credential.public_fields() {
                println!("  {} {}", key.as_str().dimmed(), value);
            }
            let hidden = provider_fields(args.provider).len() - credential.public_fields().len();
            println!("  {} {} secret field(s) hidden", "·".dimmed(), hidden);
            println!(
                "  shared user grant: {}",
                if credential.shared_user_credential.is_none() {
                    "not connected".yellow()
                } else if credential.valid_shared_user_credential {
                    "valid".green()
                } else {
                    "revoked".red()
                }
            );
        }
    }
    Ok(())
}
