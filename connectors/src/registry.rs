//! Builds connectors from vault credentials and caches them per provider.
//!
//! A cached connector is keyed by the credential generation it was built
//! from; rotating a credential bumps the generation, so the next sync run
//! transparently gets a connector holding the fresh secrets.

use std::collections::HashMap;
use std::sync::Arc;

use config::WorklensConfig;
use parking_lot::Mutex;
use search::{ContentPartition, MessagePartition};
use storage::{CredentialStore, DecryptedCredential, WatermarkStore};
use tracing::info;
use wl_core::{CredentialKey, Provider};

use crate::confluence::{ConfluenceClient, ConfluenceConnector};
use crate::error::{ConnectorError, ConnectorResult};
use crate::retry::RetryPolicy;
use crate::slack::{SlackConnector, SlackHttpClient};
use crate::{Connector, SyncMode, SyncReport};

struct CachedConnector {
    generation: i64,
    connector: Arc<dyn Connector>,
}

pub struct ConnectorRegistry {
    vault: Arc<dyn CredentialStore>,
    watermarks: Arc<dyn WatermarkStore>,
    messages: Arc<MessagePartition>,
    content: Arc<ContentPartition>,
    config: WorklensConfig,
    cache: Mutex<HashMap<Provider, CachedConnector>>,
}

impl ConnectorRegistry {
    pub fn new(
        vault: Arc<dyn CredentialStore>,
        watermarks: Arc<dyn WatermarkStore>,
        messages: Arc<MessagePartition>,
        content: Arc<ContentPartition>,
        config: WorklensConfig,
    ) -> Self {
        Self {
            vault,
            watermarks,
            messages,
            content,
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The connector for a provider, or `None` when the vault has no
    /// credential for it. Rebuilt lazily when the credential generation
    /// moves.
    pub async fn connector_for(
        &self,
        provider: Provider,
    ) -> ConnectorResult<Option<Arc<dyn Connector>>> {
        let Some(generation) = self.vault.generation(provider).await? else {
            return Ok(None);
        };

        if let Some(cached) = self.cache.lock().get(&provider) {
            if cached.generation == generation {
                return Ok(Some(Arc::clone(&cached.connector)));
            }
        }

        let Some(credential) = self.vault.get(provider).await? else {
            return Ok(None);
        };
        let connector = self.build(credential)?;
        info!(provider = %provider, generation, "built connector");
        self.cache.lock().insert(
            provider,
            CachedConnector {
                generation,
                connector: Arc::clone(&connector),
            },
        );
        Ok(Some(connector))
    }

    /// Run one sync for a provider, skipping cleanly when it has no
    /// credentials yet.
    pub async fn sync(&self, provider: Provider, mode: SyncMode) -> ConnectorResult<SyncReport> {
        match self.connector_for(provider).await? {
            None => Ok(SyncReport::skipped(provider)),
            Some(connector) => connector.sync(mode).await,
        }
    }

    fn build(&self, credential: DecryptedCredential) -> ConnectorResult<Arc<dyn Connector>> {
        let provider = credential.provider;
        let required = |key: CredentialKey| -> ConnectorResult<String> {
            credential
                .field(key)
                .map(String::from)
                .ok_or(ConnectorError::NotConfigured { provider })
        };
        let retry = RetryPolicy::from_config(&self.config.retry);

        Ok(match provider {
            Provider::Slack => {
                let api = SlackHttpClient::new(
                    required(CredentialKey::SlackBotToken)?,
                    self.config.slack.page_size,
                );
                Arc::new(SlackConnector::new(
                    Arc::new(api),
                    Arc::clone(&self.watermarks),
                    Arc::clone(&self.messages),
                    retry,
                    self.config.slack.channel_fanout,
                ))
            }
            Provider::ConfluenceCloud => {
                let client = ConfluenceClient::new(
                    required(CredentialKey::ConfluenceClientId)?,
                    required(CredentialKey::ConfluenceClientSecret)?,
                );
                Arc::new(ConfluenceConnector::new(
                    client,
                    Arc::clone(&self.vault),
                    Arc::clone(&self.watermarks),
                    Arc::clone(&self.content),
                    retry,
                    required(CredentialKey::ConfluenceSpaceName)?,
                    self.config.confluence.page_size,
                ))
            }
        })
    }
}
