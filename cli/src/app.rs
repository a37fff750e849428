//! Shared bootstrap: load config, open the database pool and index
//! partitions, and wire the stores together.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use config::WorklensConfig;
use connectors::ConnectorRegistry;
use search::SearchAggregator;
use sqlx::postgres::PgPoolOptions;
use storage::{
    CredentialCipher, CredentialStore, PgCredentialStore, PgWatermarkStore, WatermarkStore,
};

pub struct App {
    pub config: WorklensConfig,
    pub vault: Arc<dyn CredentialStore>,
    pub watermarks: Arc<dyn WatermarkStore>,
    pub aggregator: Arc<SearchAggregator>,
    pub registry: Arc<ConnectorRegistry>,
}

impl App {
    pub async fn init(config_path: &str) -> Result<Self> {
        let config = WorklensConfig::from_file(config_path)
            .with_context(|| format!("loading config from {config_path}"))?;

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&config.database_url)
            .await
            .context("connecting to database")?;
        sqlx::migrate!("../storage/migrations")
            .run(&pool)
            .await
            .context("running migrations")?;

        let cipher = Arc::new(CredentialCipher::new(config.decoded_credential_key()?));
        let vault: Arc<dyn CredentialStore> =
            Arc::new(PgCredentialStore::new(pool.clone(), cipher));
        let watermarks: Arc<dyn WatermarkStore> = Arc::new(PgWatermarkStore::new(pool));

        let aggregator = Arc::new(
            SearchAggregator::open(Path::new(&config.index_dir))
                .context("opening index partitions")?,
        );
        let registry = Arc::new(ConnectorRegistry::new(
            Arc::clone(&vault),
            Arc::clone(&watermarks),
            Arc::clone(aggregator.messages()),
            Arc::clone(aggregator.content()),
            config.clone(),
        ));

        Ok(Self {
            config,
            vault,
            watermarks,
            aggregator,
            registry,
        })
    }
}
