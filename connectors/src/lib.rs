//! Provider connectors: crawl a workplace tool, normalize its documents,
//! and feed the index partitions. Each connector owns its paging, retry,
//! and watermark handling; the registry builds connectors from vault
//! credentials and the scheduler drives them on an interval.

pub mod confluence;
pub mod error;
pub mod live;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod slack;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use wl_core::Provider;

pub use error::{ConnectorError, ConnectorResult};
pub use registry::ConnectorRegistry;
pub use retry::RetryPolicy;
pub use scheduler::SyncScheduler;

/// How much history a sync run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Start from the stored watermark; only newer items are fetched.
    #[default]
    Incremental,
    /// Ignore watermarks and re-crawl everything. Idempotent upserts make
    /// the overlap with already-indexed documents harmless.
    Full,
}

/// How a sync run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The crawl ran to the end, possibly with per-resource errors.
    Completed,
    /// No usable credential in the vault; nothing was attempted.
    SkippedNoCredentials,
    /// The provider revoked the shared grant mid-run; ingestion is paused
    /// until an admin reconnects.
    CredentialRevoked,
}

#[derive(Debug, Clone)]
pub struct SyncErrorEntry {
    /// The resource (channel, space) the error belongs to, if any.
    pub resource: Option<String>,
    pub message: String,
}

/// Summary of one connector run. Per-resource failures are collected here
/// rather than aborting the run.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub provider: Provider,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub items_indexed: u64,
    pub resources_crawled: u64,
    pub errors: Vec<SyncErrorEntry>,
    pub outcome: SyncOutcome,
}

impl SyncReport {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            started_at: Utc::now(),
            finished_at: None,
            items_indexed: 0,
            resources_crawled: 0,
            errors: Vec::new(),
            outcome: SyncOutcome::Completed,
        }
    }

    pub fn add_error(&mut self, resource: Option<&str>, message: impl Into<String>) {
        self.errors.push(SyncErrorEntry {
            resource: resource.map(String::from),
            message: message.into(),
        });
    }

    pub fn complete(mut self, outcome: SyncOutcome) -> Self {
        self.outcome = outcome;
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn skipped(provider: Provider) -> Self {
        Self::new(provider).complete(SyncOutcome::SkippedNoCredentials)
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    fn provider(&self) -> Provider;

    /// Run one sync pass and report what happened.
    async fn sync(&self, mode: SyncMode) -> ConnectorResult<SyncReport>;
}
