//! Per-resource ingestion watermarks.
//!
//! A watermark records how far a connector has crawled a resource (a Slack
//! channel, a Confluence space). Positions only ever move forward: a write
//! with an older position is clamped to the stored one, so a crawl that
//! races a concurrent run can never rewind another run's progress.
//!
//! Positions are opaque strings ordered lexicographically, which holds for
//! both formats we store: Slack epoch-second timestamps of equal width and
//! RFC 3339 datetimes.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sqlx::PgPool;
use wl_core::Provider;

use crate::error::StorageResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watermark {
    pub source: Provider,
    /// Resource within the source, or `None` for a source-wide watermark.
    pub resource_id: Option<String>,
    pub position: String,
    pub record_count: i64,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait WatermarkStore: Send + Sync {
    async fn latest(
        &self,
        source: Provider,
        resource_id: Option<&str>,
    ) -> StorageResult<Option<Watermark>>;

    /// Record progress. The stored position becomes the max of the existing
    /// and the new one; `record_count` accumulates either way.
    async fn record(
        &self,
        source: Provider,
        resource_id: Option<&str>,
        position: &str,
        record_count: i64,
    ) -> StorageResult<Watermark>;
}

// Postgres cannot have NULL inside a unique key, so a source-wide watermark
// is stored under the empty resource id.
fn resource_key(resource_id: Option<&str>) -> &str {
    resource_id.unwrap_or("")
}

pub struct PgWatermarkStore {
    pool: PgPool,
}

impl PgWatermarkStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

type WatermarkRow = (String, i64, DateTime<Utc>);

#[async_trait]
impl WatermarkStore for PgWatermarkStore {
    async fn latest(
        &self,
        source: Provider,
        resource_id: Option<&str>,
    ) -> StorageResult<Option<Watermark>> {
        let row = sqlx::query_as::<_, WatermarkRow>(
            r#"
            SELECT position, record_count, updated_at
            FROM sync_watermarks
            WHERE source = $1 AND resource_id = $2
            "#,
        )
        .bind(source.as_str())
        .bind(resource_key(resource_id))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(position, record_count, updated_at)| Watermark {
            source,
            resource_id: resource_id.map(String::from),
            position,
            record_count,
            updated_at,
        }))
    }

    async fn record(
        &self,
        source: Provider,
        resource_id: Option<&str>,
        position: &str,
        record_count: i64,
    ) -> StorageResult<Watermark> {
        let (position, record_count, updated_at) = sqlx::query_as::<_, WatermarkRow>(
            r#"
            INSERT INTO sync_watermarks (source, resource_id, position, record_count, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (source, resource_id) DO UPDATE SET
                position = GREATEST(sync_watermarks.position, EXCLUDED.position),
                record_count = sync_watermarks.record_count + EXCLUDED.record_count,
                updated_at = NOW()
            RETURNING position, record_count, updated_at
            "#,
        )
        .bind(source.as_str())
        .bind(resource_key(resource_id))
        .bind(position)
        .bind(record_count)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(
            source = %source,
            resource = resource_key(resource_id),
            %position,
            record_count,
            "advanced watermark"
        );

        Ok(Watermark {
            source,
            resource_id: resource_id.map(String::from),
            position,
            record_count,
            updated_at,
        })
    }
}

#[derive(Default)]
pub struct MemoryWatermarkStore {
    rows: RwLock<HashMap<(Provider, String), (String, i64, DateTime<Utc>)>>,
}

impl MemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WatermarkStore for MemoryWatermarkStore {
    async fn latest(
        &self,
        source: Provider,
        resource_id: Option<&str>,
    ) -> StorageResult<Option<Watermark>> {
        let rows = self.rows.read();
        Ok(rows
            .get(&(source, resource_key(resource_id).to_string()))
            .map(|(position, record_count, updated_at)| Watermark {
                source,
                resource_id: resource_id.map(String::from),
                position: position.clone(),
                record_count: *record_count,
                updated_at: *updated_at,
            }))
    }

    async fn record(
        &self,
        source: Provider,
        resource_id: Option<&str>,
        position: &str,
        record_count: i64,
    ) -> StorageResult<Watermark> {
        let now = Utc::now();
        let mut rows = self.rows.write();
        let entry = rows
            .entry((source, resource_key(resource_id).to_string()))
            .and_modify(|(stored_position, stored_count, updated_at)| {
                if position > stored_position.as_str() {
                    *stored_position = position.to_string();
                }
                *stored_count += record_count;
                *updated_at = now;
            })
            .or_insert_with(|| (position.to_string(), record_count, now));

        Ok(Watermark {
            source,
            resource_id: resource_id.map(String::from),
            position: entry.0.clone(),
            record_count: entry.1,
            updated_at: entry.2,
        })
    }
}
