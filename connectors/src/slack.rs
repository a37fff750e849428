//! Slack connector: joins every public channel, crawls message history
//! past each channel's watermark, enriches messages with permalinks, and
//! upserts them into the messages partition.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt as _;
use futures_util::future::BoxFuture;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use storage::WatermarkStore;
use tracing::{error, info, warn};
use wl_core::{MessageDoc, Provider};

use crate::error::{ConnectorError, ConnectorResult};
use crate::retry::RetryPolicy;
use crate::{Connector, SyncMode, SyncOutcome, SyncReport};

pub const DEFAULT_BASE_URL: &str = "https://slack.com/api";

#[derive(Debug, Clone, Deserialize)]
pub struct SlackChannel {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_member: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlackMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub subtype: Option<String>,
    pub ts: String,
    #[serde(default)]
    pub client_msg_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub team: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChannelPage {
    pub channels: Vec<SlackChannel>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HistoryPage {
    pub messages: Vec<SlackMessage>,
    pub next_cursor: Option<String>,
}

/// The slice of the Slack Web API the connector needs.
#[async_trait]
pub trait SlackApi: Send + Sync {
    async fn list_channels(&self, cursor: Option<&str>) -> ConnectorResult<ChannelPage>;

    async fn join_channel(&self, channel_id: &str) -> ConnectorResult<()>;

    /// Message history for a channel, oldest-exclusive.
    async fn history(
        &self,
        channel_id: &str,
        oldest: Option<&str>,
        cursor: Option<&str>,
    ) -> ConnectorResult<HistoryPage>;

    async fn permalink(&self, channel_id: &str, ts: &str) -> ConnectorResult<String>;
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

fn classify_slack_error(code: String) -> ConnectorError {
    match code.as_str() {
        "invalid_auth" | "not_authed" | "token_revoked" | "token_expired"
        | "account_inactive" => ConnectorError::Auth {
            provider: Provider::Slack,
            detail: code,
        },
        _ => ConnectorError::Api {
            provider: Provider::Slack,
            code,
        }
    }
}

pub struct SlackHttpClient {
    http: reqwest::Client,
    base_url: String,
    bot_token: String,
    page_size: u32,
}

impl SlackHttpClient {
    pub fn new(bot_token: impl Into<String>, page_size: u32) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            bot_token: bot_token.into(),
            page_size,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn handle<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> ConnectorResult<T> {
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ConnectorError::RateLimited {
                provider: Provider::Slack,
                retry_after
            });
        }

        // Slack reports failures inside a 200 body as { ok: false, error }.
        let value: serde_json::Value = response.json().await?;
        let ok = value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false);
        if !ok {
            let code = value
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown_error")
                .to_string();
            return Err(classify_slack_error(code));
        }
        Ok(serde_json::from_value(value)?)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        method: &str,
        query: &[(&str, &str)],
    ) -> ConnectorResult<T> {
        let response = self
            .http
            .get(format!("{}/{}", self.base_url, method))
            .bearer_auth(&self.bot_token)
            .query(query)
            .send()
            .await?;
        self.handle(response).await
    }
}

#[derive(Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

impl ResponseMetadata {
    fn into_cursor(self) -> Option<String> {
        if self.next_cursor.is_empty() {
            None
        } else {
            Some(self.next_cursor)
        }
    }
}

#[derive(Deserialize)]
struct ListPayload {
    #[serde(default)]
    channels: Vec<SlackChannel>,
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Deserialize)]
struct HistoryPayload {
    #[serde(default)]
    messages: Vec<SlackMessage>,
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Deserialize)]
struct PermalinkPayload {
    permalink: String,
}

#[async_trait]
impl SlackApi for SlackHttpClient {
    async fn list_channels(&self, cursor: Option<&str>) -> ConnectorResult<ChannelPage> {
        let limit = self.page_size.to_string();
        let mut query = vec![
            ("limit", limit.as_str()),
            ("types", "public_channel"),
            ("exclude_archived", "true"),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor));
        }
        let payload: ListPayload = self.get("conversations.list", &query).await?;
        Ok(ChannelPage {
            channels: payload.channels,
            next_cursor: payload.response_metadata.and_then(ResponseMetadata::into_cursor),
        })
    }

    async fn join_channel(&self, channel_id: &str) -> ConnectorResult<()> {
        let response = self
            .http
            .post(format!("{}/conversations.join", self.base_url))
            .bearer_auth(&self.bot_token)
            .form(&[("channel", channel_id)])
            .send()
            .await?;
        let _: serde_json::Value = self.handle(response).await?;
        Ok(())
    }

    async fn history(
        &self,
        channel_id: &str,
        oldest: Option<&str>,
        cursor: Option<&str>,
    ) -> ConnectorResult<HistoryPage> {
        let limit = self.page_size.to_string();
        let mut query = vec![("channel", channel_id), ("limit", limit.as_str())];
        if let Some(oldest) = oldest {
            query.push(("oldest", oldest));
        }
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor));
        }
        let payload: HistoryPayload = self.get("conversations.history", &query).await?;
        Ok(HistoryPage {
            messages: payload.messages,
            next_cursor: payload.response_metadata.and_then(ResponseMetadata::into_cursor),
        })
    }

    async fn permalink(&self, channel_id: &str, ts: &str) -> ConnectorResult<String> {
        let payload: PermalinkPayload = self
            .get(
                "chat.getPermalink",
                &[("channel", channel_id), ("message_ts", ts)],
            )
            .await?;
        Ok(payload.permalink)
    }
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

pub struct SlackConnector {
    api: Arc<dyn SlackApi>,
    watermarks: Arc<dyn WatermarkStore>,
    partition: Arc<search::MessagePartition>,
    retry: RetryPolicy,
    permalink_retry: RetryPolicy,
    channel_fanout: usize,
}

impl SlackConnector {
    pub fn new(
        api: Arc<dyn SlackApi>,
        watermarks: Arc<dyn WatermarkStore>,
        partition: Arc<search::MessagePartition>,
        retry: RetryPolicy,
        channel_fanout: usize,
    ) -> Self {
        let permalink_retry = RetryPolicy {
            max_attempts: RetryPolicy::permalinks().max_attempts,
            ..retry.clone()
        };
        Self {
            api,
            watermarks,
            partition,
            retry,
            permalink_retry,
            channel_fanout: channel_fanout.max(1),
        }
    }

    async fn all_channels(&self) -> ConnectorResult<Vec<SlackChannel>> {
        let mut channels = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .retry
                .run("conversations.list", || {
                    self.api.list_channels(cursor.as_deref())
                })
                .await?;
            channels.extend(page.channels);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(channels)
    }

    async fn permalink_for(&self, channel_id: &str, ts: &str) -> Option<String> {
        match self
            .permalink_retry
            .run("chat.getPermalink", || self.api.permalink(channel_id, ts))
            .await
        {
            Ok(link) => Some(link),
            // A message without a permalink is still worth indexing.
            Err(error) => {
                warn!(channel = channel_id, ts, %error, "permalink lookup failed, indexing without one");
                None
            }
        }
    }

    /// Crawl one channel forward from its watermark. Returns the number of
    /// messages indexed.
    async fn crawl_channel(
        &self,
        channel: &SlackChannel,
        mode: SyncMode,
    ) -> (String, ConnectorResult<u64>) {
        let result = self.crawl_channel_inner(channel, mode).await;
        (channel.id.clone(), result)
    }

    async fn crawl_channel_inner(
        &self,
        channel: &SlackChannel,
        mode: SyncMode,
    ) -> ConnectorResult<u64> {
        let oldest = match mode {
            SyncMode::Full => None,
            SyncMode::Incremental => self
                .watermarks
                .latest(Provider::Slack, Some(&channel.id))
                .await?
                .map(|w| w.position),
        };

        let mut cursor: Option<String> = None;
        let mut indexed: u64 = 0;
        loop {
            let page = self
                .retry
                .run("conversations.history", || {
                    self.api
                        .history(&channel.id, oldest.as_deref(), cursor.as_deref())
                })
                .await?;

            let mut batch = Vec::new();
            for message in &page.messages {
                if message.kind != "message" || message.subtype.is_some() {
                    continue;
                }
                // The watermark position itself was indexed by a previous
                // run; only strictly newer messages count.
                if let Some(oldest) = &oldest {
                    if message.ts.as_str() <= oldest.as_str() {
                        continue;
                    }
                }
                let Some(user) = &message.user else { continue };

                let permalink = self.permalink_for(&channel.id, &message.ts).await;
                batch.push(MessageDoc {
                    ts: message.ts.clone(),
                    client_msg_id: message.client_msg_id.clone(),
                    text: message.text.clone(),
                    user_id: user.clone(),
                    team_id: message.team.clone(),
                    channel_id: channel.id.clone(),
                    channel_type: "channel".into(),
                    permalink,
                });
            }

            if !batch.is_empty() {
                self.partition.upsert(&batch)?;
                if let Some(max_ts) = batch.iter().map(|doc| doc.ts.as_str()).max() {
                    self.watermarks
                        .record(Provider::Slack, Some(&channel.id), max_ts, batch.len() as i64)
                        .await?;
                }
                indexed += batch.len() as u64;
            }

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(indexed)
    }
}

#[async_trait]
impl Connector for SlackConnector {
    fn provider(&self) -> Provider {
        Provider::Slack
    }

    async fn sync(&self, mode: SyncMode) -> ConnectorResult<SyncReport> {
        let mut report = SyncReport::new(Provider::Slack);
        let channels = self.all_channels().await?;
        info!(channels = channels.len(), ?mode, "slack sync started");

        // Join everything we are not in yet. A channel we cannot join is
        // recorded and the run moves on.
        for channel in &channels {
            if channel.is_member {
                continue;
            }
            if let Err(err) = self
                .retry
                .run("conversations.join", || self.api.join_channel(&channel.id))
                .await
            {
                warn!(channel = %channel.id, error = %err, "could not join channel");
                report.add_error(Some(&channel.id), err.to_string());
            }
        }

        let crawls: Vec<BoxFuture<'_, (String, ConnectorResult<u64>)>> = channels
            .iter()
            .map(|channel| Box::pin(self.crawl_channel(channel, mode)) as BoxFuture<'_, _>)
            .collect();
        let results: Vec<(String, ConnectorResult<u64>)> = futures_util::stream::iter(crawls)
            .buffer_unordered(self.channel_fanout)
            .collect()
            .await;

        for (channel_id, result) in results {
            match result {
                Ok(indexed) => {
                    report.items_indexed += indexed;
                    report.resources_crawled += 1;
                }
                Err(err) => {
                    error!(channel = %channel_id, error = %err, "channel crawl failed");
                    report.add_error(Some(&channel_id), err.to_string());
                }
            }
        }

        info!(
            indexed = report.items_indexed,
            channels = report.resources_crawled,
            errors = report.errors.len(),
            "slack sync finished"
        );
        Ok(report.complete(SyncOutcome::Completed))
    }
}
