//! Confluence Cloud connector.
//!
//! Crawls one configured space through the OAuth 2.0 (3LO) gateway using the
//! shared user grant stored in the vault. Access tokens are refreshed once
//! per run on a 401; a 403 means the grant was revoked, which pauses the
//! provider until an admin reconnects.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use storage::{CredentialStore, WatermarkStore};
use tracing::{info, warn};
use wl_core::{AccountRef, ContentDoc, Provider, SpaceRef};

use crate::error::{ConnectorError, ConnectorResult};
use crate::retry::RetryPolicy;
use crate::{Connector, SyncMode, SyncOutcome, SyncReport};

pub const DEFAULT_API_BASE: &str = "https://api.atlassian.com";
pub const DEFAULT_AUTH_BASE: &str = "https://auth.atlassian.com";

const CONTENT_EXPAND: &str = "body.storage,version,history,history.lastUpdated,metadata.labels,space";

/// How far behind the watermark an incremental crawl starts. Confluence's
/// `lastModified` CQL comparison has minute granularity, so a generous
/// overlap is re-crawled and deduplicated by the index upsert.
const INCREMENTAL_OVERLAP_DAYS: i64 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OauthTokens {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

pub struct ConfluenceClient {
    http: reqwest::Client,
    api_base: String,
    auth_base: String,
    client_id: String,
    client_secret: String,
}

impl ConfluenceClient {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            auth_base: DEFAULT_AUTH_BASE.to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    pub fn with_auth_base(mut self, base: impl Into<String>) -> Self {
        self.auth_base = base.into();
        self
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    async fn refresh(&self, refresh_token: &str) -> ConnectorResult<OauthTokens> {
        let response = self
            .http
            .post(format!("{}/oauth/token", self.auth_base))
            .json(&serde_json::json!({
                "grant_type": "refresh_token",
                "client_id": self.client_id,
                "client_secret": self.client_secret,
                "refresh_token": refresh_token,
            }))
            .send()
            .await?;
        // A 403 from the token endpoint means the refresh token itself was
        // revoked, not just the access token.
        if response.status() == StatusCode::FORBIDDEN {
            return Err(ConnectorError::Forbidden {
                provider: Provider::ConfluenceCloud
            });
        }
        if !response.status().is_success() {
            return Err(ConnectorError::Auth {
                provider: Provider::ConfluenceCloud,
                detail: format!("token refresh failed with status {}", response.status())
            });
        }
        Ok(response.json().await?)
    }

    async fn get_json(
        &self,
        access_token: &str,
        url: &str,
    ) -> ConnectorResult<serde_json::Value> {
        let response = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .header("accept", "application/json")
            .send()
            .await?;
        match response.status() {
            StatusCode::UNAUTHORIZED => Err(ConnectorError::Auth {
                provider: Provider::ConfluenceCloud,
                detail: "access token rejected".into(),
            }),
            StatusCode::FORBIDDEN => Err(ConnectorError::Forbidden {
                provider: Provider::ConfluenceCloud,
            }),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs);
                Err(ConnectorError::RateLimited {
                    provider: Provider::ConfluenceCloud,
                    retry_after,
                })
            }
            status if !status.is_success() => Err(ConnectorError::Api {
                provider: Provider::ConfluenceCloud,
                code: if status.is_server_error() {
                    "internal_error".to_string()
                } else {
                    status.as_u16().to_string()
                }
            }),
            _ => Ok(response.json().await?),
        }
    }
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct SiteWire {
    id: String,
    url: String,
}

#[derive(Deserialize)]
struct SpaceListWire {
    #[serde(default)]
    results: Vec<SpaceWire>,
}

#[derive(Deserialize)]
struct SpaceWire {
    id: i64,
    key: String,
    name: String,
    #[serde(rename = "type", default)]
    space_type: String,
}

#[derive(Deserialize)]
struct ContentSearchWire {
    #[serde(default)]
    results: Vec<ContentWire>,
    #[serde(rename = "_links", default)]
    links: SearchLinks,
}

#[derive(Deserialize, Default)]
struct SearchLinks {
    #[serde(default)]
    base: Option<String>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Deserialize)]
struct ContentWire {
    id: String,
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    status: String,
    title: String,
    #[serde(default)]
    body: Option<BodyWire>,
    version: VersionWire,
    history: HistoryWire,
    #[serde(default)]
    metadata: Option<MetadataWire>,
    space: SpaceWire,
    #[serde(rename = "_links", default)]
    links: ContentLinks,
}

#[derive(Deserialize)]
struct BodyWire {
    #[serde(default)]
    storage: Option<StorageWire>,
}

#[derive(Deserialize)]
struct StorageWire {
    value: String,
}

#[derive(Deserialize)]
struct VersionWire {
    number: u64,
}

#[derive(Deserialize)]
struct HistoryWire {
    #[serde(rename = "createdDate")]
    created_date: DateTime<Utc>,
    #[serde(rename = "createdBy")]
    created_by: UserWire,
    #[serde(rename = "lastUpdated", default)]
    last_updated: Option<LastUpdatedWire>,
}

#[derive(Deserialize)]
struct LastUpdatedWire {
    when: DateTime<Utc>,
    by: UserWire,
}

#[derive(Deserialize, Clone)]
struct UserWire {
    #[serde(rename = "accountId", default)]
    account_id: String,
    #[serde(rename = "accountType", default)]
    account_type: String,
    #[serde(default)]
    email: String,
    #[serde(rename = "publicName", default)]
    public_name: String,
    #[serde(rename = "profilePicture", default)]
    profile_picture: Option<ProfilePictureWire>,
}

#[derive(Deserialize, Clone)]
struct ProfilePictureWire {
    #[serde(default)]
    path: String,
}

#[derive(Deserialize, Default)]
struct MetadataWire {
    #[serde(default)]
    labels: Option<LabelListWire>,
}

#[derive(Deserialize, Default)]
struct LabelListWire {
    #[serde(default)]
    results: Vec<LabelWire>,
}

#[derive(Deserialize)]
struct LabelWire {
    name: String,
}

#[derive(Deserialize, Default)]
struct ContentLinks {
    #[serde(default)]
    webui: Option<String>,
    #[serde(default)]
    tinyui: Option<String>,
}

impl UserWire {
    fn into_account(self) -> AccountRef {
        AccountRef {
            account_id: self.account_id,
            account_type: self.account_type,
            email: self.email,
            public_name: self.public_name,
            profile_pic_url: self.profile_picture.map(|p| p.path).unwrap_or_default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Strip storage-format markup down to searchable text.
pub fn html_to_text(html: &str) -> String {
    let fragment = scraper::Html::parse_fragment(html);
    let joined = fragment.root_element().text().collect::<Vec<_>>().join(" ");
    joined.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lower bound for an incremental crawl: the watermark minus an overlap
/// window, formatted the way CQL's `lastModified` expects.
fn incremental_bound(position: &str) -> Option<String> {
    let at = DateTime::parse_from_rfc3339(position).ok()?.with_timezone(&Utc);
    let bound = at - ChronoDuration::days(INCREMENTAL_OVERLAP_DAYS);
    Some(bound.format("%Y-%m-%d %H:%M").to_string())
}

// The bound is rendered in UTC; the 1-day overlap window absorbs any offset
// from the site's local timezone. Ascending order keeps the per-page
// watermark commits monotonic, so an interrupted crawl resumes where it
// stopped instead of re-fetching the newest pages first.
fn build_cql(space_key: &str, bound: Option<&str>) -> String {
    let mut cql = format!("space = \"{space_key}\" and type in (page, blogpost)");
    if let Some(bound) = bound {
        cql.push_str(&format!(" and lastModified >= \"{bound}\""));
    }
    cql.push_str(" order by lastModified asc");
    cql
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

struct Session {
    tokens: OauthTokens,
    refreshed: bool,
}

pub struct ConfluenceConnector {
    client: ConfluenceClient,
    vault: Arc<dyn CredentialStore>,
    watermarks: Arc<dyn WatermarkStore>,
    partition: Arc<search::ContentPartition>,
    retry: RetryPolicy,
    space_name: String,
    page_size: u32,
}

impl ConfluenceConnector {
    pub fn new(
        client: ConfluenceClient,
        vault: Arc<dyn CredentialStore>,
        watermarks: Arc<dyn WatermarkStore>,
        partition: Arc<search::ContentPartition>,
        retry: RetryPolicy,
        space_name: impl Into<String>,
        page_size: u32,
    ) -> Self {
        Self {
            client,
            vault,
            watermarks,
            partition,
            retry,
            space_name: space_name.into(),
            page_size,
        }
    }

    /// Fetch with backoff; a 401 triggers one token refresh per run, a 403
    /// marks the shared grant invalid before bubbling up.
    async fn fetch(&self, session: &mut Session, url: &str) -> ConnectorResult<serde_json::Value> {
        let mut result = self
            .retry
            .run("confluence.get", || {
                self.client.get_json(&session.tokens.access_token, url)
            })
            .await;

        if matches!(result, Err(ConnectorError::Auth { .. })) && !session.refreshed {
            match self.client.refresh(&session.tokens.refresh_token).await {
                Ok(fresh) => {
                    self.vault
                        .update_shared_user_credential(
                            Provider::ConfluenceCloud,
                            serde_json::to_value(&fresh)?,
                        )
                        .await?;
                    info!("refreshed confluence access token");
                    session.tokens = fresh;
                    session.refreshed = true;
                    result = self
                        .retry
                        .run("confluence.get", || {
                            self.client.get_json(&session.tokens.access_token, url)
                        })
                        .await;
                }
                // A failed refresh replaces the original 401; a revoked
                // refresh token surfaces as Forbidden and is handled below.
                Err(err) => result = Err(err),
            }
        }

        if let Err(ConnectorError::Forbidden { provider }) = &result {
            self.vault.mark_shared_invalid(*provider).await?;
        }
        result
    }

    async fn site(&self, session: &mut Session) -> ConnectorResult<SiteWire> {
        let url = format!("{}/oauth/token/accessible-resources", self.client.api_base());
        let value = self.fetch(session, &url).await?;
        let mut sites: Vec<SiteWire> = serde_json::from_value(value)?;
        if sites.is_empty() {
            return Err(ConnectorError::Api {
                provider: Provider::ConfluenceCloud,
                code: "no_accessible_site".into()
            });
        }
        Ok(sites.remove(0))
    }

    async fn find_space(
        &self,
        session: &mut Session,
        wiki_base: &str,
    ) -> ConnectorResult<SpaceWire> {
        let mut start = 0usize;
        loop {
            let url = format!("{wiki_base}/rest/api/space?limit=100&start={start}");
            let value = self.fetch(session, &url).await?;
            let page: SpaceListWire = serde_json::from_value(value)?;
            if page.results.is_empty() {
                return Err(ConnectorError::Api {
                    provider: Provider::ConfluenceCloud,
                    code: "space_not_found".into()
                });
            }
            let count = page.results.len();
            if let Some(space) = page.results.into_iter().find(|s| s.name == self.space_name) {
                return Ok(space);
            }
            start += count;
        }
    }

    fn to_content_doc(&self, wire: ContentWire, base_url: &str) -> ContentDoc {
        let (updated, updated_by) = match wire.history.last_updated {
            Some(last) => (last.when, last.by),
            None => (wire.history.created_date, wire.history.created_by.clone()),
        };
        let labels = wire
            .metadata
            .and_then(|m| m.labels)
            .map(|l| l.results.into_iter().map(|label| label.name).collect())
            .unwrap_or_default();

        ContentDoc {
            id: wire.id,
            content_type: wire.content_type,
            status: wire.status,
            created: wire.history.created_date,
            updated,
            title: wire.title,
            body: wire
                .body
                .and_then(|b| b.storage)
                .map(|s| html_to_text(&s.value))
                .unwrap_or_default(),
            base_url: base_url.to_string(),
            web_link: wire.links.webui.map(|path| format!("{base_url}{path}")),
            tiny_link: wire.links.tinyui.map(|path| format!("{base_url}{path}")),
            labels,
            version: wire.version.number,
            created_by: wire.history.created_by.into_account(),
            updated_by: updated_by.into_account(),
            space: SpaceRef {
                id: wire.space.id.to_string(),
                key: wire.space.key,
                name: wire.space.name,
                space_type: wire.space.space_type,
                web_link: None,
            },
        }
    }

    async fn crawl(
        &self,
        session: &mut Session,
        report: &mut SyncReport,
        mode: SyncMode,
    ) -> ConnectorResult<()> {
        let site = self.site(session).await?;
        let wiki_base = format!("{}/ex/confluence/{}/wiki", self.client.api_base(), site.id);
        let space = self.find_space(session, &wiki_base).await?;
        let space_id = space.id.to_string();

        let bound = match mode {
            SyncMode::Full => None,
            SyncMode::Incremental => self
                .watermarks
                .latest(Provider::ConfluenceCloud, Some(&space_id))
                .await?
                .as_ref()
                .and_then(|w| incremental_bound(&w.position)),
        };
        let cql = build_cql(&space.key, bound.as_deref());
        info!(space = %space.name, %cql, ?mode, "confluence sync started");

        let mut url = format!(
            "{wiki_base}/rest/api/content/search?cql={}&limit={}&expand={}",
            urlencoding::encode(&cql),
            self.page_size,
            urlencoding::encode(CONTENT_EXPAND)
        );
        let fallback_base = format!("{}/wiki", site.url.trim_end_matches('/'));

        loop {
            let value = self.fetch(session, &url).await?;
            let page: ContentSearchWire = serde_json::from_value(value)?;
            let base_url = page.links.base.clone().unwrap_or_else(|| fallback_base.clone());

            let docs: Vec<ContentDoc> = page
                .results
                .into_iter()
                .map(|wire| self.to_content_doc(wire, &base_url))
                .collect();

            if !docs.is_empty() {
                self.partition.upsert(&docs)?;
                if let Some(max_updated) = docs.iter().map(|d| d.updated).max() {
                    self.watermarks
                        .record(
                            Provider::ConfluenceCloud,
                            Some(&space_id),
                            &max_updated.to_rfc3339(),
                            docs.len() as i64,
                        )
                        .await?;
                }
                report.items_indexed += docs.len() as u64;
            }

            match page.links.next {
                Some(next) => url = format!("{wiki_base}{next}"),
                None => break,
            }
        }

        report.resources_crawled = 1;
        info!(indexed = report.items_indexed, "confluence sync finished");
        Ok(())
    }
}

#[async_trait]
impl Connector for ConfluenceConnector {
    fn provider(&self) -> Provider {
        Provider::ConfluenceCloud
    }

    async fn sync(&self, mode: SyncMode) -> ConnectorResult<SyncReport> {
        let mut report = SyncReport::new(Provider::ConfluenceCloud);

        let Some(credential) = self.vault.get(Provider::ConfluenceCloud).await? else {
            return Ok(report.complete(SyncOutcome::SkippedNoCredentials));
        };
        if !credential.valid_shared_user_credential {
            warn!("confluence shared credential marked invalid, waiting for reconnect");
            return Ok(report.complete(SyncOutcome::CredentialRevoked));
        }
        let Some(blob) = credential.shared_user_credential else {
            return Ok(report.complete(SyncOutcome::SkippedNoCredentials));
        };
        let tokens: OauthTokens = serde_json::from_value(blob)?;
        let mut session = Session {
            tokens,
            refreshed: false,
        };

        match self.crawl(&mut session, &mut report, mode).await {
            Ok(()) => Ok(report.complete(SyncOutcome::Completed)),
            Err(ConnectorError::Forbidden { .. }) => {
                warn!("confluence access revoked mid-run");
                report.add_error(None, "shared user credential revoked");
                Ok(report.complete(SyncOutcome::CredentialRevoked))
            }
            Err(err) => Err(err),
        }
    }
}
