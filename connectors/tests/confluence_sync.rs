//! End-to-end Confluence sync against a mocked OAuth gateway.

use std::collections::HashMap;
use std::sync::Arc;

use connectors::confluence::{ConfluenceClient, ConfluenceConnector};
use connectors::{Connector, RetryPolicy, SyncMode, SyncOutcome};
use serde_json::json;
use storage::{
    CredentialCipher, CredentialStore, MemoryCredentialStore, MemoryWatermarkStore, WatermarkStore,
};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use wl_core::{CredentialKey, Provider};

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        starting_delay: std::time::Duration::from_millis(1),
        max_delay: std::time::Duration::from_millis(5),
        multiplier: 2.0,
    }
}

async fn seeded_vault() -> Arc<MemoryCredentialStore> {
    let vault = Arc::new(MemoryCredentialStore::new(Arc::new(CredentialCipher::new(
        [5u8; 32],
    ))));
    vault
        .put(
            Provider::ConfluenceCloud,
            HashMap::from([
                (CredentialKey::ConfluenceClientId, "cid".to_string()),
                (CredentialKey::ConfluenceClientSecret, "csecret".to_string()),
                (CredentialKey::ConfluenceSpaceName, "Engineering".to_string()),
            ]),
        )
        .await
        .unwrap();
    vault
        .update_shared_user_credential(
            Provider::ConfluenceCloud,
            json!({"access_token": "stale-token", "refresh_token": "rt-1"}),
        )
        .await
        .unwrap();
    vault
}

fn content_page() -> serde_json::Value {
    json!({
        "id": "229377",
        "type": "page",
        "status": "current",
        "title": "Incident runbook",
        "body": {"storage": {"value": "<p>How to <em>page</em> the on-call</p>"}},
        "version": {"number": 4},
        "history": {
            "createdDate": "2024-02-01T08:00:00.000Z",
            "createdBy": {"accountId": "acc-1", "accountType": "atlassian",
                          "email": "ada@example.net", "publicName": "Ada"},
            "lastUpdated": {
                "when": "2024-03-05T09:30:00.000Z",
                "by": {"accountId": "acc-2", "accountType": "atlassian",
                       "email": "lin@example.net", "publicName": "Lin"}
            }
        },
        "metadata": {"labels": {"results": [{"name": "runbook"}]}},
        "space": {"id": 99, "key": "ENG", "name": "Engineering", "type": "global"},
        "_links": {"webui": "/spaces/ENG/pages/229377", "tinyui": "/x/AbCd"}
    })
}

async fn mount_site_and_space(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/oauth/token/accessible-resources"))
        .and(header("authorization", "Bearer fresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "cloud-1", "url": "https://example.atlassian.net"}
        ])))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ex/confluence/cloud-1/wiki/rest/api/space"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                {"id": 12, "key": "MKT", "name": "Marketing", "type": "global"},
                {"id": 99, "key": "ENG", "name": "Engineering", "type": "global"}
            ]
        })))
        .mount(server)
        .await;
}

fn connector(
    server: &MockServer,
    vault: Arc<MemoryCredentialStore>,
    watermarks: Arc<MemoryWatermarkStore>,
    partition: Arc<search::ContentPartition>,
) -> ConfluenceConnector {
    let client = ConfluenceClient::new("cid", "csecret")
        .with_api_base(server.uri())
        .with_auth_base(server.uri());
    ConfluenceConnector::new(
        client,
        vault as Arc<dyn CredentialStore>,
        watermarks as Arc<dyn WatermarkStore>,
        partition,
        fast_retry(),
        "Engineering",
        50,
    )
}

#[tokio::test]
async fn refreshes_expired_token_once_and_crawls() {
    let server = MockServer::start().await;

    // The stale access token is rejected; the refreshed one works.
    Mock::given(method("GET"))
        .and(path("/oauth/token/accessible-resources"))
        .and(header("authorization", "Bearer stale-token"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh-token",
            "refresh_token": "rt-2",
            "expires_in": 3600
        })))
        .mount(&server)
        .await;
    mount_site_and_space(&server).await;
    Mock::given(method("GET"))
        .and(path("/ex/confluence/cloud-1/wiki/rest/api/content/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [content_page()],
            "_links": {"base": "https://example.atlassian.net/wiki"}
        })))
        .mount(&server)
        .await;

    let vault = seeded_vault().await;
    let watermarks = Arc::new(MemoryWatermarkStore::new());
    let dir = tempfile::tempdir().unwrap();
    let partition = Arc::new(search::ContentPartition::open(dir.path()).unwrap());

    let connector = connector(
        &server,
        Arc::clone(&vault),
        Arc::clone(&watermarks),
        Arc::clone(&partition),
    );
    let report = connector.sync(SyncMode::Incremental).await.unwrap();

    assert_eq!(report.outcome, SyncOutcome::Completed);
    assert_eq!(report.items_indexed, 1);
    assert_eq!(report.resources_crawled, 1);

    // The refreshed tokens were written back to the vault.
    let credential = vault.get(Provider::ConfluenceCloud).await.unwrap().unwrap();
    let blob = credential.shared_user_credential.unwrap();
    assert_eq!(blob["access_token"], "fresh-token");
    assert_eq!(blob["refresh_token"], "rt-2");

    // Watermark tracks the page's last update, keyed by the space id.
    let wm = watermarks
        .latest(Provider::ConfluenceCloud, Some("99"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(wm.position, "2024-03-05T09:30:00+00:00");

    let hits = partition.search("runbook", None, 10).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].doc.doc_id(), "99:229377");
    assert_eq!(hits[0].doc.body, "How to page the on-call");
    assert_eq!(
        hits[0].doc.web_link.as_deref(),
        Some("https://example.atlassian.net/wiki/spaces/ENG/pages/229377")
    );
}

#[tokio::test]
async fn revoked_grant_pauses_the_provider() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/oauth/token/accessible-resources"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let vault = seeded_vault().await;
    let watermarks = Arc::new(MemoryWatermarkStore::new());
    let dir = tempfile::tempdir().unwrap();
    let partition = Arc::new(search::ContentPartition::open(dir.path()).unwrap());

    let connector = connector(
        &server,
        Arc::clone(&vault),
        watermarks,
        partition,
    );
    let report = connector.sync(SyncMode::Incremental).await.unwrap();
    assert_eq!(report.outcome, SyncOutcome::CredentialRevoked);

    let credential = vault.get(Provider::ConfluenceCloud).await.unwrap().unwrap();
    assert!(!credential.valid_shared_user_credential);

    // A later run short-circuits without touching the API.
    let report = connector.sync(SyncMode::Incremental).await.unwrap();
    assert_eq!(report.outcome, SyncOutcome::CredentialRevoked);
}

#[tokio::test]
async fn revoked_refresh_token_pauses_the_provider() {
    let server = MockServer::start().await;

    // The access token is expired, and the refresh attempt reveals the
    // whole grant was revoked.
    Mock::given(method("GET"))
        .and(path("/oauth/token/accessible-resources"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let vault = seeded_vault().await;
    let dir = tempfile::tempdir().unwrap();
    let partition = Arc::new(search::ContentPartition::open(dir.path()).unwrap());
    let connector = connector(
        &server,
        Arc::clone(&vault),
        Arc::new(MemoryWatermarkStore::new()),
        partition,
    );

    let report = connector.sync(SyncMode::Incremental).await.unwrap();
    assert_eq!(report.outcome, SyncOutcome::CredentialRevoked);

    let credential = vault.get(Provider::ConfluenceCloud).await.unwrap().unwrap();
    assert!(!credential.valid_shared_user_credential);

    // The next tick waits for an admin reconnect instead of retrying the
    // dead refresh token.
    let report = connector.sync(SyncMode::Incremental).await.unwrap();
    assert_eq!(report.outcome, SyncOutcome::CredentialRevoked);
}

#[tokio::test]
async fn missing_shared_grant_skips_the_run() {
    let server = MockServer::start().await;
    let vault = Arc::new(MemoryCredentialStore::new(Arc::new(CredentialCipher::new(
        [5u8; 32],
    ))));
    vault
        .put(
            Provider::ConfluenceCloud,
            HashMap::from([
                (CredentialKey::ConfluenceClientId, "cid".to_string()),
                (CredentialKey::ConfluenceClientSecret, "csecret".to_string()),
                (CredentialKey::ConfluenceSpaceName, "Engineering".to_string()),
            ]),
        )
        .await
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let partition = Arc::new(search::ContentPartition::open(dir.path()).unwrap());
    let connector = connector(
        &server,
        vault,
        Arc::new(MemoryWatermarkStore::new()),
        partition,
    );

    let report = connector.sync(SyncMode::Incremental).await.unwrap();
    assert_eq!(report.outcome, SyncOutcome::SkippedNoCredentials);
}
