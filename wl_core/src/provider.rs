use serde::{Deserialize, Serialize};

/// Knowledge sources Worklens can ingest from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Slack,
    ConfluenceCloud,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Slack => "slack",
            Self::ConfluenceCloud => "confluence_cloud",
        }
    }

    pub fn all() -> [Provider; 2] {
        [Self::Slack, Self::ConfluenceCloud]
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "slack" => Ok(Self::Slack),
            "confluence_cloud" | "confluence" => Ok(Self::ConfluenceCloud),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// Keys a provider's global credential row may carry. Each provider declares
/// an exact key set; credential writes are rejected unless the supplied keys
/// match it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKey {
    SlackClientId,
    SlackClientSecret,
    SlackAppToken,
    SlackBotToken,
    SlackSigningSecret,
    ConfluenceClientId,
    ConfluenceClientSecret,
    ConfluenceSpaceName,
}

impl CredentialKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SlackClientId => "slack_client_id",
            Self::SlackClientSecret => "slack_client_secret",
            Self::SlackAppToken => "slack_app_token",
            Self::SlackBotToken => "slack_bot_token",
            Self::SlackSigningSecret => "slack_signing_secret",
            Self::ConfluenceClientId => "confluence_client_id",
            Self::ConfluenceClientSecret => "confluence_client_secret",
            Self::ConfluenceSpaceName => "confluence_space_name",
        }
    }
}

impl std::str::FromStr for CredentialKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "slack_client_id" => Ok(Self::SlackClientId),
            "slack_client_secret" => Ok(Self::SlackClientSecret),
            "slack_app_token" => Ok(Self::SlackAppToken),
            "slack_bot_token" => Ok(Self::SlackBotToken),
            "slack_signing_secret" => Ok(Self::SlackSigningSecret),
            "confluence_client_id" => Ok(Self::ConfluenceClientId),
            "confluence_client_secret" => Ok(Self::ConfluenceClientSecret),
            "confluence_space_name" => Ok(Self::ConfluenceSpaceName),
            other => Err(format!("unknown credential key: {other}")),
        }
    }
}

/// The exact key set a provider's credential write must supply.
pub fn provider_fields(provider: Provider) -> &'static [CredentialKey] {
    match provider {
        Provider::Slack => &[
            CredentialKey::SlackClientId,
            CredentialKey::SlackClientSecret,
            CredentialKey::SlackAppToken,
            CredentialKey::SlackBotToken,
            CredentialKey::SlackSigningSecret,
        ],
        Provider::ConfluenceCloud => &[
            CredentialKey::ConfluenceClientId,
            CredentialKey::ConfluenceClientSecret,
            CredentialKey::ConfluenceSpaceName,
        ],
    }
}

/// Keys safe to expose to non-admin callers (OAuth client ids only).
pub fn public_provider_fields(provider: Provider) -> &'static [CredentialKey] {
    match provider {
        Provider::Slack => &[CredentialKey::SlackClientId],
        Provider::ConfluenceCloud => &[CredentialKey::ConfluenceClientId],
    }
}
