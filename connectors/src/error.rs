use std::time::Duration;

use thiserror::Error;
use wl_core::Provider;

pub type ConnectorResult<T> = Result<T, ConnectorError>;

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("rate limited by {provider}")]
    RateLimited {
        provider: Provider,
        retry_after: Option<Duration>,
    },

    #[error("{provider} api error: {code}")]
    Api { provider: Provider, code: String },

    #[error("authentication failed for {provider}: {detail}")]
    Auth { provider: Provider, detail: String },

    #[error("access forbidden for {provider}, shared credential revoked")]
    Forbidden { provider: Provider },

    #[error("no credentials configured for {provider}")]
    NotConfigured { provider: Provider },

    #[error("retry budget exhausted after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: Box<ConnectorError>,
    },

    #[error("unexpected response shape: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] storage::StorageError),

    #[error(transparent)]
    Index(#[from] search::SearchError),
}

impl ConnectorError {
    /// Whether the failure is transient and worth retrying with backoff.
    /// Slack reports transient conditions through its error string rather
    /// than the status code, so those are matched by name.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Api { code, .. } => matches!(
                code.as_str(),
                "ratelimited" | "service_unavailable" | "internal_error"
            ),
            Self::Transport(error) => error.is_timeout() || error.is_connect(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slack_transient_codes_are_retryable() {
        for code in ["ratelimited", "service_unavailable", "internal_error"] {
            let error = ConnectorError::Api {
                provider: Provider::Slack,
                code: code.into(),
            };
            assert!(error.is_retryable(), "{code} should be retryable");
        }
    }

    #[test]
    fn permanent_failures_are_not_retryable() {
        let auth = ConnectorError::Auth {
            provider: Provider::Slack,
            detail: "invalid_auth".into(),
        };
        assert!(!auth.is_retryable());

        let api = ConnectorError::Api {
            provider: Provider::Slack,
            code: "channel_not_found".into(),
        };
        assert!(!api.is_retryable());

        let forbidden = ConnectorError::Forbidden {
            provider: Provider::ConfluenceCloud,
        };
        assert!(!forbidden.is_retryable());
    }
}
