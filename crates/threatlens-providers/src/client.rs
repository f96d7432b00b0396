//! Shared HTTP plumbing for the built-in adapters

use crate::provider::{AdapterSettings, ProviderKind};
use crate::security::{validate_endpoint, EndpointPolicy};
use reqwest::StatusCode;
use std::time::Duration;
use threatlens_core::{Error, ProviderError, Result};
use tracing::debug;

const USER_AGENT: &str = concat!("threatlens/", env!("CARGO_PKG_VERSION"));
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolved connection details for one adapter
#[derive(Clone)]
pub(crate) struct Endpoint {
    pub client: reqwest::Client,
    pub base: String,
    pub api_key: Option<String>,
}

impl Endpoint {
    /// Validate settings and build the HTTP client
    pub fn from_settings(kind: ProviderKind, settings: &AdapterSettings) -> Result<Self> {
        let raw = settings
            .endpoint
            .as_deref()
            .unwrap_or_else(|| kind.default_endpoint());

        let policy = if settings.allow_insecure_endpoint {
            EndpointPolicy::development()
        } else {
            EndpointPolicy::default()
        };
        let url = validate_endpoint(raw, &policy)
            .map_err(|e| Error::config(format!("Invalid {} endpoint '{}': {}", kind, raw, e)))?;

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base: url.as_str().trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone().filter(|k| !k.trim().is_empty()),
        })
    }

    /// API key, or the configuration-missing error for `provider`
    pub fn require_key(&self, provider: &str) -> std::result::Result<&str, ProviderError> {
        self.api_key.as_deref().ok_or_else(|| {
            ProviderError::configuration_missing(format!("no API key configured for {}", provider))
        })
    }

    /// Probe the endpoint root; anything but a transport error or 5xx is healthy
    pub async fn probe(&self) -> bool {
        match self
            .client
            .get(self.base.as_str())
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => !response.status().is_server_error(),
            Err(e) => {
                debug!("Health probe to {} failed: {}", self.base, e);
                false
            }
        }
    }
}

/// Map a transport error to the provider taxonomy
pub(crate) fn transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::unavailable(err.to_string())
    }
}

/// Map a non-success status that carries no verdict
pub(crate) fn status_error(status: StatusCode) -> ProviderError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ProviderError::unavailable(format!("authentication rejected ({})", status))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            ProviderError::unavailable("upstream quota exhausted (429)".to_string())
        }
        other => ProviderError::unavailable(format!("unexpected status {}", other)),
    }
}

/// Map a body that failed to parse
pub(crate) fn parse_error(err: serde_json::Error) -> ProviderError {
    ProviderError::unavailable(format!("malformed response: {}", err))
}
