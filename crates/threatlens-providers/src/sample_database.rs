//! Public malware sample database adapter (MalwareBazaar)
//!
//! Normalization rule: a sample present in the database is a known threat,
//! High risk, confidence 0.9, named by its `signature` (falling back to the
//! first tag). `hash_not_found` / `no_results` is a negative answer, Low risk,
//! confidence 0.5. Any other `query_status` is treated as a failed call.

use crate::client::{parse_error, status_error, transport_error, Endpoint};
use crate::provider::{AdapterSettings, ProviderKind, ThreatProvider};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use threatlens_core::{Fingerprint, ProviderError, ProviderVerdict, Result, RiskLevel};

const KNOWN_SAMPLE_CONFIDENCE: f32 = 0.9;
const NOT_FOUND_CONFIDENCE: f32 = 0.5;

/// Adapter for a public sample database
pub struct SampleDatabaseProvider {
    name: String,
    endpoint: Endpoint,
}

impl SampleDatabaseProvider {
    /// Create a new adapter
    pub fn new(name: impl Into<String>, settings: &AdapterSettings) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            endpoint: Endpoint::from_settings(ProviderKind::SampleDatabase, settings)?,
        })
    }
}

#[async_trait]
impl ThreatProvider for SampleDatabaseProvider {
    async fn query(
        &self,
        fingerprint: &Fingerprint,
        timeout: Duration,
    ) -> std::result::Result<ProviderVerdict, ProviderError> {
        let api_key = self.endpoint.require_key(&self.name)?;
        let url = format!("{}/", self.endpoint.base);

        let response = self
            .endpoint
            .client
            .post(url)
            .header("Auth-Key", api_key)
            .form(&[("query", "get_info"), ("hash", fingerprint.sha256())])
            .timeout(timeout)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status));
        }

        let body = response.text().await.map_err(transport_error)?;
        parse_response(&self.name, &body)
    }

    async fn health_check(&self) -> bool {
        self.endpoint.probe().await
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_configured(&self) -> bool {
        self.endpoint.api_key.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct InfoResponse {
    query_status: String,
    #[serde(default)]
    data: Vec<SampleInfo>,
}

#[derive(Debug, Deserialize)]
struct SampleInfo {
    #[serde(default)]
    signature: Option<String>,
    #[serde(default)]
    file_type: Option<String>,
    #[serde(default)]
    first_seen: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// Parse a `get_info` response body into a normalized verdict
pub fn parse_response(source: &str, body: &str) -> std::result::Result<ProviderVerdict, ProviderError> {
    let response: InfoResponse = serde_json::from_str(body).map_err(parse_error)?;

    match response.query_status.as_str() {
        "ok" => {
            let sample = response.data.first().ok_or_else(|| {
                ProviderError::unavailable("query_status ok without sample data".to_string())
            })?;
            Ok(known_sample(source, sample))
        }
        "hash_not_found" | "no_results" => Ok(ProviderVerdict::clean(source, NOT_FOUND_CONFIDENCE)
            .with_description("hash not present in the sample database")),
        other => Err(ProviderError::unavailable(format!("query_status {}", other))),
    }
}

fn known_sample(source: &str, sample: &SampleInfo) -> ProviderVerdict {
    let description = format!(
        "known {} sample, first seen {}",
        sample.file_type.as_deref().unwrap_or("unknown-type"),
        sample.first_seen.as_deref().unwrap_or("unknown")
    );
    let mut verdict = ProviderVerdict::threat(source, RiskLevel::High, KNOWN_SAMPLE_CONFIDENCE)
        .with_description(description);

    let name = sample
        .signature
        .clone()
        .filter(|s| !s.is_empty())
        .or_else(|| sample.tags.as_ref().and_then(|t| t.first().cloned()));
    if let Some(name) = name {
        verdict = verdict.with_threat_name(name);
    }
    verdict
}
