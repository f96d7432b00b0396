//! Multi-engine scanner aggregate adapter (VirusTotal API v3)
//!
//! Normalization rule:
//! - detection ratio = (malicious + suspicious) / engines that reported
//! - risk: ratio >= 0.5 Critical, >= 0.25 High, >= 0.1 Medium, otherwise Low
//! - positive when at least 3 engines say malicious or the ratio is >= 0.1;
//!   confidence = min(1.0, 0.5 + ratio)
//! - analysed but not positive: negative, confidence 0.8
//! - hash unknown to the service (404): negative, Low, confidence 0.2
//! - threat name: `popular_threat_classification.suggested_threat_label`

use crate::client::{parse_error, status_error, transport_error, Endpoint};
use crate::provider::{AdapterSettings, ProviderKind, ThreatProvider};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use threatlens_core::{Fingerprint, ProviderError, ProviderVerdict, Result, RiskLevel};
use tracing::debug;

const MALICIOUS_ENGINE_FLOOR: u32 = 3;
const POSITIVE_RATIO: f32 = 0.1;
const ANALYSED_CLEAN_CONFIDENCE: f32 = 0.8;
const UNKNOWN_HASH_CONFIDENCE: f32 = 0.2;

/// Adapter for a multi-engine scanning service
pub struct MultiEngineProvider {
    name: String,
    endpoint: Endpoint,
}

impl MultiEngineProvider {
    /// Create a new adapter
    pub fn new(name: impl Into<String>, settings: &AdapterSettings) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            endpoint: Endpoint::from_settings(ProviderKind::MultiEngine, settings)?,
        })
    }
}

#[async_trait]
impl ThreatProvider for MultiEngineProvider {
    async fn query(
        &self,
        fingerprint: &Fingerprint,
        timeout: Duration,
    ) -> std::result::Result<ProviderVerdict, ProviderError> {
        let api_key = self.endpoint.require_key(&self.name)?;
        let url = format!("{}/files/{}", self.endpoint.base, fingerprint.sha256());

        let response = self
            .endpoint
            .client
            .get(url)
            .header("x-apikey", api_key)
            .timeout(timeout)
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!("{}: {} not known", self.name, fingerprint.short());
                Ok(unknown_hash(&self.name))
            }
            status if status.is_success() => {
                let body = response.text().await.map_err(transport_error)?;
                parse_report(&self.name, &body)
            }
            status => Err(status_error(status)),
        }
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
struct FileReport {
    data: FileData,
}

#[derive(Debug, Deserialize)]
struct FileData {
    attributes: FileAttributes,
}

#[derive(Debug, Default, Deserialize)]
struct FileAttributes {
    #[serde(default)]
    last_analysis_stats: AnalysisStats,
    #[serde(default)]
    popular_threat_classification: Option<ThreatClassification>,
    #[serde(default)]
    meaningful_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AnalysisStats {
    #[serde(default)]
    malicious: u32,
    #[serde(default)]
    suspicious: u32,
    #[serde(default)]
    undetected: u32,
    #[serde(default)]
    harmless: u32,
}

impl AnalysisStats {
    fn engines(&self) -> u32 {
        self.malicious
            .saturating_add(self.suspicious)
            .saturating_add(self.undetected)
            .saturating_add(self.harmless)
    }

    fn detection_ratio(&self) -> f32 {
        match self.engines() {
            0 => 0.0,
            engines => self.malicious.saturating_add(self.suspicious) as f32 / engines as f32,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ThreatClassification {
    #[serde(default)]
    suggested_threat_label: Option<String>,
}

/// Parse a file report body into a normalized verdict
pub fn parse_report(source: &str, body: &str) -> std::result::Result<ProviderVerdict, ProviderError> {
    let report: FileReport = serde_json::from_str(body).map_err(parse_error)?;
    Ok(normalize(source, &report.data.attributes))
}

fn normalize(source: &str, attributes: &FileAttributes) -> ProviderVerdict {
    let stats = &attributes.last_analysis_stats;
    let ratio = stats.detection_ratio();
    let description = format!(
        "{}/{} engines flagged the sample",
        stats.malicious.saturating_add(stats.suspicious),
        stats.engines()
    );

    let positive = stats.malicious >= MALICIOUS_ENGINE_FLOOR || ratio >= POSITIVE_RATIO;
    if !positive {
        return ProviderVerdict::clean(source, ANALYSED_CLEAN_CONFIDENCE).with_description(description);
    }

    let mut verdict = ProviderVerdict::threat(source, risk_for_ratio(ratio), (0.5 + ratio).min(1.0))
        .with_description(description);

    let label = attributes
        .popular_threat_classification
        .as_ref()
        .and_then(|c| c.suggested_threat_label.clone())
        .or_else(|| attributes.meaningful_name.clone());
    if let Some(label) = label {
        verdict = verdict.with_threat_name(label);
    }
    verdict
}

fn risk_for_ratio(ratio: f32) -> RiskLevel {
    if ratio >= 0.5 {
        RiskLevel::Critical
    } else if ratio >= 0.25 {
        RiskLevel::High
    } else if ratio >= 0.1 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

fn unknown_hash(source: &str) -> ProviderVerdict {
    ProviderVerdict::clean(source, UNKNOWN_HASH_CONFIDENCE)
        .with_description("hash not present in the multi-engine corpus")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(malicious: u32, suspicious: u32, undetected: u32, label: Option<&str>) -> String {
        let classification = match label {
            Some(label) => format!(
                r#","popular_threat_classification":{{"suggested_threat_label":"{}"}}"#,
                label
            ),
            None => String::new(),
        };
        format!(
            r#"{{"data":{{"id":"x","type":"file","attributes":{{"last_analysis_stats":{{"malicious":{},"suspicious":{},"undetected":{},"harmless":0,"timeout":0}}{}}}}}}}"#,
            malicious, suspicious, undetected, classification
        )
    }

    #[test]
    fn test_widely_detected_is_critical() {
        let verdict = parse_report("virustotal", &report(50, 2, 18, Some("trojan.emotet/heodo"))).unwrap();
        assert!(verdict.is_threat);
        assert_eq!(verdict.risk_level, RiskLevel::Critical);
        assert_eq!(verdict.threat_name.as_deref(), Some("trojan.emotet/heodo"));
        assert_eq!(verdict.confidence, 1.0);
        assert_eq!(verdict.description, "52/70 engines flagged the sample");
    }

    #[test]
    fn test_three_engines_is_positive_even_at_low_ratio() {
        let verdict = parse_report("virustotal", &report(3, 0, 67, None)).unwrap();
        assert!(verdict.is_threat);
        assert_eq!(verdict.risk_level, RiskLevel::Low);
        assert!(verdict.threat_name.is_none());
    }

    #[test]
    fn test_clean_report() {
        let verdict = parse_report("virustotal", &report(1, 0, 69, None)).unwrap();
        assert!(!verdict.is_threat);
        assert_eq!(verdict.confidence, ANALYSED_CLEAN_CONFIDENCE);
    }

    #[test]
    fn test_malformed_body_is_unavailable() {
        let err = parse_report("virustotal", "<html>").unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }

    #[test]
    fn test_ratio_buckets() {
        assert_eq!(risk_for_ratio(0.3), RiskLevel::High);
        assert_eq!(risk_for_ratio(0.12), RiskLevel::Medium);
        assert_eq!(risk_for_ratio(0.0), RiskLevel::Low);
    }

    #[tokio::test]
    async fn test_missing_key_short_circuits() {
        let provider = MultiEngineProvider::new("virustotal", &AdapterSettings::default()).unwrap();
        let fp = Fingerprint::new("a".repeat(64), "b".repeat(32)).unwrap();

        assert!(!provider.is_configured());
        let err = provider.query(&fp, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ProviderError::ConfigurationMissing(_)));
    }
}
