//! Community threat feed adapter (AlienVault OTX)
//!
//! Normalization rule, by the number of community pulses referencing the
//! hash:
//!
//! | pulses | verdict  | risk   | confidence |
//! |--------|----------|--------|------------|
//! | >= 5   | positive | High   | 0.8        |
//! | 2-4    | positive | Medium | 0.6        |
//! | 1      | positive | Low    | 0.4        |
//! | 0      | negative | Low    | 0.3        |
//!
//! The threat name is the first malware family, else the first pulse name.

use crate::client::{parse_error, status_error, transport_error, Endpoint};
use crate::provider::{AdapterSettings, ProviderKind, ThreatProvider};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use threatlens_core::{Fingerprint, ProviderError, ProviderVerdict, Result, RiskLevel};

const NO_PULSES_CONFIDENCE: f32 = 0.3;

/// Adapter for a community indicator feed
pub struct CommunityFeedProvider {
    name: String,
    endpoint: Endpoint,
}

impl CommunityFeedProvider {
    /// Create a new adapter
    pub fn new(name: impl Into<String>, settings: &AdapterSettings) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            endpoint: Endpoint::from_settings(ProviderKind::CommunityFeed, settings)?,
        })
    }
}

#[async_trait]
impl ThreatProvider for CommunityFeedProvider {
    async fn query(
        &self,
        fingerprint: &Fingerprint,
        timeout: Duration,
    ) -> std::result::Result<ProviderVerdict, ProviderError> {
        let api_key = self.endpoint.require_key(&self.name)?;
        let url = format!(
            "{}/indicators/file/{}/general",
            self.endpoint.base,
            fingerprint.sha256()
        );

        let response = self
            .endpoint
            .client
            .get(url)
            .header("X-OTX-API-KEY", api_key)
            .timeout(timeout)
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(no_pulses(&self.name)),
            status if status.is_success() => {
                let body = response.text().await.map_err(transport_error)?;
                parse_indicator(&self.name, &body)
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
struct IndicatorGeneral {
    #[serde(default)]
    pulse_info: PulseInfo,
}

#[derive(Debug, Default, Deserialize)]
struct PulseInfo {
    #[serde(default)]
    count: u32,
    #[serde(default)]
    pulses: Vec<Pulse>,
}

#[derive(Debug, Deserialize)]
struct Pulse {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    malware_families: Vec<MalwareFamily>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MalwareFamily {
    Named { display_name: String },
    Plain(String),
}

impl MalwareFamily {
    fn display_name(&self) -> &str {
        match self {
            Self::Named { display_name } => display_name,
            Self::Plain(name) => name,
        }
    }
}

/// Parse an indicator `general` section into a normalized verdict
pub fn parse_indicator(source: &str, body: &str) -> std::result::Result<ProviderVerdict, ProviderError> {
    let indicator: IndicatorGeneral = serde_json::from_str(body).map_err(parse_error)?;
    let info = &indicator.pulse_info;
    let count = info.count.max(info.pulses.len() as u32);

    let (risk, confidence) = match count {
        0 => return Ok(no_pulses(source)),
        1 => (RiskLevel::Low, 0.4),
        2..=4 => (RiskLevel::Medium, 0.6),
        _ => (RiskLevel::High, 0.8),
    };

    let mut verdict = ProviderVerdict::threat(source, risk, confidence)
        .with_description(format!("referenced by {} community pulses", count));

    let family = info
        .pulses
        .iter()
        .flat_map(|p| p.malware_families.iter())
        .map(|f| f.display_name().to_string())
        .find(|n| !n.is_empty());
    let name = family.or_else(|| info.pulses.iter().find_map(|p| p.name.clone()));
    if let Some(name) = name {
        verdict = verdict.with_threat_name(name);
    }
    Ok(verdict)
}

fn no_pulses(source: &str) -> ProviderVerdict {
    ProviderVerdict::clean(source, NO_PULSES_CONFIDENCE)
        .with_description("no community pulses reference this hash")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_many_pulses_is_high() {
        let body = r#"{"pulse_info":{"count":7,"pulses":[
            {"name":"Qakbot campaign","malware_families":[{"id":"qakbot","display_name":"Qakbot"}]}
        ]}}"#;
        let verdict = parse_indicator("otx", body).unwrap();
        assert!(verdict.is_threat);
        assert_eq!(verdict.risk_level, RiskLevel::High);
        assert_eq!(verdict.threat_name.as_deref(), Some("Qakbot"));
    }

    #[test]
    fn test_pulse_name_when_no_family() {
        let body = r#"{"pulse_info":{"count":2,"pulses":[{"name":"Phishing kit"},{"name":"Other"}]}}"#;
        let verdict = parse_indicator("otx", body).unwrap();
        assert_eq!(verdict.risk_level, RiskLevel::Medium);
        assert_eq!(verdict.threat_name.as_deref(), Some("Phishing kit"));
    }

    #[test]
    fn test_plain_string_families() {
        let body = r#"{"pulse_info":{"count":1,"pulses":[{"malware_families":["RedLine"]}]}}"#;
        let verdict = parse_indicator("otx", body).unwrap();
        assert_eq!(verdict.risk_level, RiskLevel::Low);
        assert_eq!(verdict.threat_name.as_deref(), Some("RedLine"));
    }

    #[test]
    fn test_no_pulses_is_negative() {
        let verdict = parse_indicator("otx", r#"{"pulse_info":{"count":0,"pulses":[]}}"#).unwrap();
        assert!(!verdict.is_threat);
        assert_eq!(verdict.confidence, NO_PULSES_CONFIDENCE);

        let verdict = parse_indicator("otx", "{}").unwrap();
        assert!(!verdict.is_threat);
    }
}
