//! Core types for Threatlens

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

const SHA256_HEX_LEN: usize = 64;
const MD5_HEX_LEN: usize = 32;

/// Dual-digest identity of a scanned artifact.
///
/// Both digests are lower-case hex and validated on construction. The fields
/// are private so a fingerprint can never be re-hashed or edited after it is
/// created; equality and hashing are structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawFingerprint")]
pub struct Fingerprint {
    sha256: String,
    md5: String,
}

#[derive(Deserialize)]
struct RawFingerprint {
    sha256: String,
    md5: String,
}

impl TryFrom<RawFingerprint> for Fingerprint {
    type Error = Error;

    fn try_from(raw: RawFingerprint) -> Result<Self> {
        Fingerprint::new(raw.sha256, raw.md5)
    }
}

impl Fingerprint {
    /// Create a fingerprint from a SHA-256 and an MD5 hex digest
    pub fn new(sha256: impl AsRef<str>, md5: impl AsRef<str>) -> Result<Self> {
        Ok(Self {
            sha256: normalize_digest("sha256", sha256.as_ref(), SHA256_HEX_LEN)?,
            md5: normalize_digest("md5", md5.as_ref(), MD5_HEX_LEN)?,
        })
    }

    /// SHA-256 digest, lower-case hex
    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    /// MD5 digest, lower-case hex
    pub fn md5(&self) -> &str {
        &self.md5
    }

    /// Short form for log lines
    pub fn short(&self) -> &str {
        &self.sha256[..12]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.sha256)
    }
}

fn normalize_digest(algorithm: &str, digest: &str, expected_len: usize) -> Result<String> {
    let digest = digest.trim();
    if digest.len() != expected_len {
        return Err(Error::fingerprint(format!(
            "{} digest must be {} hex characters, got {}",
            algorithm,
            expected_len,
            digest.len()
        )));
    }
    if !digest.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::fingerprint(format!(
            "{} digest contains non-hex characters",
            algorithm
        )));
    }
    Ok(digest.to_ascii_lowercase())
}

/// Normalized risk level, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Lower-case label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
