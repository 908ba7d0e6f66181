//! Attestation types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::CoreError;

/// Reduction method used to derive a digest from a payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// SHA-256 over the canonical payload bytes, 64 hex chars.
    #[default]
    Sha256,
    /// Wrapping u32 word sum over the canonical payload bytes, `0x%08x`.
    Sum32,
}

impl DigestAlgorithm {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sum32 => "sum32",
        }
    }

    /// Exact length of a digest produced by this algorithm.
    pub fn digest_width(&self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sum32 => 10,
        }
    }

    /// Check that `digest` has this algorithm's fixed form.
    pub fn is_well_formed(&self, digest: &str) -> bool {
        if digest.len() != self.digest_width() {
            return false;
        }
        let hex = match self {
            Self::Sha256 => digest,
            Self::Sum32 => match digest.strip_prefix("0x") {
                Some(rest) => rest,
                None => return false,
            },
        };
        hex.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "sum32" => Ok(Self::Sum32),
            _ => Err(CoreError::UnknownDigest(s.to_string())),
        }
    }
}

/// Reference to the payload an attestation was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadRef {
    /// Payload variant name.
    pub kind: String,
    /// SHA-256 of the payload's canonical bytes.
    pub sha256: String,
}

impl fmt::Display for PayloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.sha256)
    }
}

/// Fixed-form digest of a job's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    pub digest: String,
    pub algorithm: DigestAlgorithm,
    pub derived_from: PayloadRef,
    /// Whether an independent verifier can regenerate the payload from the
    /// job descriptor alone.
    pub reproducible: bool,
}

impl Attestation {
    /// True if the digest matches its algorithm's fixed form.
    pub fn is_well_formed(&self) -> bool {
        self.algorithm.is_well_formed(&self.digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_formed_digests() {
        let sha = "a".repeat(64);
        assert!(DigestAlgorithm::Sha256.is_well_formed(&sha));
        assert!(!DigestAlgorithm::Sha256.is_well_formed(&"A".repeat(64)));
        assert!(!DigestAlgorithm::Sha256.is_well_formed("abc"));

        assert!(DigestAlgorithm::Sum32.is_well_formed("0x0000beef"));
        assert!(!DigestAlgorithm::Sum32.is_well_formed("0000beef00"));
        assert!(!DigestAlgorithm::Sum32.is_well_formed("0xbeef"));
    }

    #[test]
    fn test_algorithm_wire_names() {
        assert_eq!("sha256".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Sha256);
        assert_eq!("SUM32".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Sum32);
        assert!("md5".parse::<DigestAlgorithm>().is_err());
        assert_eq!(
            serde_json::to_string(&DigestAlgorithm::Sum32).unwrap(),
            "\"sum32\""
        );
    }
}
