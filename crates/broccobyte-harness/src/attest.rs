//! Digest derivation for workload payloads.

use broccobyte_core::{Attestation, DigestAlgorithm, PayloadRef, WorkPayload};
use sha2::{Digest, Sha256};

/// Derives fixed-form attestations from payloads.
///
/// Attestation is a pure function of the payload's canonical bytes and
/// the algorithm, so attesting the same payload twice yields the same
/// digest.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttestationEngine {
    default_algorithm: DigestAlgorithm,
}

impl AttestationEngine {
    /// Engine using `default_algorithm` unless a job asks for another.
    pub fn new(default_algorithm: DigestAlgorithm) -> Self {
        Self { default_algorithm }
    }

    /// Attest `payload`, using `algorithm` or the engine default.
    pub fn attest(&self, payload: &WorkPayload, algorithm: Option<DigestAlgorithm>) -> Attestation {
        let algorithm = algorithm.unwrap_or(self.default_algorithm);
        let bytes = payload.canonical_bytes();
        Attestation {
            digest: digest(algorithm, &bytes),
            algorithm,
            derived_from: PayloadRef {
                kind: payload.kind_name().to_string(),
                sha256: hex::encode(Sha256::digest(&bytes)),
            },
            reproducible: payload.is_reproducible(),
        }
    }

    /// Recompute the digest of `payload` and compare it with `attestation`.
    pub fn verify(&self, attestation: &Attestation, payload: &WorkPayload) -> bool {
        attestation.is_well_formed()
            && attestation.derived_from.kind == payload.kind_name()
            && digest(attestation.algorithm, &payload.canonical_bytes()) == attestation.digest
    }
}

/// Reduce `bytes` to a digest string of the algorithm's fixed form.
pub fn digest(algorithm: DigestAlgorithm, bytes: &[u8]) -> String {
    match algorithm {
        DigestAlgorithm::Sha256 => hex::encode(Sha256::digest(bytes)),
        DigestAlgorithm::Sum32 => format!("0x{:08x}", sum32(bytes)),
    }
}

/// Wrapping sum of little-endian u32 words; a short last word is
/// zero-padded.
fn sum32(bytes: &[u8]) -> u32 {
    bytes.chunks(4).fold(0u32, |acc, chunk| {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        acc.wrapping_add(u32::from_le_bytes(word))
    })
}
