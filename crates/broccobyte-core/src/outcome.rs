//! Workload outcomes and their canonical byte encoding.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::OutcomeStatus;

/// Where a workload's random seed came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedSource {
    /// Supplied in the job params; the payload can be regenerated.
    Supplied,
    /// Drawn by the harness; recorded, but not part of the job contract.
    Generated,
}

/// Workload-specific result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkPayload {
    /// A nonce whose hash meets the target.
    HashFound {
        nonce: u64,
        input: String,
        hash: String,
    },
    /// A bounded search exhausted its ceiling.
    NotFound { searched: u64 },
    /// Summary of a square matrix product.
    Matrix {
        size: u32,
        seed: u64,
        seed_source: SeedSource,
        checksum: f64,
        trace: f64,
    },
    /// Summary of a Mandelbrot render.
    Fractal {
        width: u32,
        height: u32,
        max_iter: u32,
        grid_digest: String,
        escaped: u64,
        inside: u64,
    },
    /// A single integer result.
    Scalar { value: u64 },
    /// Failure-only payload.
    Error { message: String },
}

impl WorkPayload {
    /// Variant name, as used in the serialized tag.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::HashFound { .. } => "hash_found",
            Self::NotFound { .. } => "not_found",
            Self::Matrix { .. } => "matrix",
            Self::Fractal { .. } => "fractal",
            Self::Scalar { .. } => "scalar",
            Self::Error { .. } => "error",
        }
    }

    /// True for an exhausted bounded search.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// False when the payload depends on a harness-generated seed.
    pub fn is_reproducible(&self) -> bool {
        !matches!(
            self,
            Self::Matrix {
                seed_source: SeedSource::Generated,
                ..
            }
        )
    }

    /// Canonical encoding: a one-byte tag, then fixed-width little-endian
    /// fields and u32-length-prefixed UTF-8 strings. Floats are encoded by
    /// their IEEE-754 bit pattern.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        match self {
            Self::HashFound { nonce, input, hash } => {
                out.push(0x01);
                out.extend_from_slice(&nonce.to_le_bytes());
                put_str(&mut out, input);
                put_str(&mut out, hash);
            }
            Self::NotFound { searched } => {
                out.push(0x02);
                out.extend_from_slice(&searched.to_le_bytes());
            }
            Self::Matrix {
                size,
                seed,
                checksum,
                trace,
                ..
            } => {
                out.push(0x03);
                out.extend_from_slice(&size.to_le_bytes());
                out.extend_from_slice(&seed.to_le_bytes());
                out.extend_from_slice(&checksum.to_bits().to_le_bytes());
                out.extend_from_slice(&trace.to_bits().to_le_bytes());
            }
            Self::Fractal {
                width,
                height,
                max_iter,
                grid_digest,
                escaped,
                inside,
            } => {
                out.push(0x04);
                out.extend_from_slice(&width.to_le_bytes());
                out.extend_from_slice(&height.to_le_bytes());
                out.extend_from_slice(&max_iter.to_le_bytes());
                put_str(&mut out, grid_digest);
                out.extend_from_slice(&escaped.to_le_bytes());
                out.extend_from_slice(&inside.to_le_bytes());
            }
            Self::Scalar { value } => {
                out.push(0x05);
                out.extend_from_slice(&value.to_le_bytes());
            }
            Self::Error { message } => {
                out.push(0xff);
                put_str(&mut out, message);
            }
        }
        out
    }

    /// One-line human summary for text records.
    pub fn summary(&self) -> String {
        match self {
            Self::HashFound { nonce, hash, .. } => format!("nonce={} hash={}", nonce, hash),
            Self::NotFound { searched } => format!("not_found searched={}", searched),
            Self::Matrix {
                size,
                seed,
                checksum,
                trace,
                ..
            } => format!(
                "matrix {}x{} seed={} checksum={} trace={}",
                size, size, seed, checksum, trace
            ),
            Self::Fractal {
                width,
                height,
                max_iter,
                escaped,
                inside,
                ..
            } => format!(
                "fractal {}x{} max_iter={} escaped={} inside={}",
                width, height, max_iter, escaped, inside
            ),
            Self::Scalar { value } => format!("scalar {}", value),
            Self::Error { message } => format!("error {}", message),
        }
    }
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

/// Timing and counters collected while a workload ran.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Wall-clock execution time in milliseconds.
    pub elapsed_ms: u64,
    /// Units of work performed (nonces, rows, terms).
    pub iterations: u64,
    /// Named workload figures (hash_rate, gflops, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub figures: BTreeMap<String, f64>,
}

impl Metrics {
    /// Create metrics with the given counters.
    pub fn new(elapsed_ms: u64, iterations: u64) -> Self {
        Self {
            elapsed_ms,
            iterations,
            figures: BTreeMap::new(),
        }
    }

    /// Builder method to add a named figure.
    pub fn with_figure(mut self, name: impl Into<String>, value: f64) -> Self {
        self.figures.insert(name.into(), value);
        self
    }
}

/// What a job produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub status: OutcomeStatus,
    pub payload: WorkPayload,
    pub metrics: Metrics,
}

impl Outcome {
    /// Create a new Outcome.
    pub fn new(status: OutcomeStatus, payload: WorkPayload, metrics: Metrics) -> Self {
        Self {
            status,
            payload,
            metrics,
        }
    }

    /// A Failure outcome carrying the error message.
    pub fn failure(message: impl Into<String>, metrics: Metrics) -> Self {
        Self::new(
            OutcomeStatus::Failure,
            WorkPayload::Error {
                message: message.into(),
            },
            metrics,
        )
    }
}
