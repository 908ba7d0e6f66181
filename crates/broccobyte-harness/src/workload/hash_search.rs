//! Proof-of-work style nonce search.
//!
//! Hashes `<nonce_prefix><n>` for `n = 0, 1, 2, ...` with SHA-256 and stops
//! at the first digest whose hex form starts with `target_prefix`. Running
//! out of iterations or time is a valid negative result, not an error.

use broccobyte_core::{DeviceKind, WorkPayload, WorkloadKind};
use sha2::{Digest, Sha256};
use tracing::info;

use super::{ExecutionContext, WorkOutput, Workload, WorkloadError};
use crate::progress::Cadence;

const DEFAULT_TARGET: &str = "0000";
const DEFAULT_NONCE_PREFIX: &str = "BroccoByte-";
const DEFAULT_MAX_ITERATIONS: u64 = 1_000_000;
const REPORT_EVERY: u64 = 100_000;
const BLOCK_PER_THREAD: u64 = 4096;

/// SHA-256 nonce search.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashSearch;

impl Workload for HashSearch {
    fn kind(&self) -> WorkloadKind {
        WorkloadKind::HashSearch
    }

    fn supports(&self, device: DeviceKind) -> bool {
        matches!(device, DeviceKind::GeneralCompute | DeviceKind::SoftwareOnly)
    }

    fn run(&self, ctx: &ExecutionContext<'_>) -> Result<WorkOutput, WorkloadError> {
        let params = ctx.params();
        let target = params
            .str_or("target_prefix", DEFAULT_TARGET)
            .to_ascii_lowercase();
        if target.len() > 64 || !target.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(WorkloadError::InvalidParams(format!(
                "target_prefix must be at most 64 hex characters, got '{}'",
                target
            )));
        }
        let nonce_prefix = params.str_or("nonce_prefix", DEFAULT_NONCE_PREFIX);
        let cap = ctx.limits.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS);

        let mut cadence = Cadence::every(REPORT_EVERY.min((cap / 10).max(1)));
        let block = BLOCK_PER_THREAD * ctx.threads.max(1) as u64;
        let mut next = 0u64;

        while next < cap {
            let end = next.saturating_add(block).min(cap);
            let found = if ctx.threads > 1 {
                search_parallel(nonce_prefix, &target, next, end, ctx.threads)?
            } else {
                search_range(nonce_prefix, &target, next, end)
            };

            if let Some((nonce, hash)) = found {
                let hashed = nonce + 1;
                info!(nonce, hash = %hash, "Target prefix found");
                return Ok(WorkOutput::new(
                    WorkPayload::HashFound {
                        nonce,
                        input: format!("{}{}", nonce_prefix, nonce),
                        hash,
                    },
                    hashed,
                )
                .with_figure("hash_rate", rate(hashed, ctx.elapsed().as_secs_f64())));
            }

            next = end;
            if cadence.tick(next) {
                ctx.progress.checkpoint(
                    next as f64 / cap as f64,
                    format!("{} nonces searched", next),
                );
            }
            if next < cap && ctx.deadline_passed() {
                info!(searched = next, "Time limit reached before target was found");
                break;
            }
        }

        info!(searched = next, cap, "Target prefix not found");
        Ok(
            WorkOutput::new(WorkPayload::NotFound { searched: next }, next)
                .with_figure("hash_rate", rate(next, ctx.elapsed().as_secs_f64())),
        )
    }
}

/// Lowercase hex SHA-256 of `<prefix><nonce>`.
pub fn hash_nonce(prefix: &str, nonce: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prefix.as_bytes());
    hasher.update(nonce.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// First matching nonce in `lo..hi`.
fn search_range(prefix: &str, target: &str, lo: u64, hi: u64) -> Option<(u64, String)> {
    (lo..hi).find_map(|nonce| {
        let hash = hash_nonce(prefix, nonce);
        hash.starts_with(target).then_some((nonce, hash))
    })
}

/// First matching nonce in `lo..hi`, with the range split across threads.
fn search_parallel(
    prefix: &str,
    target: &str,
    lo: u64,
    hi: u64,
    threads: usize,
) -> Result<Option<(u64, String)>, WorkloadError> {
    let chunk = (hi - lo).div_ceil(threads as u64).max(1);
    let results = std::thread::scope(|scope| {
        let handles: Vec<_> = (lo..hi)
            .step_by(chunk as usize)
            .map(|start| {
                let end = (start + chunk).min(hi);
                scope.spawn(move || search_range(prefix, target, start, end))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join())
            .collect::<Result<Vec<_>, _>>()
    })
    .map_err(|_| WorkloadError::Fault("hash search worker thread panicked".to_string()))?;

    // Each range reports its own first match; the lowest nonce wins.
    Ok(results.into_iter().flatten().min_by_key(|(nonce, _)| *nonce))
}

fn rate(count: u64, secs: f64) -> f64 {
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}
