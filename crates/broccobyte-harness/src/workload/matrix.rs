//! Dense matrix multiplication benchmark.
//!
//! Both operands are expanded from a 64-bit seed with SHA-256 in counter
//! mode, so any verifier holding the seed can rebuild them bit for bit.
//! When the job supplies no seed the harness draws one; the seed is still
//! recorded, but the attestation is marked non-reproducible.

use broccobyte_core::{DeviceKind, SeedSource, WorkPayload, WorkloadKind};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use super::{map_rows, ExecutionContext, WorkOutput, Workload, WorkloadError};

const DEFAULT_SIZE: u32 = 256;
const MAX_SIZE: u32 = 8192;

/// Square matrix product `C = A x B`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatrixMultiply;

impl Workload for MatrixMultiply {
    fn kind(&self) -> WorkloadKind {
        WorkloadKind::MatrixMultiply
    }

    fn supports(&self, device: DeviceKind) -> bool {
        matches!(device, DeviceKind::GeneralCompute | DeviceKind::SoftwareOnly)
    }

    fn run(&self, ctx: &ExecutionContext<'_>) -> Result<WorkOutput, WorkloadError> {
        let params = ctx.params();
        let size = params.parse_or("size", DEFAULT_SIZE)?;
        if size == 0 || size > MAX_SIZE {
            return Err(WorkloadError::InvalidParams(format!(
                "size must be between 1 and {}, got {}",
                MAX_SIZE, size
            )));
        }
        ctx.limits.check_fixed(u64::from(size))?;

        let (seed, seed_source) = match params.parse::<u64>("seed")? {
            Some(seed) => (seed, SeedSource::Supplied),
            None => {
                let seed = rand::random::<u64>();
                warn!(seed, "No seed supplied; payload will not be reproducible");
                (seed, SeedSource::Generated)
            }
        };

        let n = size as usize;
        let a = fill(seed, 0, n * n);
        let b = fill(seed, 1, n * n);

        let rows = map_rows(ctx, n, "matrix", |i| {
            let mut row = vec![0.0f64; n];
            for k in 0..n {
                let aik = a[i * n + k];
                let b_row = &b[k * n..(k + 1) * n];
                for (c, bkj) in row.iter_mut().zip(b_row) {
                    *c += aik * bkj;
                }
            }
            row
        })?;

        let mut checksum = 0.0f64;
        let mut trace = 0.0f64;
        for (i, row) in rows.iter().enumerate() {
            checksum += row.iter().sum::<f64>();
            trace += row[i];
        }

        let secs = ctx.elapsed().as_secs_f64();
        let flops = 2.0 * (n as f64).powi(3);
        let gflops = if secs > 0.0 { flops / secs / 1e9 } else { 0.0 };
        info!(size, seed, checksum, gflops, "Matrix product complete");

        Ok(WorkOutput::new(
            WorkPayload::Matrix {
                size,
                seed,
                seed_source,
                checksum,
                trace,
            },
            u64::from(size),
        )
        .with_figure("gflops", gflops))
    }
}

/// `len` values in [-1, 1) expanded from `(seed, stream)`.
fn fill(seed: u64, stream: u8, len: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(len);
    let mut counter = 0u64;
    while out.len() < len {
        let mut hasher = Sha256::new();
        hasher.update(seed.to_le_bytes());
        hasher.update([stream]);
        hasher.update(counter.to_le_bytes());
        let block = hasher.finalize();
        for word in block.chunks_exact(8) {
            if out.len() == len {
                break;
            }
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(word);
            out.push(unit(u64::from_le_bytes(bytes)));
        }
        counter += 1;
    }
    out
}

/// Top 53 bits of `x` scaled into [-1, 1).
fn unit(x: u64) -> f64 {
    let mantissa = (x >> 11) as f64 / (1u64 << 53) as f64;
    mantissa * 2.0 - 1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::tests::{general, job, run_with};
    use broccobyte_core::DeviceCapability;

    #[test]
    fn test_fill_is_deterministic_and_in_range() {
        let a = fill(7, 0, 100);
        assert_eq!(a, fill(7, 0, 100));
        assert_ne!(a, fill(7, 1, 100));
        assert_ne!(a, fill(8, 0, 100));
        assert!(a.iter().all(|v| (-1.0..1.0).contains(v)));
    }

    #[test]
    fn test_seeded_product_is_identical_across_tiers() {
        let job = job(
            WorkloadKind::MatrixMultiply,
            &[("size", "33"), ("seed", "1234")],
        );
        let single = run_with(&MatrixMultiply, &DeviceCapability::software(), &job, 1).unwrap();
        let pooled = run_with(&MatrixMultiply, &general(3), &job, 3).unwrap();
        assert_eq!(single.payload, pooled.payload);
        assert_eq!(single.iterations, 33);
    }

    #[test]
    fn test_identity_like_checksum() {
        // 1x1 product is a single multiplication.
        let job = job(WorkloadKind::MatrixMultiply, &[("size", "1"), ("seed", "5")]);
        let output = run_with(&MatrixMultiply, &DeviceCapability::software(), &job, 1).unwrap();
        let a = fill(5, 0, 1)[0];
        let b = fill(5, 1, 1)[0];
        match output.payload {
            WorkPayload::Matrix {
                checksum, trace, ..
            } => {
                assert_eq!(checksum, a * b);
                assert_eq!(trace, a * b);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_missing_seed_is_generated_and_flagged() {
        let job = job(WorkloadKind::MatrixMultiply, &[("size", "4")]);
        let output = run_with(&MatrixMultiply, &DeviceCapability::software(), &job, 1).unwrap();
        assert!(matches!(
            output.payload,
            WorkPayload::Matrix {
                seed_source: SeedSource::Generated,
                ..
            }
        ));
        assert!(!output.payload.is_reproducible());
    }

    #[test]
    fn test_size_bounds() {
        for size in ["0", "9000"] {
            let job = job(WorkloadKind::MatrixMultiply, &[("size", size), ("seed", "1")]);
            let err = run_with(&MatrixMultiply, &DeviceCapability::software(), &job, 1)
                .unwrap_err();
            assert!(matches!(err, WorkloadError::InvalidParams(_)));
        }

        let job = job(
            WorkloadKind::MatrixMultiply,
            &[("size", "64"), ("seed", "1"), ("max_iterations", "8")],
        );
        let err = run_with(&MatrixMultiply, &DeviceCapability::software(), &job, 1).unwrap_err();
        assert!(matches!(err, WorkloadError::CeilingExceeded { .. }));
    }
}
