//! Sum of squares, the baseline task that needs nothing but a CPU.

use broccobyte_core::{DeviceKind, WorkPayload, WorkloadKind};

use super::{map_rows, ExecutionContext, WorkOutput, Workload, WorkloadError};

const DEFAULT_TERMS: u64 = 1_000_000;
const SLICES: u64 = 1000;

/// `sum(i^2) for i < max_iterations`, in wrapping u64 arithmetic.
#[derive(Debug, Clone, Copy, Default)]
pub struct SumSquares;

impl Workload for SumSquares {
    fn kind(&self) -> WorkloadKind {
        WorkloadKind::SumSquares
    }

    fn supports(&self, device: DeviceKind) -> bool {
        matches!(device, DeviceKind::GeneralCompute | DeviceKind::SoftwareOnly)
    }

    fn run(&self, ctx: &ExecutionContext<'_>) -> Result<WorkOutput, WorkloadError> {
        let terms = ctx.limits.max_iterations.unwrap_or(DEFAULT_TERMS);
        let slices = terms.clamp(1, SLICES);
        let width = terms.div_ceil(slices);

        // Wrapping addition is associative, so slicing does not change the sum.
        let partials = map_rows(ctx, slices as usize, "sum_squares", |slice| {
            let lo = slice as u64 * width;
            let hi = (lo + width).min(terms);
            (lo..hi).fold(0u64, |acc, i| acc.wrapping_add(i.wrapping_mul(i)))
        })?;
        let value = partials.into_iter().fold(0u64, u64::wrapping_add);

        Ok(WorkOutput::new(WorkPayload::Scalar { value }, terms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::tests::{general, job, run_with};
    use broccobyte_core::DeviceCapability;

    #[test]
    fn test_small_sum() {
        let job = job(WorkloadKind::SumSquares, &[("max_iterations", "4")]);
        let output = run_with(&SumSquares, &DeviceCapability::software(), &job, 1).unwrap();
        assert_eq!(output.payload, WorkPayload::Scalar { value: 14 });
        assert_eq!(output.iterations, 4);
    }

    #[test]
    fn test_closed_form_matches() {
        let n: u64 = 1_000_000;
        let expected = (n - 1) * n * (2 * n - 1) / 6;
        let job = job(WorkloadKind::SumSquares, &[]);
        let single = run_with(&SumSquares, &DeviceCapability::software(), &job, 1).unwrap();
        let pooled = run_with(&SumSquares, &general(4), &job, 4).unwrap();
        assert_eq!(single.payload, WorkPayload::Scalar { value: expected });
        assert_eq!(single.payload, pooled.payload);
    }

    #[test]
    fn test_zero_terms() {
        let job = job(WorkloadKind::SumSquares, &[("max_iterations", "0")]);
        let output = run_with(&SumSquares, &DeviceCapability::software(), &job, 1).unwrap();
        assert_eq!(output.payload, WorkPayload::Scalar { value: 0 });
    }
}
