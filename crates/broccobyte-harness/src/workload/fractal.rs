//! Mandelbrot escape-time render.
//!
//! The image itself is not kept; the payload is the SHA-256 of the escape
//! count grid together with escaped/inside pixel totals.

use broccobyte_core::{DeviceKind, WorkPayload, WorkloadKind};
use sha2::{Digest, Sha256};
use tracing::info;

use super::{map_rows, ExecutionContext, WorkOutput, Workload, WorkloadError};

const DEFAULT_SIDE: u32 = 512;
const DEFAULT_MAX_ITER: u32 = 256;
const MAX_SIDE: u32 = 16_384;

const X_MIN: f64 = -2.5;
const X_MAX: f64 = 1.0;
const Y_MIN: f64 = -1.25;
const Y_MAX: f64 = 1.25;

/// Mandelbrot set render over a fixed window of the complex plane.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fractal;

impl Workload for Fractal {
    fn kind(&self) -> WorkloadKind {
        WorkloadKind::Fractal
    }

    fn supports(&self, device: DeviceKind) -> bool {
        matches!(device, DeviceKind::GeneralCompute | DeviceKind::SoftwareOnly)
    }

    fn run(&self, ctx: &ExecutionContext<'_>) -> Result<WorkOutput, WorkloadError> {
        let params = ctx.params();
        let width = params.parse_or("width", DEFAULT_SIDE)?;
        let height = params.parse_or("height", DEFAULT_SIDE)?;
        let max_iter = params.parse_or("max_iter", DEFAULT_MAX_ITER)?;
        for (name, value) in [("width", width), ("height", height)] {
            if value == 0 || value > MAX_SIDE {
                return Err(WorkloadError::InvalidParams(format!(
                    "{} must be between 1 and {}, got {}",
                    name, MAX_SIDE, value
                )));
            }
        }
        if max_iter == 0 {
            return Err(WorkloadError::InvalidParams(
                "max_iter must be at least 1".to_string(),
            ));
        }
        ctx.limits.check_fixed(u64::from(height))?;

        let (w, h) = (width as usize, height as usize);
        let rows = map_rows(ctx, h, "fractal", |i| {
            let ci = linspace(Y_MIN, Y_MAX, h, i);
            (0..w)
                .map(|j| escape_time(linspace(X_MIN, X_MAX, w, j), ci, max_iter))
                .collect::<Vec<u32>>()
        })?;

        let mut hasher = Sha256::new();
        let mut inside = 0u64;
        for row in &rows {
            for &count in row {
                hasher.update(count.to_le_bytes());
                if count == max_iter {
                    inside += 1;
                }
            }
        }
        let escaped = (w * h) as u64 - inside;
        let grid_digest = hex::encode(hasher.finalize());
        info!(width, height, max_iter, escaped, inside, "Fractal render complete");

        Ok(WorkOutput::new(
            WorkPayload::Fractal {
                width,
                height,
                max_iter,
                grid_digest,
                escaped,
                inside,
            },
            u64::from(height),
        )
        .with_figure("pixels", (w * h) as f64))
    }
}

/// `i`-th of `n` evenly spaced points from `start` to `end` inclusive.
fn linspace(start: f64, end: f64, n: usize, i: usize) -> f64 {
    if n <= 1 {
        start
    } else {
        start + (end - start) * i as f64 / (n - 1) as f64
    }
}

/// Iterations before `z = z^2 + c` leaves the radius-2 disc, capped at
/// `max_iter`.
fn escape_time(cr: f64, ci: f64, max_iter: u32) -> u32 {
    let (mut zr, mut zi) = (0.0f64, 0.0f64);
    for n in 0..max_iter {
        if zr * zr + zi * zi > 4.0 {
            return n;
        }
        let next_r = zr * zr - zi * zi + cr;
        zi = 2.0 * zr * zi + ci;
        zr = next_r;
    }
    max_iter
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::tests::{general, job, run_with};
    use broccobyte_core::DeviceCapability;

    #[test]
    fn test_escape_time() {
        // The origin never escapes; a far point escapes after one step.
        assert_eq!(escape_time(0.0, 0.0, 50), 50);
        assert_eq!(escape_time(-1.0, 0.0, 50), 50);
        assert_eq!(escape_time(2.0, 2.0, 50), 1);
    }

    #[test]
    fn test_linspace_endpoints() {
        assert_eq!(linspace(-2.5, 1.0, 5, 0), -2.5);
        assert_eq!(linspace(-2.5, 1.0, 5, 4), 1.0);
        assert_eq!(linspace(-2.5, 1.0, 1, 0), -2.5);
    }

    #[test]
    fn test_render_is_identical_across_tiers() {
        let job = job(
            WorkloadKind::Fractal,
            &[("width", "40"), ("height", "30"), ("max_iter", "64")],
        );
        let single = run_with(&Fractal, &DeviceCapability::software(), &job, 1).unwrap();
        let pooled = run_with(&Fractal, &general(4), &job, 4).unwrap();
        assert_eq!(single.payload, pooled.payload);

        match single.payload {
            WorkPayload::Fractal {
                escaped,
                inside,
                grid_digest,
                ..
            } => {
                assert_eq!(escaped + inside, 40 * 30);
                assert!(inside > 0);
                assert!(escaped > 0);
                assert_eq!(grid_digest.len(), 64);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_rejects_zero_dimensions() {
        let job = job(WorkloadKind::Fractal, &[("width", "0")]);
        let err = run_with(&Fractal, &DeviceCapability::software(), &job, 1).unwrap_err();
        assert!(matches!(err, WorkloadError::InvalidParams(_)));
    }
}
