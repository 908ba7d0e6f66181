//! Progress checkpoints.

use std::time::Duration;

/// A best-effort progress signal from a running workload.
///
/// Never persisted; only observed through the reporting channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressCheckpoint {
    /// Fraction of total work done, clamped to 0.0..=1.0.
    pub fraction_complete: f64,
    /// Time since the workload started.
    pub elapsed: Duration,
    /// Free text.
    pub note: String,
}

impl ProgressCheckpoint {
    /// Create a checkpoint, clamping the fraction into range.
    pub fn new(fraction: f64, elapsed: Duration, note: impl Into<String>) -> Self {
        let fraction_complete = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        Self {
            fraction_complete,
            elapsed,
            note: note.into(),
        }
    }

    /// Percentage for display.
    pub fn percent(&self) -> f64 {
        self.fraction_complete * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction_is_clamped() {
        assert_eq!(ProgressCheckpoint::new(1.7, Duration::ZERO, "").fraction_complete, 1.0);
        assert_eq!(ProgressCheckpoint::new(-0.2, Duration::ZERO, "").fraction_complete, 0.0);
        assert_eq!(ProgressCheckpoint::new(f64::NAN, Duration::ZERO, "").fraction_complete, 0.0);
        assert_eq!(ProgressCheckpoint::new(0.5, Duration::ZERO, "").percent(), 50.0);
    }
}
