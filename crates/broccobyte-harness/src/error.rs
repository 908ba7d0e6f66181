//! Orchestrator-level errors.

use broccobyte_core::{CoreError, DeviceKind, WorkloadKind};
use thiserror::Error;

use crate::sink::SinkError;
use crate::workload::WorkloadError;

/// Errors that end a job in the Failing state.
///
/// Recoverable conditions (absent tiers, device mismatch, exhausted
/// search) never become a `HarnessError`.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Invalid job or parameter.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// No workload registered for the requested kind.
    #[error("No workload registered for '{0}'")]
    UnknownWorkload(WorkloadKind),

    /// No tier was available, or every available tier mismatched.
    #[error("All device tiers exhausted (attempted: {})", format_tiers(.attempted))]
    TiersExhausted { attempted: Vec<DeviceKind> },

    /// The workload failed outside the recoverable cases.
    #[error("Workload fault: {0}")]
    Workload(#[from] WorkloadError),

    /// The workload thread panicked or was aborted.
    #[error("Workload panicked: {0}")]
    WorkloadPanicked(String),

    /// Persisting the record failed.
    #[error("Result sink error: {0}")]
    Sink(#[from] SinkError),
}

fn format_tiers(tiers: &[DeviceKind]) -> String {
    if tiers.is_empty() {
        return "none".to_string();
    }
    tiers
        .iter()
        .map(DeviceKind::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiers_exhausted_message() {
        let err = HarnessError::TiersExhausted {
            attempted: vec![DeviceKind::Accelerator, DeviceKind::SoftwareOnly],
        };
        assert_eq!(
            err.to_string(),
            "All device tiers exhausted (attempted: accelerator, software_only)"
        );

        let none = HarnessError::TiersExhausted { attempted: vec![] };
        assert!(none.to_string().contains("none"));
    }
}
