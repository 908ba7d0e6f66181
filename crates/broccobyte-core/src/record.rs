//! The write-once job record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Attestation, DeviceCapability, DeviceKind, JobId, Outcome, OutcomeStatus, WorkloadKind};

/// Terminal value for an exhausted bounded search.
pub const NOT_FOUND: &str = "not_found";

/// Terminal value for a failed job.
pub const ERROR: &str = "error";

/// The single source of truth for what happened to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Job identifier.
    pub job_id: JobId,

    /// Echo of the consumer input.
    pub input_data: String,

    /// Workload that was requested.
    pub workload_kind: WorkloadKind,

    /// Device the workload completed on, if any tier ran it.
    pub device: Option<DeviceCapability>,

    /// Tiers attempted, in order.
    pub attempted: Vec<DeviceKind>,

    /// Digest of the payload. Absent on failure.
    pub attestation: Option<Attestation>,

    /// What the workload produced.
    pub outcome: Outcome,

    /// When the job entered the harness.
    pub started_at: DateTime<Utc>,

    /// When the job reached a terminal state.
    pub finished_at: DateTime<Utc>,

    /// Error message if the job failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResultRecord {
    /// Terminal status.
    pub fn status(&self) -> OutcomeStatus {
        self.outcome.status
    }

    /// Value carried by the sentinel line.
    pub fn terminal_value(&self) -> &str {
        if self.outcome.status == OutcomeStatus::Failure {
            return ERROR;
        }
        if self.outcome.payload.is_not_found() {
            return NOT_FOUND;
        }
        match &self.attestation {
            Some(attestation) => &attestation.digest,
            None => ERROR,
        }
    }

    /// Wall-clock time between start and finish, in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DigestAlgorithm, Metrics, PayloadRef, WorkPayload};

    fn record(status: OutcomeStatus, payload: WorkPayload) -> ResultRecord {
        let now = Utc::now();
        ResultRecord {
            job_id: JobId::new("42"),
            input_data: "test".to_string(),
            workload_kind: WorkloadKind::HashSearch,
            device: Some(DeviceCapability::software()),
            attempted: vec![DeviceKind::SoftwareOnly],
            attestation: Some(Attestation {
                digest: "f".repeat(64),
                algorithm: DigestAlgorithm::Sha256,
                derived_from: PayloadRef {
                    kind: payload.kind_name().to_string(),
                    sha256: "0".repeat(64),
                },
                reproducible: true,
            }),
            outcome: Outcome::new(status, payload, Metrics::default()),
            started_at: now,
            finished_at: now,
            error: None,
        }
    }

    #[test]
    fn test_terminal_value() {
        let found = record(OutcomeStatus::Success, WorkPayload::Scalar { value: 1 });
        assert_eq!(found.terminal_value(), "f".repeat(64));

        let missing = record(OutcomeStatus::Success, WorkPayload::NotFound { searched: 5 });
        assert_eq!(missing.terminal_value(), NOT_FOUND);

        let failed = record(
            OutcomeStatus::Failure,
            WorkPayload::Error {
                message: "boom".to_string(),
            },
        );
        assert_eq!(failed.terminal_value(), ERROR);
    }

    #[test]
    fn test_record_json_shape() {
        let rec = record(OutcomeStatus::FallbackSuccess, WorkPayload::Scalar { value: 3 });
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["job_id"], "42");
        assert_eq!(json["outcome"]["status"], "FALLBACK_SUCCESS");
        assert_eq!(json["device"]["kind"], "software_only");
        assert!(json.get("error").is_none());
    }
}
