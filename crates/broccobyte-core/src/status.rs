//! Outcome status and job lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::CoreError;

/// Terminal status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    /// Ran on the first tier of the fallback chain.
    Success,
    /// Ran on a lower tier after the preferred one was absent or mismatched.
    FallbackSuccess,
    /// Unrecoverable fault.
    Failure,
}

impl OutcomeStatus {
    /// Wire form, as written to the record.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::FallbackSuccess => "FALLBACK_SUCCESS",
            Self::Failure => "FAILURE",
        }
    }

    /// Returns true for both success variants.
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failure)
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a job inside the orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Created,
    DeviceResolving,
    Executing,
    Attesting,
    Persisting,
    Failing,
    Emitted,
}

impl JobState {
    /// Returns true once the terminal line has been handled.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Emitted)
    }

    /// Whether `self -> next` is a legal edge.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Created, DeviceResolving)
                | (DeviceResolving, Executing)
                | (DeviceResolving, Failing)
                | (Executing, Executing)
                | (Executing, Attesting)
                | (Executing, Failing)
                | (Attesting, Persisting)
                | (Attesting, Failing)
                | (Persisting, Emitted)
                | (Persisting, Failing)
                | (Failing, Emitted)
        )
    }

    /// Validated transition.
    pub fn transition(self, next: JobState) -> Result<JobState, CoreError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::InvalidStateTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::DeviceResolving => "device_resolving",
            Self::Executing => "executing",
            Self::Attesting => "attesting",
            Self::Persisting => "persisting",
            Self::Failing => "failing",
            Self::Emitted => "emitted",
        };
        f.write_str(name)
    }
}
