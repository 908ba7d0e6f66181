//! BroccoByte Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Hardware probing
//! - Filesystem persistence
//! - Runtime specifics
//!
//! All types here describe a single job as it moves through the provider
//! harness: what was asked, where it ran, what came out, and how the
//! result is attested.

pub mod attestation;
pub mod device;
pub mod error;
pub mod ids;
pub mod job;
pub mod outcome;
pub mod progress;
pub mod record;
pub mod status;

// Re-export commonly used types
pub use attestation::{Attestation, DigestAlgorithm, PayloadRef};
pub use device::{DeviceCapability, DeviceKind};
pub use error::CoreError;
pub use ids::JobId;
pub use job::{JobDescriptor, Params, WorkloadKind};
pub use outcome::{Metrics, Outcome, SeedSource, WorkPayload};
pub use progress::ProgressCheckpoint;
pub use record::ResultRecord;
pub use status::{JobState, OutcomeStatus};
