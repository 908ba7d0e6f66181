//! BroccoByte provider harness
//!
//! Runs one consumer job under the provider contract: resolve the best
//! available device tier, execute the workload with fallback, stream
//! progress, attest the payload, persist a write-once record and print a
//! single sentinel line.
//!
//! # Example
//!
//! ```rust,no_run
//! use broccobyte_core::{JobDescriptor, JobId, WorkloadKind};
//! use broccobyte_harness::{Config, Harness};
//!
//! async fn run() -> Result<(), Box<dyn std::error::Error>> {
//!     let harness = Harness::from_config(Config::default());
//!     let job = JobDescriptor::new(JobId::parse("42")?, "test", WorkloadKind::HashSearch)
//!         .with_param("target_prefix", "0000");
//!
//!     let report = harness.run(job).await;
//!     println!("exit code: {}", report.exit_code());
//!     Ok(())
//! }
//! ```

pub mod attest;
pub mod config;
pub mod error;
pub mod json_output;
pub mod orchestrator;
pub mod progress;
pub mod resolver;
pub mod sink;
pub mod workload;

// Re-export main types
pub use attest::AttestationEngine;
pub use config::Config;
pub use error::HarnessError;
pub use json_output::{Console, OutputMode};
pub use orchestrator::{Harness, JobReport};
pub use progress::ProgressReporter;
pub use resolver::{DeviceProbe, DeviceResolver, SystemProbe};
pub use sink::{FileStore, RecordFormat, RecordStore, ResultSink, SinkError};
pub use workload::{Workload, WorkloadError, WorkloadRegistry};
