//! Harness configuration.

use std::path::PathBuf;

use broccobyte_core::{DeviceKind, DigestAlgorithm};

use crate::json_output::OutputMode;
use crate::sink::RecordFormat;

/// Sentinel prefix used by the reference consumer tasks.
pub const DEFAULT_SENTINEL: &str = "FINAL_RESULT: ";

/// Harness configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Mounted results directory. Never created by the harness.
    pub results_dir: PathBuf,

    /// On-disk record format.
    pub record_format: RecordFormat,

    /// Digest algorithm unless the job's `digest` param overrides it.
    pub digest: DigestAlgorithm,

    /// Prefix of the single terminal line.
    pub sentinel: String,

    /// Restrict the fallback chain to one tier.
    pub forced_device: Option<DeviceKind>,

    /// How advisory output is written to stdout.
    pub output_mode: OutputMode,

    /// Upper bound for each hardware probe command (seconds).
    pub probe_timeout_secs: u64,

    /// Progress checkpoints buffered before new ones are dropped.
    pub progress_buffer: usize,
}

impl Config {
    /// The tier whose success counts as `SUCCESS` rather than a fallback.
    pub fn preferred_device(&self) -> DeviceKind {
        self.forced_device.unwrap_or(DeviceKind::CHAIN[0])
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("/results"),
            record_format: RecordFormat::Text,
            digest: DigestAlgorithm::Sha256,
            sentinel: DEFAULT_SENTINEL.to_string(),
            forced_device: None,
            output_mode: OutputMode::Text,
            probe_timeout_secs: 3,
            progress_buffer: 64,
        }
    }
}
