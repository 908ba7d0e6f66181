//! BroccoByte provider harness binary.
//!
//! Runs a single job and exits with its status. Stdout carries advisory
//! progress and the one sentinel line; logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;

use broccobyte_core::{DeviceKind, DigestAlgorithm, JobDescriptor, JobId, Params, WorkloadKind};
use broccobyte_harness::config::DEFAULT_SENTINEL;
use broccobyte_harness::{Config, Harness, OutputMode, RecordFormat};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Run one consumer job on the best available device.
#[derive(Parser, Debug)]
#[command(name = "broccobyte-harness", version, about = "Run one BroccoByte provider job")]
struct Cli {
    /// Consumer input, echoed into the record.
    input_data: String,

    /// Job identifier, used as the record key. Generated when omitted.
    job_id: Option<String>,

    /// Workload to run (hash_search, matrix_multiply, fractal, sum_squares).
    #[arg(short, long, default_value = "sum_squares")]
    workload: WorkloadKind,

    /// Workload parameter as key=value (repeatable).
    #[arg(short, long = "param", value_parser = Params::parse_pair)]
    params: Vec<(String, String)>,

    /// Only try this tier (accelerator, general_compute, software_only).
    #[arg(short, long)]
    device: Option<DeviceKind>,

    /// Mounted results directory.
    #[arg(long, default_value = "/results")]
    results_dir: PathBuf,

    /// Record format (text or json).
    #[arg(long, default_value = "text")]
    format: RecordFormat,

    /// Default digest algorithm (sha256 or sum32).
    #[arg(long, default_value = "sha256")]
    digest: DigestAlgorithm,

    /// Prefix of the terminal stdout line.
    #[arg(long, default_value = DEFAULT_SENTINEL)]
    sentinel: String,

    /// Emit advisory output as JSON events.
    #[arg(long)]
    json: bool,

    /// Print only the terminal line.
    #[arg(short, long, conflicts_with = "json")]
    quiet: bool,

    /// Timeout for each hardware probe command.
    #[arg(long, default_value = "3")]
    probe_timeout_secs: u64,

    /// Log level when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn config(&self) -> Config {
        let output_mode = if self.json {
            OutputMode::Json
        } else if self.quiet {
            OutputMode::Quiet
        } else {
            OutputMode::Text
        };
        Config {
            results_dir: self.results_dir.clone(),
            record_format: self.format,
            digest: self.digest,
            sentinel: self.sentinel.clone(),
            forced_device: self.device,
            output_mode,
            probe_timeout_secs: self.probe_timeout_secs,
            ..Config::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout is reserved for the job protocol.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    let job_id = match &cli.job_id {
        Some(id) => JobId::parse(id.as_str())?,
        None => JobId::generate(),
    };
    let params: Params = cli.params.iter().cloned().collect();
    let job = JobDescriptor::new(job_id, cli.input_data.clone(), cli.workload.clone())
        .with_params(params);

    let config = cli.config();
    info!(
        results_dir = %config.results_dir.display(),
        format = %config.record_format,
        digest = %config.digest,
        forced_device = ?config.forced_device,
        "Starting BroccoByte harness"
    );

    let report = Harness::from_config(config).run(job).await;
    Ok(ExitCode::from(report.exit_code() as u8))
}
