//! Job lifecycle: resolve, execute with fallback, attest, persist, emit.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use broccobyte_core::{
    DeviceCapability, DeviceKind, DigestAlgorithm, JobDescriptor, JobId, JobState, Metrics,
    Outcome, OutcomeStatus, ResultRecord,
};
use chrono::{DateTime, Utc};
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

use crate::attest::AttestationEngine;
use crate::config::Config;
use crate::error::HarnessError;
use crate::json_output::{Console, JsonEvent, OutputMode};
use crate::progress::{spawn_printer, ProgressReporter};
use crate::resolver::{DeviceProbe, DeviceResolver, SystemProbe};
use crate::sink::{FileStore, Persisted, RecordStore, ResultSink, SinkError};
use crate::workload::{self, WorkloadError, WorkloadRegistry};

/// What happened to one job.
#[derive(Debug, Clone)]
pub struct JobReport {
    /// The record that was (or failed to be) persisted.
    pub record: ResultRecord,
    /// Where the record landed, if it was persisted.
    pub record_path: Option<PathBuf>,
    /// Every state the job passed through, starting at `Created`.
    pub states: Vec<JobState>,
    /// Whether the sentinel line was written.
    pub emitted: bool,
}

impl JobReport {
    /// Process exit code: zero only for an emitted successful record.
    pub fn exit_code(&self) -> i32 {
        if self.emitted && self.record.status().is_success() {
            0
        } else {
            1
        }
    }

    /// Final lifecycle state.
    pub fn final_state(&self) -> JobState {
        self.states.last().copied().unwrap_or_default()
    }
}

/// Tracks and logs state transitions for one job.
struct Lifecycle {
    job_id: JobId,
    state: JobState,
    trace: Vec<JobState>,
}

impl Lifecycle {
    fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            state: JobState::Created,
            trace: vec![JobState::Created],
        }
    }

    fn advance(&mut self, next: JobState) {
        let from = self.state;
        if let Err(e) = from.transition(next) {
            // Still move on: the record must reach a terminal state.
            warn!(job_id = %self.job_id, error = %e, "Unexpected state transition");
        }
        info!(job_id = %self.job_id, from = %from, to = %next, "Job state changed");
        self.state = next;
        self.trace.push(next);
    }
}

/// Runs jobs end to end.
pub struct Harness {
    config: Config,
    resolver: DeviceResolver,
    registry: WorkloadRegistry,
    engine: AttestationEngine,
    sink: ResultSink,
    console: Console,
}

impl Harness {
    /// Assemble a harness from its parts.
    pub fn new(
        config: Config,
        probe: Arc<dyn DeviceProbe>,
        registry: WorkloadRegistry,
        store: Arc<dyn RecordStore>,
        console: Console,
    ) -> Self {
        let resolver = DeviceResolver::new(probe).with_forced(config.forced_device);
        let engine = AttestationEngine::new(config.digest);
        let sink = ResultSink::new(store, console.clone(), config.sentinel.clone());
        Self {
            config,
            resolver,
            registry,
            engine,
            sink,
            console,
        }
    }

    /// Harness over the real host, the built-in workloads, a file store and
    /// stdout.
    pub fn from_config(config: Config) -> Self {
        let probe = Arc::new(SystemProbe::new(Duration::from_secs(
            config.probe_timeout_secs,
        )));
        let store = Arc::new(FileStore::new(
            config.results_dir.clone(),
            config.record_format,
        ));
        let console = Console::stdout(config.output_mode);
        Self::new(config, probe, WorkloadRegistry::builtin(), store, console)
    }

    /// Run one job to a terminal state.
    ///
    /// Never returns an error: every failure is folded into a Failure
    /// record, and the report says whether it could be persisted.
    pub async fn run(&self, job: JobDescriptor) -> JobReport {
        let started_at = Utc::now();
        let mut life = Lifecycle::new(job.job_id().clone());
        let job_id = job.job_id().as_str();

        info!(
            job_id = %job_id,
            workload = %job.workload_kind(),
            params = job.params().len(),
            "Job started"
        );
        for (key, value) in job.params().iter() {
            debug!(job_id = %job_id, key, value, "Job param");
        }
        self.console.advise(
            || format!("[job {}] started workload={}", job_id, job.workload_kind()),
            || JsonEvent::job_started(job_id, job.workload_kind().as_str(), job.input_data().len()),
        );

        life.advance(JobState::DeviceResolving);
        let devices = self.resolver.resolve().await;
        self.console.advise(
            || {
                let available: Vec<_> = devices
                    .iter()
                    .filter(|d| d.available)
                    .map(|d| d.to_string())
                    .collect();
                format!("[job {}] devices: {}", job_id, available.join(", "))
            },
            || JsonEvent::devices_resolved(job_id, &devices),
        );

        let mut attempted = Vec::new();
        let ran = match job.params().parse::<DigestAlgorithm>("digest") {
            Ok(algorithm) => self
                .execute(&job, &devices, &mut attempted, &mut life)
                .await
                .map(|(device, outcome)| (device, outcome, algorithm)),
            Err(e) => Err(e.into()),
        };

        let (device, outcome, algorithm) = match ran {
            Ok(ran) => ran,
            Err(err) => {
                life.advance(JobState::Failing);
                let record = failure_record(&job, started_at, attempted, &err.to_string());
                return self.finish_failure(life, record);
            }
        };

        life.advance(JobState::Attesting);
        let attestation = self.engine.attest(&outcome.payload, algorithm);
        debug!(
            job_id = %job_id,
            digest = %attestation.digest,
            algorithm = %attestation.algorithm,
            reproducible = attestation.reproducible,
            "Outcome attested"
        );
        if !attestation.reproducible {
            warn!(job_id = %job_id, "Payload depends on a generated seed; attestation is not reproducible");
        }

        let record = ResultRecord {
            job_id: job.job_id().clone(),
            input_data: job.input_data().to_string(),
            workload_kind: job.workload_kind().clone(),
            device: Some(device),
            attempted,
            attestation: Some(attestation),
            outcome,
            started_at,
            finished_at: Utc::now(),
            error: None,
        };

        life.advance(JobState::Persisting);
        match self.sink.persist(&record) {
            Ok(persisted) => self.finish(life, record, persisted),
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Failed to persist result record");
                life.advance(JobState::Failing);
                let mut failed = failure_record(
                    &job,
                    started_at,
                    record.attempted.clone(),
                    &HarnessError::from(e).to_string(),
                );
                failed.device = record.device;
                self.finish_failure(life, failed)
            }
        }
    }

    /// Walk the available tiers in order until one runs the workload.
    async fn execute(
        &self,
        job: &JobDescriptor,
        devices: &[DeviceCapability],
        attempted: &mut Vec<DeviceKind>,
        life: &mut Lifecycle,
    ) -> Result<(DeviceCapability, Outcome), HarnessError> {
        let workload = self
            .registry
            .get(job.workload_kind())
            .ok_or_else(|| HarnessError::UnknownWorkload(job.workload_kind().clone()))?;
        let job_id = job.job_id();

        for device in devices.iter().filter(|d| d.available) {
            life.advance(JobState::Executing);
            attempted.push(device.kind);
            self.console.advise(
                || format!("[job {}] running on {}", job_id, device),
                || JsonEvent::device_selected(job_id.as_str(), device),
            );

            let (reporter, printer) = if self.console.mode() == OutputMode::Quiet {
                (ProgressReporter::disabled(), None)
            } else {
                let (reporter, rx) = ProgressReporter::channel(self.config.progress_buffer);
                let printer = spawn_printer(rx, self.console.clone(), job_id.clone());
                (reporter, Some(printer))
            };

            let task = {
                let workload = workload.clone();
                let device = device.clone();
                let job = job.clone();
                tokio::task::spawn_blocking(move || {
                    let result = workload::execute(workload.as_ref(), &device, &job, &reporter);
                    (result, reporter.dropped())
                })
            };
            let joined = task.await;

            // The reporter is gone once the task ends, so the printer drains.
            if let Some(printer) = printer {
                match printer.await {
                    Ok(printed) => debug!(job_id = %job_id, printed, "Progress drained"),
                    Err(e) => debug!(job_id = %job_id, error = %e, "Progress printer aborted"),
                }
            }

            let (result, dropped) = joined.map_err(|e| HarnessError::WorkloadPanicked(panic_message(e)))?;
            if dropped > 0 {
                debug!(job_id = %job_id, dropped, "Progress checkpoints dropped");
            }

            match result {
                Ok(mut outcome) => {
                    outcome.status = if device.kind == self.config.preferred_device() {
                        OutcomeStatus::Success
                    } else {
                        OutcomeStatus::FallbackSuccess
                    };
                    info!(
                        job_id = %job_id,
                        device = %device,
                        status = %outcome.status,
                        elapsed_ms = outcome.metrics.elapsed_ms,
                        "Workload completed"
                    );
                    return Ok((device.clone(), outcome));
                }
                Err(WorkloadError::DeviceMismatch { .. }) => {
                    let reason = format!("{} has no {} implementation", job.workload_kind(), device.kind);
                    info!(job_id = %job_id, device = %device, "Device mismatch, demoting to next tier");
                    self.console.advise(
                        || format!("[job {}] fallback from {}: {}", job_id, device, reason),
                        || JsonEvent::device_fallback(job_id.as_str(), device, &reason),
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(HarnessError::TiersExhausted {
            attempted: attempted.clone(),
        })
    }

    /// Persist a Failure record and emit `error` if that succeeds.
    fn finish_failure(&self, mut life: Lifecycle, record: ResultRecord) -> JobReport {
        let message = record.error.clone().unwrap_or_default();
        error!(job_id = %record.job_id, error = %message, "Job failed");

        match self.sink.persist(&record) {
            Ok(persisted) => self.finish(life, record, persisted),
            Err(e) => {
                self.withhold(&record, &e);
                JobReport {
                    record,
                    record_path: None,
                    states: std::mem::take(&mut life.trace),
                    emitted: false,
                }
            }
        }
    }

    /// Emit the sentinel line for a persisted record.
    fn finish(&self, mut life: Lifecycle, record: ResultRecord, persisted: Persisted) -> JobReport {
        self.console.advise(
            || {
                format!(
                    "[job {}] {} in {}ms",
                    record.job_id,
                    record.status(),
                    record.duration_ms()
                )
            },
            || match &record.error {
                Some(error) => JsonEvent::job_failed(record.job_id.as_str(), error),
                None => JsonEvent::job_completed(&record),
            },
        );

        let emitted = match self.sink.emit(&persisted) {
            Ok(()) => true,
            Err(e) => {
                error!(job_id = %record.job_id, error = %e, "Failed to write terminal line");
                false
            }
        };
        life.advance(JobState::Emitted);
        info!(
            job_id = %record.job_id,
            status = %record.status(),
            value = %persisted.terminal_value(),
            "Job finished"
        );

        JobReport {
            record,
            record_path: Some(persisted.path),
            states: life.trace,
            emitted,
        }
    }

    fn withhold(&self, record: &ResultRecord, err: &SinkError) {
        error!(
            job_id = %record.job_id,
            error = %err,
            "No durable record; terminal line withheld"
        );
        self.console.advise(
            || format!("[job {}] record not persisted: {}", record.job_id, err),
            || JsonEvent::job_failed(record.job_id.as_str(), &err.to_string()),
        );
    }
}

fn failure_record(
    job: &JobDescriptor,
    started_at: DateTime<Utc>,
    attempted: Vec<DeviceKind>,
    message: &str,
) -> ResultRecord {
    let finished_at = Utc::now();
    let elapsed_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;
    ResultRecord {
        job_id: job.job_id().clone(),
        input_data: job.input_data().to_string(),
        workload_kind: job.workload_kind().clone(),
        device: None,
        attempted,
        attestation: None,
        outcome: Outcome::failure(message, Metrics::new(elapsed_ms, 0)),
        started_at,
        finished_at,
        error: Some(message.to_string()),
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
