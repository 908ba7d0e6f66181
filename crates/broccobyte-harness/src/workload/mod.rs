//! Pluggable workloads behind a uniform execution contract.
//!
//! Each workload owns its algorithm and its bounded-iteration policy; the
//! ceilings themselves come from the job's params. A workload that cannot
//! run on a tier reports [`WorkloadError::DeviceMismatch`] and the
//! orchestrator demotes to the next one.

mod fractal;
mod hash_search;
mod matrix;
mod sum_squares;

pub use fractal::Fractal;
pub use hash_search::HashSearch;
pub use matrix::MatrixMultiply;
pub use sum_squares::SumSquares;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use broccobyte_core::{
    CoreError, DeviceCapability, DeviceKind, JobDescriptor, Metrics, Outcome, OutcomeStatus,
    Params, WorkPayload, WorkloadKind,
};
use thiserror::Error;
use tracing::{debug, info};

use crate::progress::ProgressReporter;

/// Errors a workload can report.
#[derive(Debug, Error)]
pub enum WorkloadError {
    /// The workload has no implementation for this tier.
    #[error("Workload '{workload}' cannot run on {device}")]
    DeviceMismatch {
        workload: WorkloadKind,
        device: DeviceKind,
    },

    /// A param was missing, malformed or out of range.
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// A fixed-size workload needs more iterations than the ceiling allows.
    #[error("Iteration ceiling {limit} below required {required}")]
    CeilingExceeded { limit: u64, required: u64 },

    /// A fixed-size workload ran past its wall-clock limit.
    #[error("Time limit of {limit_secs}s exceeded")]
    DeadlineExceeded { limit_secs: f64 },

    /// Any other failure inside the workload.
    #[error("{0}")]
    Fault(String),
}

impl From<CoreError> for WorkloadError {
    fn from(err: CoreError) -> Self {
        Self::InvalidParams(err.to_string())
    }
}

/// Ceilings shared by every workload, read from params.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    /// `max_iterations`: cap on units of work.
    pub max_iterations: Option<u64>,
    /// `time_limit_secs`: wall-clock budget.
    pub time_limit: Option<Duration>,
}

impl Limits {
    /// Read the common ceilings from params.
    pub fn from_params(params: &Params) -> Result<Self, WorkloadError> {
        let max_iterations = params.parse::<u64>("max_iterations")?;
        let time_limit = match params.parse::<f64>("time_limit_secs")? {
            None => None,
            Some(secs) if secs > 0.0 => Some(Duration::try_from_secs_f64(secs).map_err(|e| {
                WorkloadError::InvalidParams(format!(
                    "time_limit_secs out of range ({}): {}",
                    secs, e
                ))
            })?),
            Some(secs) => {
                return Err(WorkloadError::InvalidParams(format!(
                    "time_limit_secs must be a positive number, got {}",
                    secs
                )))
            }
        };
        Ok(Self {
            max_iterations,
            time_limit,
        })
    }

    /// Fail up front when a fixed amount of work exceeds the iteration cap.
    pub fn check_fixed(&self, required: u64) -> Result<(), WorkloadError> {
        match self.max_iterations {
            Some(limit) if required > limit => {
                Err(WorkloadError::CeilingExceeded { limit, required })
            }
            _ => Ok(()),
        }
    }
}

/// Everything a workload sees while running on one tier.
pub struct ExecutionContext<'a> {
    pub device: &'a DeviceCapability,
    pub job: &'a JobDescriptor,
    pub progress: &'a ProgressReporter,
    pub limits: Limits,
    /// Worker threads the tier provides.
    pub threads: usize,
    started: Instant,
}

impl<'a> ExecutionContext<'a> {
    /// Build a context for running `job` on `device`.
    pub fn new(
        device: &'a DeviceCapability,
        job: &'a JobDescriptor,
        progress: &'a ProgressReporter,
    ) -> Result<Self, WorkloadError> {
        Ok(Self {
            device,
            job,
            progress,
            limits: Limits::from_params(job.params())?,
            threads: threads_for(device.kind),
            started: Instant::now(),
        })
    }

    /// Job parameters.
    pub fn params(&self) -> &Params {
        self.job.params()
    }

    /// Time since execution on this tier began.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// True once the wall-clock limit, if any, has passed.
    pub fn deadline_passed(&self) -> bool {
        self.limits
            .time_limit
            .is_some_and(|limit| self.started.elapsed() >= limit)
    }

    /// Error for a fixed-size workload that ran out of time.
    pub fn deadline_error(&self) -> WorkloadError {
        WorkloadError::DeadlineExceeded {
            limit_secs: self
                .limits
                .time_limit
                .map(|d| d.as_secs_f64())
                .unwrap_or_default(),
        }
    }
}

fn threads_for(kind: DeviceKind) -> usize {
    match kind {
        DeviceKind::GeneralCompute => num_cpus::get().max(1),
        DeviceKind::Accelerator | DeviceKind::SoftwareOnly => 1,
    }
}

/// Payload plus the counters a workload collected.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkOutput {
    pub payload: WorkPayload,
    pub iterations: u64,
    pub figures: Vec<(&'static str, f64)>,
}

impl WorkOutput {
    /// Output with no extra figures.
    pub fn new(payload: WorkPayload, iterations: u64) -> Self {
        Self {
            payload,
            iterations,
            figures: Vec::new(),
        }
    }

    /// Builder method to add a named figure.
    pub fn with_figure(mut self, name: &'static str, value: f64) -> Self {
        self.figures.push((name, value));
        self
    }
}

/// A pluggable compute routine.
pub trait Workload: Send + Sync {
    /// Kind this workload is registered under.
    fn kind(&self) -> WorkloadKind;

    /// Whether the workload has an implementation for `device`.
    fn supports(&self, device: DeviceKind) -> bool;

    /// Run to completion or to the workload's own ceiling.
    fn run(&self, ctx: &ExecutionContext<'_>) -> Result<WorkOutput, WorkloadError>;
}

/// Run `workload` for `job` on `device`, producing an Outcome.
///
/// The outcome is marked `Success`; the orchestrator downgrades it to
/// `FallbackSuccess` when the tier was not the preferred one.
pub fn execute(
    workload: &dyn Workload,
    device: &DeviceCapability,
    job: &JobDescriptor,
    progress: &ProgressReporter,
) -> Result<Outcome, WorkloadError> {
    if !workload.supports(device.kind) {
        return Err(WorkloadError::DeviceMismatch {
            workload: workload.kind(),
            device: device.kind,
        });
    }

    let ctx = ExecutionContext::new(device, job, progress)?;
    info!(
        job_id = %job.job_id(),
        workload = %workload.kind(),
        device = %device,
        threads = ctx.threads,
        "Executing workload"
    );

    let output = workload.run(&ctx)?;
    let elapsed = ctx.elapsed();

    let mut metrics = Metrics::new(elapsed.as_millis() as u64, output.iterations);
    for (name, value) in output.figures {
        metrics = metrics.with_figure(name, value);
    }
    debug!(
        job_id = %job.job_id(),
        payload = output.payload.kind_name(),
        elapsed_ms = metrics.elapsed_ms,
        "Workload finished"
    );

    Ok(Outcome::new(OutcomeStatus::Success, output.payload, metrics))
}

/// Map a row index range onto worker threads, in order.
///
/// Rows are processed in batches of roughly a tenth of the total; after
/// each batch the deadline is checked and a checkpoint is reported. Every
/// row is computed by the same function regardless of thread count, so
/// results are identical across CPU tiers.
pub(crate) fn map_rows<T, F>(
    ctx: &ExecutionContext<'_>,
    rows: usize,
    label: &str,
    row_fn: F,
) -> Result<Vec<T>, WorkloadError>
where
    T: Send,
    F: Fn(usize) -> T + Sync,
{
    let mut out = Vec::with_capacity(rows);
    let batch = rows.div_ceil(10).max(1);
    let threads = ctx.threads.max(1);

    let mut start = 0;
    while start < rows {
        let end = (start + batch).min(rows);

        if threads == 1 || end - start == 1 {
            out.extend((start..end).map(&row_fn));
        } else {
            let chunk = (end - start).div_ceil(threads);
            let row_fn = &row_fn;
            let parts: Vec<Vec<T>> = std::thread::scope(|scope| {
                let handles: Vec<_> = (start..end)
                    .step_by(chunk)
                    .map(|lo| {
                        let hi = (lo + chunk).min(end);
                        scope.spawn(move || (lo..hi).map(row_fn).collect::<Vec<T>>())
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join())
                    .collect::<Result<Vec<_>, _>>()
            })
            .map_err(|_| WorkloadError::Fault(format!("{} worker thread panicked", label)))?;
            for part in parts {
                out.extend(part);
            }
        }

        start = end;
        ctx.progress.checkpoint(
            start as f64 / rows as f64,
            format!("{} {}/{} rows", label, start, rows),
        );
        if start < rows && ctx.deadline_passed() {
            return Err(ctx.deadline_error());
        }
    }

    Ok(out)
}

/// Maps workload kinds to their implementations.
#[derive(Clone, Default)]
pub struct WorkloadRegistry {
    workloads: HashMap<WorkloadKind, Arc<dyn Workload>>,
}

impl WorkloadRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the reference workloads.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(HashSearch));
        registry.register(Arc::new(MatrixMultiply));
        registry.register(Arc::new(Fractal));
        registry.register(Arc::new(SumSquares));
        registry
    }

    /// Register a workload under its own kind, replacing any previous one.
    pub fn register(&mut self, workload: Arc<dyn Workload>) {
        self.workloads.insert(workload.kind(), workload);
    }

    /// Look up a workload.
    pub fn get(&self, kind: &WorkloadKind) -> Option<Arc<dyn Workload>> {
        self.workloads.get(kind).cloned()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use broccobyte_core::JobId;

    pub(crate) fn job(kind: WorkloadKind, params: &[(&str, &str)]) -> JobDescriptor {
        params
            .iter()
            .fold(JobDescriptor::new(JobId::new("t"), "test", kind), |job, (k, v)| {
                job.with_param(*k, *v)
            })
    }

    pub(crate) fn general(threads: usize) -> DeviceCapability {
        DeviceCapability::available(
            DeviceKind::GeneralCompute,
            format!("cpu-pool ({} threads)", threads),
        )
    }

    /// Run a workload on the given tier with an explicit thread count.
    pub(crate) fn run_with(
        workload: &dyn Workload,
        device: &DeviceCapability,
        job: &JobDescriptor,
        threads: usize,
    ) -> Result<WorkOutput, WorkloadError> {
        let progress = ProgressReporter::disabled();
        let mut ctx = ExecutionContext::new(device, job, &progress)?;
        ctx.threads = threads;
        workload.run(&ctx)
    }

    #[test]
    fn test_builtin_registry() {
        let registry = WorkloadRegistry::builtin();
        for kind in [
            WorkloadKind::HashSearch,
            WorkloadKind::MatrixMultiply,
            WorkloadKind::Fractal,
            WorkloadKind::SumSquares,
        ] {
            assert_eq!(registry.get(&kind).unwrap().kind(), kind);
        }
        assert!(registry
            .get(&WorkloadKind::Custom("nope".to_string()))
            .is_none());
    }

    #[test]
    fn test_execute_reports_device_mismatch_on_accelerator() {
        let device = DeviceCapability::available(DeviceKind::Accelerator, "Tesla T4");
        let job = job(WorkloadKind::SumSquares, &[]);
        let err = execute(&SumSquares, &device, &job, &ProgressReporter::disabled()).unwrap_err();
        assert!(matches!(
            err,
            WorkloadError::DeviceMismatch {
                device: DeviceKind::Accelerator,
                ..
            }
        ));
    }

    #[test]
    fn test_limits_from_params() {
        let params: Params = [
            ("max_iterations".to_string(), "10".to_string()),
            ("time_limit_secs".to_string(), "0.5".to_string()),
        ]
        .into_iter()
        .collect();
        let limits = Limits::from_params(&params).unwrap();
        assert_eq!(limits.max_iterations, Some(10));
        assert_eq!(limits.time_limit, Some(Duration::from_millis(500)));
        assert!(limits.check_fixed(10).is_ok());
        assert!(matches!(
            limits.check_fixed(11),
            Err(WorkloadError::CeilingExceeded {
                limit: 10,
                required: 11
            })
        ));

        for value in ["-1", "0", "NaN", "inf", "1e20"] {
            let bad: Params = [("time_limit_secs".to_string(), value.to_string())]
                .into_iter()
                .collect();
            assert!(
                matches!(Limits::from_params(&bad), Err(WorkloadError::InvalidParams(_))),
                "accepted time_limit_secs={}",
                value
            );
        }
    }

    #[test]
    fn test_map_rows_is_thread_count_independent() {
        let job = job(WorkloadKind::SumSquares, &[]);
        let device = general(4);
        let progress = ProgressReporter::disabled();

        let mut ctx = ExecutionContext::new(&device, &job, &progress).unwrap();
        ctx.threads = 1;
        let single = map_rows(&ctx, 37, "rows", |i| i * i).unwrap();
        ctx.threads = 4;
        let pooled = map_rows(&ctx, 37, "rows", |i| i * i).unwrap();

        assert_eq!(single, pooled);
        assert_eq!(single.len(), 37);
        assert_eq!(single[36], 36 * 36);
    }

    #[test]
    fn test_map_rows_reports_progress() {
        let job = job(WorkloadKind::SumSquares, &[]);
        let device = DeviceCapability::software();
        let (progress, mut rx) = ProgressReporter::channel(32);
        let ctx = ExecutionContext::new(&device, &job, &progress).unwrap();

        map_rows(&ctx, 20, "rows", |i| i).unwrap();

        let mut fractions = Vec::new();
        while let Ok(checkpoint) = rx.try_recv() {
            fractions.push(checkpoint.fraction_complete);
        }
        assert_eq!(fractions.len(), 10);
        assert_eq!(fractions.last().copied(), Some(1.0));
    }
}
