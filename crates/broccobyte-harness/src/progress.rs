//! Non-blocking progress reporting.
//!
//! Workloads call [`ProgressReporter::checkpoint`] from their compute loop.
//! Delivery uses `try_send` on a bounded channel, so a slow stdout can
//! never stall the computation: when the buffer is full the checkpoint is
//! dropped and counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use broccobyte_core::{JobId, ProgressCheckpoint};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::json_output::{Console, JsonEvent};

/// Handle the workload uses to report progress.
#[derive(Clone)]
pub struct ProgressReporter {
    tx: Option<mpsc::Sender<ProgressCheckpoint>>,
    started: Instant,
    dropped: Arc<AtomicU64>,
}

impl ProgressReporter {
    /// Create a reporter and the receiving end of its channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProgressCheckpoint>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let reporter = Self {
            tx: Some(tx),
            started: Instant::now(),
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (reporter, rx)
    }

    /// A reporter that discards every checkpoint.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            started: Instant::now(),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Report progress. Never blocks and never fails.
    pub fn checkpoint(&self, fraction: f64, note: impl Into<String>) {
        let Some(tx) = &self.tx else {
            return;
        };
        let checkpoint = ProgressCheckpoint::new(fraction, self.started.elapsed(), note);
        if tx.try_send(checkpoint).is_err() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(dropped, "Progress checkpoint dropped");
        }
    }

    /// Number of checkpoints lost to a full or closed channel.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Decides when a loop over `total` units should report.
#[derive(Debug, Clone)]
pub struct Cadence {
    every: u64,
    next: u64,
}

impl Cadence {
    /// Report every `every` units.
    pub fn every(every: u64) -> Self {
        let every = every.max(1);
        Self { every, next: every }
    }

    /// Returns true when `done` has crossed the next reporting mark.
    pub fn tick(&mut self, done: u64) -> bool {
        if done < self.next {
            return false;
        }
        while self.next <= done {
            self.next += self.every;
        }
        true
    }
}

/// Drain checkpoints to the console until every reporter is dropped.
///
/// Resolves to the number of checkpoints printed.
pub fn spawn_printer(
    mut rx: mpsc::Receiver<ProgressCheckpoint>,
    console: Console,
    job_id: JobId,
) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut printed = 0u64;
        while let Some(checkpoint) = rx.recv().await {
            console.advise(
                || {
                    format!(
                        "[job {}] progress {:.1}% ({:.1}s): {}",
                        job_id,
                        checkpoint.percent(),
                        checkpoint.elapsed.as_secs_f64(),
                        checkpoint.note
                    )
                },
                || JsonEvent::checkpoint(job_id.as_str(), &checkpoint),
            );
            printed += 1;
        }
        printed
    })
}
