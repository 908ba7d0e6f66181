//! Stdout output: advisory lines, JSON events and the terminal line.
//!
//! Logging goes to stderr through `tracing`; everything written here is
//! for the external harvester reading stdout.

use serde::Serialize;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use broccobyte_core::{DeviceCapability, ProgressCheckpoint, ResultRecord};

/// How advisory output is rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-readable progress lines.
    #[default]
    Text,
    /// One JSON event per line.
    Json,
    /// Only the terminal line.
    Quiet,
}

/// JSON event types that can be emitted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JsonEventType {
    JobStarted,
    DevicesResolved,
    DeviceSelected,
    DeviceFallback,
    Checkpoint,
    JobCompleted,
    JobFailed,
}

/// A JSON event to be output to stdout.
#[derive(Debug, Clone, Serialize)]
pub struct JsonEvent {
    pub event: JsonEventType,
    pub timestamp: String,
    pub data: serde_json::Value,
}

impl JsonEvent {
    /// Create a new JSON event with the current timestamp.
    pub fn new(event: JsonEventType, data: serde_json::Value) -> Self {
        Self {
            event,
            timestamp: chrono::Utc::now().to_rfc3339(),
            data,
        }
    }

    /// Create a job_started event.
    pub fn job_started(job_id: &str, workload: &str, input_len: usize) -> Self {
        Self::new(
            JsonEventType::JobStarted,
            serde_json::json!({
                "job_id": job_id,
                "workload": workload,
                "input_len": input_len,
            }),
        )
    }

    /// Create a devices_resolved event.
    pub fn devices_resolved(job_id: &str, devices: &[DeviceCapability]) -> Self {
        Self::new(
            JsonEventType::DevicesResolved,
            serde_json::json!({
                "job_id": job_id,
                "devices": devices,
            }),
        )
    }

    /// Create a device_selected event.
    pub fn device_selected(job_id: &str, device: &DeviceCapability) -> Self {
        Self::new(
            JsonEventType::DeviceSelected,
            serde_json::json!({
                "job_id": job_id,
                "device": device,
            }),
        )
    }

    /// Create a device_fallback event.
    pub fn device_fallback(job_id: &str, from: &DeviceCapability, reason: &str) -> Self {
        Self::new(
            JsonEventType::DeviceFallback,
            serde_json::json!({
                "job_id": job_id,
                "from": from.kind,
                "reason": reason,
            }),
        )
    }

    /// Create a checkpoint event.
    pub fn checkpoint(job_id: &str, checkpoint: &ProgressCheckpoint) -> Self {
        Self::new(
            JsonEventType::Checkpoint,
            serde_json::json!({
                "job_id": job_id,
                "fraction": checkpoint.fraction_complete,
                "elapsed_ms": checkpoint.elapsed.as_millis() as u64,
                "note": checkpoint.note,
            }),
        )
    }

    /// Create a job_completed event.
    pub fn job_completed(record: &ResultRecord) -> Self {
        Self::new(
            JsonEventType::JobCompleted,
            serde_json::json!({
                "job_id": record.job_id,
                "status": record.outcome.status,
                "device": record.device,
                "digest": record.attestation.as_ref().map(|a| a.digest.as_str()),
                "elapsed_ms": record.outcome.metrics.elapsed_ms,
            }),
        )
    }

    /// Create a job_failed event.
    pub fn job_failed(job_id: &str, error: &str) -> Self {
        Self::new(
            JsonEventType::JobFailed,
            serde_json::json!({
                "job_id": job_id,
                "error": error,
            }),
        )
    }
}

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Line-oriented stdout writer shared by the progress printer and the sink.
#[derive(Clone)]
pub struct Console {
    mode: OutputMode,
    out: SharedWriter,
}

impl Console {
    /// Console writing to the process stdout.
    pub fn stdout(mode: OutputMode) -> Self {
        Self::with_writer(mode, Box::new(io::stdout()))
    }

    /// Console writing to an arbitrary writer.
    pub fn with_writer(mode: OutputMode, writer: Box<dyn Write + Send>) -> Self {
        Self {
            mode,
            out: Arc::new(Mutex::new(writer)),
        }
    }

    /// Output mode.
    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Advisory output: `text` in text mode, `event` in JSON mode.
    ///
    /// Write errors are ignored; advisory output never affects the job.
    pub fn advise(&self, text: impl FnOnce() -> String, event: impl FnOnce() -> JsonEvent) {
        match self.mode {
            OutputMode::Text => {
                let _ = self.write_line(&text());
            }
            OutputMode::Json => {
                if let Ok(json) = serde_json::to_string(&event()) {
                    let _ = self.write_line(&json);
                }
            }
            OutputMode::Quiet => {}
        }
    }

    /// Write one line and flush, regardless of mode.
    pub fn write_line(&self, line: &str) -> io::Result<()> {
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(out, "{}", line)?;
        out.flush()
    }
}

/// In-memory writer whose contents can be read back, for capturing stdout.
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl SharedBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, lossily decoded.
    pub(crate) fn contents(&self) -> String {
        let buf = self.0.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }
}

#[cfg(test)]
impl Write for SharedBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut buf = self.0.lock().unwrap_or_else(|e| e.into_inner());
        buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
