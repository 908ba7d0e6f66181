//! Durable job records and the terminal stdout line.
//!
//! A record is written once, keyed by job id, and only after it is on
//! disk does the sentinel line reach stdout. [`ResultSink::persist`]
//! hands back a [`Persisted`] receipt that [`ResultSink::emit`] requires,
//! so the order cannot be inverted.

use std::fmt::{self, Write as _};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use broccobyte_core::{JobId, ResultRecord};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::json_output::Console;

/// Errors from persisting a record.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The results directory is a mounted volume and is never created here.
    #[error("Results directory does not exist: {0}")]
    MissingOutputDir(PathBuf),

    #[error("Results path is not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Records are write-once.
    #[error("Record already persisted: {0}")]
    AlreadyPersisted(PathBuf),

    #[error("Job id '{0}' cannot be used as a record key")]
    InvalidJobId(JobId),

    #[error("Unknown record format '{0}' (expected text or json)")]
    UnknownFormat(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// On-disk record layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecordFormat {
    /// `key=value` lines.
    #[default]
    Text,
    /// Pretty-printed serde form of the record.
    Json,
}

impl RecordFormat {
    /// File extension, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Text => "txt",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for RecordFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Json => "json",
        })
    }
}

impl FromStr for RecordFormat {
    type Err = SinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(SinkError::UnknownFormat(s.to_string())),
        }
    }
}

/// Durable storage for job records.
pub trait RecordStore: Send + Sync {
    /// Write `record` and return where it landed.
    fn persist(&self, record: &ResultRecord) -> Result<PathBuf, SinkError>;
}

/// Stores each record as `job_<id>_output.<ext>` in a results directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
    format: RecordFormat,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>, format: RecordFormat) -> Self {
        Self {
            dir: dir.into(),
            format,
        }
    }

    /// Final path of the record for `job_id`.
    pub fn record_path(&self, job_id: &JobId) -> PathBuf {
        self.dir
            .join(format!("job_{}_output.{}", job_id, self.format.extension()))
    }

    fn render(&self, record: &ResultRecord) -> Result<Vec<u8>, SinkError> {
        Ok(match self.format {
            RecordFormat::Text => render_text(record).into_bytes(),
            RecordFormat::Json => {
                let mut bytes = serde_json::to_vec_pretty(record)?;
                bytes.push(b'\n');
                bytes
            }
        })
    }

    fn check_dir(&self) -> Result<(), SinkError> {
        match fs::metadata(&self.dir) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(SinkError::NotADirectory(self.dir.clone())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(SinkError::MissingOutputDir(self.dir.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl RecordStore for FileStore {
    fn persist(&self, record: &ResultRecord) -> Result<PathBuf, SinkError> {
        if !record.job_id.is_file_safe() {
            return Err(SinkError::InvalidJobId(record.job_id.clone()));
        }
        self.check_dir()?;

        let path = self.record_path(&record.job_id);
        if path.exists() {
            return Err(SinkError::AlreadyPersisted(path));
        }

        let bytes = self.render(record)?;
        let tmp = temp_path(&self.dir, &record.job_id);
        // Anything already at `tmp` is not ours; fail without touching it.
        let file = OpenOptions::new().write(true).create_new(true).open(&tmp)?;
        let result = write_synced(file, &bytes).and_then(|()| link_once(&tmp, &path));
        if let Err(e) = fs::remove_file(&tmp) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %tmp.display(), error = %e, "Failed to remove temp record");
            }
        }
        result?;
        sync_dir(&self.dir);

        info!(job_id = %record.job_id, path = %path.display(), format = %self.format, "Record persisted");
        Ok(path)
    }
}

/// Hidden per-attempt temp name next to the final record.
fn temp_path(dir: &Path, job_id: &JobId) -> PathBuf {
    dir.join(format!(".job_{}_{:016x}.tmp", job_id, rand::random::<u64>()))
}

fn write_synced(mut file: File, bytes: &[u8]) -> Result<(), SinkError> {
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

/// Hard-link `tmp` to `path`; fails if `path` already exists.
fn link_once(tmp: &Path, path: &Path) -> Result<(), SinkError> {
    fs::hard_link(tmp, path).map_err(|e| {
        if e.kind() == io::ErrorKind::AlreadyExists {
            SinkError::AlreadyPersisted(path.to_path_buf())
        } else {
            SinkError::Io(e)
        }
    })
}

/// Best effort: make the new directory entry durable.
fn sync_dir(dir: &Path) {
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        debug!(dir = %dir.display(), error = %e, "Directory fsync skipped");
    }
}

/// Text form of a record, one `key=value` per line.
pub fn render_text(record: &ResultRecord) -> String {
    let mut out = String::new();
    let mut line = |key: &str, value: &dyn fmt::Display| {
        let _ = writeln!(out, "{}={}", key, value);
    };

    let (device, device_kind) = match &record.device {
        Some(device) => (device.name.clone(), device.kind.to_string()),
        None => ("none".to_string(), "none".to_string()),
    };
    let attempted = record
        .attempted
        .iter()
        .map(|kind| kind.as_str())
        .collect::<Vec<_>>()
        .join(",");

    line("jobID", &record.job_id);
    line("input", &escape(&record.input_data));
    line("workload", &escape(record.workload_kind.as_str()));
    line("device", &escape(&device));
    line("device_kind", &device_kind);
    line("attempted", &attempted);
    line("status", &record.status());
    match &record.attestation {
        Some(att) => {
            line("digest", &att.digest);
            line("algorithm", &att.algorithm);
            line("reproducible", &att.reproducible);
            line("derived_from", &att.derived_from);
        }
        None => {
            line("digest", &record.terminal_value());
        }
    }
    line("elapsed_ms", &record.outcome.metrics.elapsed_ms);
    line("iterations", &record.outcome.metrics.iterations);
    line("started_at", &record.started_at.to_rfc3339());
    line("finished_at", &record.finished_at.to_rfc3339());
    if let Some(error) = &record.error {
        line("error", &escape(error));
    }
    line("result", &escape(&record.outcome.payload.summary()));
    out
}

/// Keep every value on its own line.
fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}

/// Receipt that a record reached durable storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persisted {
    pub path: PathBuf,
    terminal_value: String,
}

impl Persisted {
    /// Value the sentinel line will carry.
    pub fn terminal_value(&self) -> &str {
        &self.terminal_value
    }
}

/// Persists records and prints the sentinel line.
#[derive(Clone)]
pub struct ResultSink {
    store: Arc<dyn RecordStore>,
    console: Console,
    sentinel: String,
}

impl ResultSink {
    pub fn new(store: Arc<dyn RecordStore>, console: Console, sentinel: impl Into<String>) -> Self {
        Self {
            store,
            console,
            sentinel: sentinel.into(),
        }
    }

    /// Write the record to the store.
    pub fn persist(&self, record: &ResultRecord) -> Result<Persisted, SinkError> {
        let path = self.store.persist(record)?;
        Ok(Persisted {
            path,
            terminal_value: record.terminal_value().to_string(),
        })
    }

    /// Print the single terminal line for a persisted record.
    pub fn emit(&self, persisted: &Persisted) -> io::Result<()> {
        self.console
            .write_line(&format!("{}{}", self.sentinel, persisted.terminal_value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json_output::{OutputMode, SharedBuffer};
    use broccobyte_core::{
        Attestation, DeviceCapability, DeviceKind, DigestAlgorithm, Metrics, Outcome,
        OutcomeStatus, PayloadRef, WorkPayload, WorkloadKind,
    };
    use chrono::Utc;
    use tempfile::TempDir;

    fn record(job_id: &str) -> ResultRecord {
        let now = Utc::now();
        ResultRecord {
            job_id: JobId::new(job_id),
            input_data: "test".to_string(),
            workload_kind: WorkloadKind::SumSquares,
            device: Some(DeviceCapability::software()),
            attempted: vec![DeviceKind::SoftwareOnly],
            attestation: Some(Attestation {
                digest: "ab".repeat(32),
                algorithm: DigestAlgorithm::Sha256,
                derived_from: PayloadRef {
                    kind: "scalar".to_string(),
                    sha256: "cd".repeat(32),
                },
                reproducible: true,
            }),
            outcome: Outcome::new(
                OutcomeStatus::Success,
                WorkPayload::Scalar { value: 14 },
                Metrics::new(3, 4),
            ),
            started_at: now,
            finished_at: now,
            error: None,
        }
    }

    #[test]
    fn test_text_record_layout() {
        let text = render_text(&record("42"));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "jobID=42");
        assert_eq!(lines[1], "input=test");
        assert!(lines.contains(&"status=SUCCESS"));
        assert!(lines.contains(&"device_kind=software_only"));
        assert!(lines.contains(&"algorithm=sha256"));
        assert_eq!(lines.last().copied(), Some("result=scalar 14"));
    }

    #[test]
    fn test_text_record_escapes_newlines() {
        let mut rec = record("42");
        rec.input_data = "a\nstatus=FAILURE".to_string();
        let text = render_text(&rec);
        assert!(text.contains("input=a\\nstatus=FAILURE"));
        assert_eq!(text.lines().filter(|l| l.starts_with("status=")).count(), 1);
    }

    #[test]
    fn test_text_record_escapes_workload_and_device() {
        let mut rec = record("77");
        rec.workload_kind = WorkloadKind::Custom("x\nstatus=SUCCESS".to_string());
        rec.device = Some(DeviceCapability::available(
            DeviceKind::GeneralCompute,
            "pool\nstatus=SUCCESS",
        ));
        rec.attestation = None;
        rec.outcome = Outcome::failure("boom", Metrics::default());
        rec.error = Some("boom".to_string());

        let text = render_text(&rec);
        let statuses: Vec<&str> = text.lines().filter(|l| l.starts_with("status=")).collect();
        assert_eq!(statuses, vec!["status=FAILURE"]);
        assert!(text.contains("workload=x\\nstatus=SUCCESS"));
        assert!(text.contains("device=pool\\nstatus=SUCCESS"));
    }

    #[test]
    fn test_temp_names_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let id = JobId::new("42");
        let a = temp_path(dir.path(), &id);
        let b = temp_path(dir.path(), &id);
        assert_ne!(a, b);
        assert!(a
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(".job_42_"));
    }

    #[test]
    fn test_persist_leaves_foreign_temp_files_alone() {
        let dir = TempDir::new().unwrap();
        let stale = dir.path().join(format!(".job_42_{}.tmp", std::process::id()));
        fs::write(&stale, "left by another writer").unwrap();

        let store = FileStore::new(dir.path(), RecordFormat::Text);
        store.persist(&record("42")).unwrap();

        assert_eq!(fs::read_to_string(&stale).unwrap(), "left by another writer");
        assert!(dir.path().join("job_42_output.txt").exists());
    }

    #[test]
    fn test_persist_is_write_once() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path(), RecordFormat::Text);

        let path = store.persist(&record("42")).unwrap();
        assert_eq!(path, dir.path().join("job_42_output.txt"));
        assert!(fs::read_to_string(&path).unwrap().contains("jobID=42"));

        let err = store.persist(&record("42")).unwrap_err();
        assert!(matches!(err, SinkError::AlreadyPersisted(_)));

        // No temp files left behind.
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_persist_json() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path(), RecordFormat::Json);
        let path = store.persist(&record("7")).unwrap();
        assert_eq!(path.extension().unwrap(), "json");

        let parsed: ResultRecord =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.job_id.as_str(), "7");
        assert_eq!(parsed.outcome.payload, WorkPayload::Scalar { value: 14 });
        assert_eq!(parsed.status(), OutcomeStatus::Success);
    }

    #[test]
    fn test_missing_dir_is_not_created() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("results");
        let store = FileStore::new(&missing, RecordFormat::Text);

        let err = store.persist(&record("42")).unwrap_err();
        assert!(matches!(err, SinkError::MissingOutputDir(_)));
        assert!(!missing.exists());
    }

    #[test]
    fn test_unsafe_job_id_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path(), RecordFormat::Text);
        let err = store.persist(&record("../escape")).unwrap_err();
        assert!(matches!(err, SinkError::InvalidJobId(_)));
    }

    #[test]
    fn test_emit_after_persist() {
        let dir = TempDir::new().unwrap();
        let buf = SharedBuffer::new();
        let sink = ResultSink::new(
            Arc::new(FileStore::new(dir.path(), RecordFormat::Text)),
            Console::with_writer(OutputMode::Quiet, Box::new(buf.clone())),
            "RESULT:",
        );

        let persisted = sink.persist(&record("42")).unwrap();
        sink.emit(&persisted).unwrap();
        assert_eq!(buf.contents(), format!("RESULT:{}\n", "ab".repeat(32)));
    }

    #[test]
    fn test_format_names() {
        assert_eq!("JSON".parse::<RecordFormat>().unwrap(), RecordFormat::Json);
        assert_eq!("text".parse::<RecordFormat>().unwrap(), RecordFormat::Text);
        assert!("xml".parse::<RecordFormat>().is_err());
    }
}
