//! Per-job logging.
//!
//! The Worker Pool and Scheduler write individual error messages to the
//! per-job log rather than the live progress stream (unless verbose mode is
//! set). `Logger` is a small trait object so callers can swap in a no-op
//! implementation for tests without touching the filesystem.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use eyre::{Context, Result};

use crate::job_id::JobId;

pub trait Logger: Send + Sync {
    fn line(&self, msg: &str);

    fn error(&self, path: Option<&str>, msg: &str) {
        match path {
            Some(p) => self.line(&format!("ERROR {p}: {msg}")),
            None => self.line(&format!("ERROR: {msg}")),
        }
    }

    fn transition(&self, transfer_index: u32, from: &str, to: &str) {
        self.line(&format!("transfer[{transfer_index}] {from} -> {to}"));
    }
}

/// Discards every line. Used by tests and by dry-run invocations.
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn line(&self, _msg: &str) {}
}

/// Appends one line per call to `{logsDir}/{jobID}.log`, per the persisted
/// state layout. Opened once and held behind a mutex since multiple workers
/// log concurrently.
pub struct FileLogger {
    file: Mutex<File>,
    path: PathBuf,
}

impl FileLogger {
    pub fn open(logs_dir: &Path, job_id: JobId) -> Result<Self> {
        std::fs::create_dir_all(logs_dir)
            .with_context(|| format!("create logs dir {}", logs_dir.display()))?;
        let path = logs_dir.join(format!("{job_id}.log"));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open log file {}", path.display()))?;
        Ok(Self {
            file: Mutex::new(file),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Logger for FileLogger {
    fn line(&self, msg: &str) {
        let now = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f");
        let mut f = self.file.lock().unwrap_or_else(|e| e.into_inner());
        let _ = writeln!(f, "{now} {msg}");
        log::debug!("{msg}");
    }
}
