//! Task state
//!
//! A [`Task`] is one orchestrator invocation. Every component receives it by
//! reference; nothing about a task lives in process-wide state.

use chrono::{DateTime, Utc};
use jstd_common::{Error, Report, Result, TaskMode, TaskOptions};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempPath;
use tracing::{debug, info};

use crate::browser::BRIDGE_SCRIPT;
use crate::console::Console;
use crate::process::{AttemptId, ProcessRegistry};
use crate::results::{FileOutcome, ResultAggregator, Totals};

/// Everything a task knows and owns
#[derive(Debug)]
pub struct Task {
    name: String,
    mode: TaskMode,
    options: TaskOptions,
    port: u16,
    files: Vec<PathBuf>,
    console: Console,
    processes: ProcessRegistry,
    results: Mutex<ResultAggregator>,
    cleaned_up: AtomicBool,
    /// PhantomJS bridge written on first use, removed with the task
    bridge: Mutex<Option<TempPath>>,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl Task {
    /// Validate the options and create a task
    pub fn new(
        name: impl Into<String>,
        mode: TaskMode,
        options: TaskOptions,
        files: Vec<PathBuf>,
        console: Console,
    ) -> Result<Arc<Self>> {
        let options = options.validate()?;

        if mode.runs_tests() && files.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "mode '{}' needs at least one configuration file",
                mode
            )));
        }

        let port = options.resolve_port();
        let units = if mode.runs_tests() { files.len() } else { 1 };

        let task = Self {
            name: name.into(),
            mode,
            port,
            files,
            console,
            processes: ProcessRegistry::new(),
            results: Mutex::new(ResultAggregator::new(units)),
            cleaned_up: AtomicBool::new(false),
            bridge: Mutex::new(None),
            started_at: Utc::now(),
            started: Instant::now(),
            options,
        };
        debug!(task = %task.name, options = ?task.options, "Options");
        info!("Task {} ({} mode) using port {}", task.name, task.mode, task.port);

        Ok(Arc::new(task))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> TaskMode {
        self.mode
    }

    pub fn options(&self) -> &TaskOptions {
        &self.options
    }

    pub fn verbose(&self) -> bool {
        self.options.verbose
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn file(&self, index: usize) -> Option<&Path> {
        self.files.get(index).map(PathBuf::as_path)
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    pub fn processes(&self) -> &ProcessRegistry {
        &self.processes
    }

    /// Console to forward server and browser output to, when verbose
    pub fn verbose_console(&self) -> Option<Console> {
        self.verbose().then(|| self.console.clone())
    }

    /// Server port used by the attempts for `file_index`.
    ///
    /// In full mode every file starts its own server, so each one gets its
    /// own port. The other modes share the one external server.
    pub fn server_port(&self, file_index: usize) -> u16 {
        if self.mode == TaskMode::Full {
            u16::try_from(file_index)
                .ok()
                .and_then(|offset| self.port.checked_add(offset))
                .unwrap_or(self.port)
        } else {
            self.port
        }
    }

    pub fn server_url(&self, file_index: usize) -> String {
        format!("http://localhost:{}", self.server_port(file_index))
    }

    pub fn capture_url(&self, file_index: usize) -> String {
        format!("{}/capture", self.server_url(file_index))
    }

    /// Path of the PhantomJS bridge script, written once per task
    pub fn bridge_script(&self) -> Result<PathBuf> {
        let mut bridge = self.bridge.lock();
        if let Some(path) = bridge.as_ref() {
            return Ok(path.to_path_buf());
        }

        let mut file = tempfile::Builder::new()
            .prefix("phantom-bridge-")
            .suffix(".js")
            .tempfile()?;
        file.write_all(BRIDGE_SCRIPT.as_bytes())?;
        file.flush()?;

        let path = file.into_temp_path();
        debug!(task = %self.name, "bridge script at {}", path.display());
        let owned = path.to_path_buf();
        *bridge = Some(path);
        Ok(owned)
    }

    pub fn remaining(&self) -> usize {
        self.results.lock().remaining()
    }

    pub fn totals(&self) -> Totals {
        self.results.lock().totals()
    }

    pub fn has_failure(&self) -> bool {
        self.totals().has_failure
    }

    pub fn mark_failed(&self) {
        self.results.lock().mark_failed();
    }

    /// Aggregate a report for a file. Returns the files still outstanding,
    /// None if the file had already reached a terminal outcome.
    pub fn record_report(&self, file_index: usize, attempts: u32, report: &Report) -> Option<usize> {
        let file = self.file(file_index).map(Path::to_path_buf);
        self.results
            .lock()
            .record_report(file_index, file, attempts, report)
    }

    pub fn record_fatal(&self, file_index: usize, attempts: u32, reason: String) -> Option<usize> {
        let file = self.file(file_index).map(Path::to_path_buf);
        self.results
            .lock()
            .record_fatal(file_index, file, attempts, reason)
    }

    /// Kill the processes of a finished attempt and forget them once dead
    pub async fn release(&self, owner: AttemptId) -> bool {
        let handles = self.processes.kill_owned(owner);
        let confirmed = crate::process::wait_all_terminated(
            &handles,
            crate::cleanup::POLL_INTERVAL,
            crate::cleanup::CLEANUP_CEILING,
        )
        .await;
        self.processes.prune_terminated();
        confirmed
    }

    /// True exactly once: the first caller runs the cleanup
    pub fn begin_cleanup(&self) -> bool {
        !self.cleaned_up.swap(true, Ordering::SeqCst)
    }

    pub fn is_cleaned_up(&self) -> bool {
        self.cleaned_up.load(Ordering::SeqCst)
    }

    /// Snapshot of the task result
    pub fn outcome(&self, cancelled: bool) -> TaskOutcome {
        let results = self.results.lock();
        let totals = results.totals();
        TaskOutcome {
            name: self.name.clone(),
            mode: self.mode,
            passed: totals.passed,
            failed: totals.failed,
            has_failure: totals.has_failure,
            cancelled,
            files: results.outcomes().to_vec(),
            started_at: self.started_at,
            duration_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

/// Final result of a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub name: String,
    pub mode: TaskMode,
    pub passed: u64,
    pub failed: u64,
    pub has_failure: bool,
    pub cancelled: bool,
    pub files: Vec<FileOutcome>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl TaskOutcome {
    pub fn success(&self) -> bool {
        !self.has_failure && !self.cancelled
    }

    /// Write the outcome as `jstd-results.json` into `dir`
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;

        let path = dir.join("jstd-results.json");
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}
