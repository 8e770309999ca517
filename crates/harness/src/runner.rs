//! Test-runner invocation for one configuration file

use jstd_common::{Error, ProcessKind, Report, Result};
use std::path::Path;
use tracing::{debug, info};

use crate::process::{AttemptId, ProcessHandle, Stream};
use crate::task::Task;

/// Runs the test runner against a configuration file and the running server
pub struct RunInvoker<'a> {
    task: &'a Task,
}

impl<'a> RunInvoker<'a> {
    pub fn new(task: &'a Task) -> Self {
        Self { task }
    }

    /// Runner arguments: config file, server URL, then the allowed options
    pub fn build_args(&self, config_file: &Path, file_index: usize) -> Vec<String> {
        let options = self.task.options();

        let mut extra = vec![
            "--config".to_string(),
            config_file.to_string_lossy().to_string(),
        ];
        if options.reset {
            extra.push("--reset".to_string());
        }
        extra.push("--server".to_string());
        extra.push(self.task.server_url(file_index));
        extra.extend(options.runner_args());

        options.runner.args_with(extra)
    }

    /// Run the tests, streaming output live, and return the captured stdout.
    ///
    /// Fails with a transport failure when the runner ends without printing
    /// a structured result.
    pub async fn run(&self, owner: AttemptId, config_file: &Path) -> Result<String> {
        let command = &self.task.options().runner;
        let args = self.build_args(config_file, owner.file_index);

        info!("Running tests for {}...", config_file.display());

        let (handle, mut output) = ProcessHandle::spawn(
            ProcessKind::Runner,
            &command.program,
            &args,
            Some(self.task.console().clone()),
        )
        .map_err(|e| Error::from_spawn(ProcessKind::Runner, e))?;
        self.task.processes().register(Some(owner), handle.clone());

        let mut captured = String::new();
        while let Some(line) = output.recv().await {
            if line.stream == Stream::Stdout {
                captured.push_str(&line.text);
                captured.push('\n');
            }
        }

        let state = handle.wait().await;
        debug!(attempt = %owner, "runner finished with {}", state);

        if Report::is_structured(&captured) {
            Ok(captured)
        } else {
            Err(Error::Transport(format!(
                "runner for {} ended ({}) without a test report",
                config_file.display(),
                state
            )))
        }
    }
}
