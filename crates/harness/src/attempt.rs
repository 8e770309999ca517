//! Run attempts and the retry controller
//!
//! One [`RetryController`] owns the attempts for one configuration file. Each
//! attempt races its pipeline against a single timer; whichever finishes
//! first decides the attempt, and the loser is dropped. A report arriving
//! after the timer fired is therefore never applied.

use jstd_common::{AttemptPhase, Error, Report, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::browser::BrowserSupervisor;
use crate::process::AttemptId;
use crate::runner::RunInvoker;
use crate::server::ServerSupervisor;
use crate::task::Task;

/// One configuration file's execution, possibly retried
#[derive(Debug)]
pub struct RunAttempt {
    file_index: usize,
    file: Option<PathBuf>,
    number: u32,
    phase: watch::Sender<AttemptPhase>,
}

impl RunAttempt {
    pub fn new(file_index: usize, file: Option<PathBuf>) -> Self {
        let (phase, _) = watch::channel(AttemptPhase::Pending);
        Self {
            file_index,
            file,
            number: 1,
            phase,
        }
    }

    pub fn id(&self) -> AttemptId {
        AttemptId {
            file_index: self.file_index,
            attempt: self.number,
        }
    }

    /// 1-based attempt number
    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    pub fn phase(&self) -> AttemptPhase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<AttemptPhase> {
        self.phase.subscribe()
    }

    /// Move to `next`, rejecting transitions the state machine forbids
    pub fn advance(&self, next: AttemptPhase) -> Result<()> {
        let mut result = Ok(());
        self.phase.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                result = Err(Error::InvalidStateTransition {
                    from: *current,
                    to: next,
                });
                false
            }
        });
        result
    }

    /// Start over from PENDING after a timeout
    pub fn restart(&mut self) -> Result<()> {
        self.advance(AttemptPhase::Pending)?;
        self.number += 1;
        Ok(())
    }

    fn label(&self) -> String {
        match &self.file {
            Some(file) => file.display().to_string(),
            None => "server".to_string(),
        }
    }
}

/// Terminal outcome of a configuration file
#[derive(Debug)]
pub enum Terminal {
    Reported {
        report: Report,
        /// Files still outstanding, None if the outcome was a duplicate
        remaining: Option<usize>,
    },
    Fatal {
        error: Error,
        remaining: Option<usize>,
    },
}

enum Step {
    Finished(Result<Option<String>>),
    TimedOut,
}

/// Arms a timer per attempt and retries timed-out attempts while the
/// budget lasts
pub struct RetryController<'a> {
    task: &'a Task,
    attempt: RunAttempt,
    timeout: Duration,
    budget: u32,
}

impl<'a> RetryController<'a> {
    pub fn new(task: &'a Task, file_index: usize) -> Self {
        let file = task.file(file_index).map(Path::to_path_buf);
        Self {
            task,
            attempt: RunAttempt::new(file_index, file),
            timeout: task.options().timeout(),
            budget: task.options().retries,
        }
    }

    pub fn attempt(&self) -> &RunAttempt {
        &self.attempt
    }

    /// Drive the file to a terminal outcome and record it on the task
    pub async fn run(mut self) -> Terminal {
        loop {
            let id = self.attempt.id();
            debug!(attempt = %id, "starting attempt {} for {}", id.attempt, self.attempt.label());

            let step = tokio::select! {
                result = run_pipeline(self.task, &self.attempt) => Step::Finished(result),
                _ = tokio::time::sleep(self.timeout) => Step::TimedOut,
            };

            match step {
                Step::Finished(Ok(text)) => return self.reported(text).await,
                Step::Finished(Err(e)) => return self.fatal(e),
                Step::TimedOut => {
                    let phase = self.attempt.phase();
                    self.transition(AttemptPhase::TimedOut);
                    warn!(
                        attempt = %id,
                        "{} timed out after {:?} in {}",
                        self.attempt.label(),
                        self.timeout,
                        phase
                    );

                    if !self.task.release(id).await {
                        warn!(attempt = %id, "processes did not terminate after timeout");
                    }

                    // The budget counts every attempt, the first included
                    self.budget = self.budget.saturating_sub(1);
                    if self.budget == 0 {
                        let attempts = self.attempt.number();
                        return self.fatal(Error::Timeout { attempts });
                    }

                    info!(
                        "Retrying {} ({} attempt(s) left)",
                        self.attempt.label(),
                        self.budget
                    );
                    if let Err(e) = self.attempt.restart() {
                        return self.fatal(e);
                    }
                }
            }
        }
    }

    async fn reported(&self, text: Option<String>) -> Terminal {
        let id = self.attempt.id();
        let label = self.attempt.label();
        self.transition(AttemptPhase::Reported);

        let report = match &text {
            Some(text) => {
                let report = Report::parse(text);
                if report.malformed {
                    debug!(attempt = %id, "no usable counters in the report for {}, counting it as zero", label);
                }
                if report.has_failed_tests() {
                    debug!("   ONE or MORE tests have failed in: {}", label);
                } else {
                    debug!("{}", text);
                }
                report
            }
            None => Report::default(),
        };

        if self.task.verbose() && text.is_some() {
            info!("{}: Passed: {}, Fails: {}", label, report.passed, report.failed);
        }
        debug!(">> Finished running file: {}", label);

        let remaining = self
            .task
            .record_report(id.file_index, id.attempt, &report);

        if self.task.mode().runs_tests() && !self.task.release(id).await {
            warn!(attempt = %id, "processes did not terminate after the run");
        }

        Terminal::Reported { report, remaining }
    }

    fn fatal(&self, error: Error) -> Terminal {
        let id = self.attempt.id();
        self.transition(AttemptPhase::Fatal);
        error!(attempt = %id, "{}: {}", self.attempt.label(), error);

        let remaining = self
            .task
            .record_fatal(id.file_index, id.attempt, error.to_string());
        Terminal::Fatal { error, remaining }
    }

    fn transition(&self, next: AttemptPhase) {
        if let Err(e) = self.attempt.advance(next) {
            error!(attempt = %self.attempt.id(), "{}", e);
        }
    }
}

/// The phase sequence for the task's mode. Returns the captured report,
/// None for the server-only pipeline.
async fn run_pipeline(task: &Task, attempt: &RunAttempt) -> Result<Option<String>> {
    let mode = task.mode();
    let id = attempt.id();

    if mode.starts_server() {
        attempt.advance(AttemptPhase::ServerStarting)?;
        ServerSupervisor::new(task)?.start(id).await?;
    }

    if !mode.runs_tests() {
        return Ok(None);
    }

    if mode.starts_browser() {
        attempt.advance(AttemptPhase::BrowserStarting)?;
        BrowserSupervisor::new(task).start(id).await?;
    }

    attempt.advance(AttemptPhase::Running)?;
    let file = attempt
        .file()
        .ok_or_else(|| Error::InvalidConfig(format!("no configuration file for attempt {}", id)))?;
    RunInvoker::new(task).run(id, file).await.map(Some)
}
