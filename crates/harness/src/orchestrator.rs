//! Task orchestration
//!
//! Starts one [`RetryController`] per configuration file, all at once, and
//! decides the task once every file has an outcome or one of them failed
//! fatally. Cleanup always runs before the outcome is returned.

use jstd_common::{ProcessKind, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::attempt::{RetryController, Terminal};
use crate::cleanup::Cleanup;
use crate::task::{Task, TaskOutcome};

pub struct TaskOrchestrator {
    task: Arc<Task>,
}

impl TaskOrchestrator {
    pub fn new(task: Arc<Task>) -> Self {
        Self { task }
    }

    pub fn task(&self) -> &Arc<Task> {
        &self.task
    }

    /// Run until the task completes
    pub async fn run(self) -> Result<TaskOutcome> {
        self.run_until(std::future::pending()).await
    }

    /// Run until the task completes or `shutdown` resolves.
    ///
    /// A shutdown while tests are running cancels the task. In server mode
    /// the shutdown is the normal way to end it.
    pub async fn run_until<F>(self, shutdown: F) -> Result<TaskOutcome>
    where
        F: Future<Output = ()>,
    {
        let task = self.task;
        let mode = task.mode();

        if let Some(dir) = &task.options().test_output {
            tokio::fs::create_dir_all(dir).await?;
        }

        let units = if mode.runs_tests() { task.files().len() } else { 1 };
        let mut controllers = JoinSet::new();
        for index in 0..units {
            let task = task.clone();
            controllers.spawn(async move { RetryController::new(&task, index).run().await });
        }

        tokio::pin!(shutdown);
        let interrupted = tokio::select! {
            _ = hold(&task, &mut controllers) => false,
            _ = &mut shutdown => true,
        };

        // Nothing may spawn once cleanup has taken its snapshot
        controllers.shutdown().await;

        let cancelled = interrupted && mode.runs_tests();
        if cancelled {
            warn!("Task {} interrupted", task.name());
            task.mark_failed();
        }

        let totals = task.totals();
        if mode.runs_tests() {
            task.console().summary(totals.passed, totals.failed);
        }

        let report = Cleanup::new(&task).run().await;
        debug!(?report, "cleanup finished");

        let outcome = task.outcome(cancelled);
        for file in outcome.files.iter().filter(|f| f.failing) {
            if let (Some(path), Some(reason)) = (&file.file, &file.reason) {
                error!("{}: {}", path.display(), reason);
            }
        }

        if let Some(dir) = &task.options().test_output {
            if let Err(e) = outcome.write_to(dir) {
                warn!("Failed to write results to {}: {}", dir.display(), e);
            }
        }

        Ok(outcome)
    }
}

/// Wait for the controllers to decide the task. A server-mode task that came
/// up keeps holding until shut down or until its server dies.
async fn hold(task: &Task, controllers: &mut JoinSet<Terminal>) {
    let fatal = drive(task, controllers).await;
    if fatal || task.mode().runs_tests() {
        return;
    }

    let server = task
        .processes()
        .records()
        .into_iter()
        .map(|record| record.handle)
        .find(|handle| handle.kind() == ProcessKind::Server);

    info!(
        "Server running at {}, press Ctrl-C to stop",
        task.server_url(0)
    );
    match server {
        Some(server) => {
            let state = server.wait().await;
            error!("Server exited while holding ({})", state);
            task.mark_failed();
        }
        None => std::future::pending::<()>().await,
    }
}

/// Collect terminal outcomes. Returns true if a fatal outcome ended the task.
async fn drive(task: &Task, controllers: &mut JoinSet<Terminal>) -> bool {
    while let Some(joined) = controllers.join_next().await {
        match joined {
            Ok(Terminal::Reported { remaining, .. }) => {
                if remaining == Some(0) {
                    debug!(task = %task.name(), "every configuration file reported");
                }
            }
            Ok(Terminal::Fatal { .. }) => {
                // The file outcome is already recorded, siblings are cancelled
                return true;
            }
            Err(e) => {
                error!("attempt controller failed: {}", e);
                task.mark_failed();
                return true;
            }
        }
    }
    false
}
