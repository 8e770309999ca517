//! Task teardown

use std::time::Duration;
use tracing::{debug, warn};

use crate::process::wait_all_terminated;
use crate::task::Task;

/// Interval between termination checks
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Absolute limit on waiting for killed processes
pub const CLEANUP_CEILING: Duration = Duration::from_secs(10);

/// What a cleanup pass did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub killed: usize,
    pub confirmed: bool,
    /// False when cleanup had already run for this task
    pub ran: bool,
}

/// Kills every process a task still tracks and waits for them to go
pub struct Cleanup<'a> {
    task: &'a Task,
    ceiling: Duration,
}

impl<'a> Cleanup<'a> {
    pub fn new(task: &'a Task) -> Self {
        Self {
            task,
            ceiling: CLEANUP_CEILING,
        }
    }

    pub fn with_ceiling(mut self, ceiling: Duration) -> Self {
        self.ceiling = ceiling;
        self
    }

    /// Runs at most once per task; later calls return immediately
    pub async fn run(&self) -> CleanupReport {
        if !self.task.begin_cleanup() {
            return CleanupReport {
                killed: 0,
                confirmed: self.task.processes().all_terminated(),
                ran: false,
            };
        }

        let (killed, confirmed) = {
            // Killed children must not log over the decided result
            let _quiet = self.task.console().quiet();
            let handles = self.task.processes().kill_all();
            let confirmed = wait_all_terminated(&handles, POLL_INTERVAL, self.ceiling).await;
            self.task.processes().prune_terminated();
            (handles.len(), confirmed)
        };

        if confirmed {
            debug!(task = %self.task.name(), "cleanup killed {} process(es)", killed);
        } else {
            warn!(
                task = %self.task.name(),
                "{} process(es) still running after {:?}",
                self.task.processes().len(),
                self.ceiling
            );
        }

        CleanupReport {
            killed,
            confirmed,
            ran: true,
        }
    }
}
