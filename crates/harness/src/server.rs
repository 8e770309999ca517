//! Coordination server management - spawning and health checking the
//! JsTestDriver server

use jstd_common::{Error, ProcessKind, Result};
use std::sync::Arc;
use tracing::info;

use crate::health::HealthPoller;
use crate::process::{AttemptId, ProcessHandle};
use crate::task::Task;

/// Starts the coordination server for an attempt and confirms it is alive
pub struct ServerSupervisor<'a> {
    task: &'a Task,
    poller: HealthPoller,
}

impl<'a> ServerSupervisor<'a> {
    pub fn new(task: &'a Task) -> Result<Self> {
        Ok(Self {
            task,
            poller: HealthPoller::new()?,
        })
    }

    /// Spawn the server and wait until its HTTP root answers 200.
    ///
    /// Fails with a start failure if the process ends first.
    pub async fn start(&self, owner: AttemptId) -> Result<Arc<ProcessHandle>> {
        let port = self.task.server_port(owner.file_index);
        let command = &self.task.options().server;
        let args = command.args_with(["--port".to_string(), port.to_string()]);

        info!("Starting jstd server on port {}...", port);

        let (handle, _output) = ProcessHandle::spawn(
            ProcessKind::Server,
            &command.program,
            &args,
            self.task.verbose_console(),
        )
        .map_err(|e| Error::from_spawn(ProcessKind::Server, e))?;
        self.task.processes().register(Some(owner), handle.clone());

        let health_url = format!("{}/", self.task.server_url(owner.file_index));

        tokio::select! {
            // An exit wins over a 200 from something else already on the port
            biased;

            state = handle.wait() => Err(Error::StartFailure {
                kind: ProcessKind::Server,
                reason: format!("failed to start server ({})", state),
            }),
            probes = self.poller.wait_ready(&health_url) => {
                info!(attempt = %owner, "Server is healthy at {} after {} probe(s)", health_url, probes);
                Ok(handle)
            }
        }
    }
}
