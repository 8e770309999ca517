//! Headless browser capture
//!
//! PhantomJS gives no signal when it has registered with the server. It is
//! launched through a bridge script (bundled as [`BRIDGE_SCRIPT`]) that
//! prints every resource response as a JSON line; registration is inferred
//! from the heartbeat traffic seen there:
//!
//! ```text
//! {"event":"onResourceReceived","url":"http://localhost:4224/heartbeat","status":200}
//! ```

use jstd_common::config::BRIDGE_PLACEHOLDER;
use jstd_common::{Error, ProcessKind, Result};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use crate::console::Console;
use crate::process::{AttemptId, OutputLine, ProcessHandle};
use crate::task::Task;

/// PhantomJS script reporting resource responses as JSON lines
pub const BRIDGE_SCRIPT: &str = include_str!("../assets/phantom-bridge.js");

/// An event reported by the browser bridge
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event")]
pub enum BrowserEvent {
    #[serde(rename = "onResourceReceived")]
    ResourceReceived {
        url: String,
        #[serde(default)]
        status: Option<u16>,
    },
    #[serde(other)]
    Other,
}

impl BrowserEvent {
    /// Parse a bridge line; None for ordinary browser output
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if !line.starts_with('{') {
            return None;
        }
        serde_json::from_str(line).ok()
    }
}

/// What the resource traffic says about the capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// A heartbeat went out: the browser is a registered capture client
    Registered,
    /// The capture page answered 404: the server is not taking captures
    CaptureNotFound,
}

/// Turns bridge events into a single readiness decision.
///
/// Only the first decisive event counts; everything after it is ignored.
#[derive(Debug, Default)]
pub struct HeartbeatDetector {
    resolved: bool,
}

impl HeartbeatDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    pub fn observe(&mut self, event: &BrowserEvent) -> Option<Readiness> {
        if self.resolved {
            return None;
        }

        let BrowserEvent::ResourceReceived { url, status } = event else {
            return None;
        };

        let path = url_path(url);
        let readiness = if path.ends_with("/capture") && *status == Some(404) {
            Readiness::CaptureNotFound
        } else if path.ends_with("/heartbeat") {
            Readiness::Registered
        } else {
            return None;
        };

        self.resolved = true;
        Some(readiness)
    }
}

fn url_path(url: &str) -> &str {
    url.split(|c: char| c == '?' || c == '#').next().unwrap_or(url)
}

/// Launches the headless browser at the capture URL and waits for it to
/// register with the server
pub struct BrowserSupervisor<'a> {
    task: &'a Task,
}

impl<'a> BrowserSupervisor<'a> {
    pub fn new(task: &'a Task) -> Self {
        Self { task }
    }

    /// Browser arguments: the configured ones with the bridge placeholder
    /// resolved, then the capture URL
    pub fn build_args(&self, capture_url: &str) -> Result<Vec<String>> {
        let command = &self.task.options().browser;
        let mut args = Vec::with_capacity(command.args.len() + 1);
        for arg in &command.args {
            if arg == BRIDGE_PLACEHOLDER {
                args.push(self.task.bridge_script()?.to_string_lossy().into_owned());
            } else {
                args.push(arg.clone());
            }
        }
        args.push(capture_url.to_string());
        Ok(args)
    }

    pub async fn start(&self, owner: AttemptId) -> Result<Arc<ProcessHandle>> {
        let capture_url = self.task.capture_url(owner.file_index);
        let command = &self.task.options().browser;
        let args = self.build_args(&capture_url)?;

        info!("Starting PhantomJS at {}...", capture_url);

        // Output is forwarded below so bridge events stay off the console
        let (handle, mut output) =
            ProcessHandle::spawn(ProcessKind::Browser, &command.program, &args, None)
                .map_err(|e| Error::from_spawn(ProcessKind::Browser, e))?;
        self.task.processes().register(Some(owner), handle.clone());

        let console = self.task.verbose_console();
        let mut detector = HeartbeatDetector::new();

        loop {
            tokio::select! {
                // Lines are published before the exit, read them first
                biased;

                line = output.recv() => match line {
                    Some(line) => match observe_line(&mut detector, &line, console.as_ref()) {
                        Some(Readiness::Registered) => {
                            info!(attempt = %owner, "Browser captured");
                            tokio::spawn(drain(output, console));
                            return Ok(handle);
                        }
                        Some(Readiness::CaptureNotFound) => {
                            return Err(Error::StartFailure {
                                kind: ProcessKind::Browser,
                                reason: "server did not respond".to_string(),
                            });
                        }
                        None => {}
                    },
                    // Pipes closed, the browser is going away
                    None => {
                        handle.wait().await;
                        return Err(browser_exited(&handle));
                    }
                },
                _ = handle.wait() => return Err(browser_exited(&handle)),
            }
        }
    }
}

fn observe_line(
    detector: &mut HeartbeatDetector,
    line: &OutputLine,
    console: Option<&Console>,
) -> Option<Readiness> {
    match BrowserEvent::parse(&line.text) {
        Some(event) => detector.observe(&event),
        None => {
            if let Some(console) = console {
                console.forward(line);
            }
            None
        }
    }
}

fn browser_exited(handle: &ProcessHandle) -> Error {
    let state = handle
        .exit_state()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "still running".to_string());
    Error::StartFailure {
        kind: ProcessKind::Browser,
        reason: format!("browser exited before registering ({})", state),
    }
}

/// Keep reading browser output after capture so the pipes never fill up
async fn drain(mut output: mpsc::UnboundedReceiver<OutputLine>, console: Option<Console>) {
    while let Some(line) = output.recv().await {
        if BrowserEvent::parse(&line.text).is_none() {
            if let Some(console) = &console {
                console.forward(&line);
            }
        }
    }
}
