//! Child process management
//!
//! Every child is owned by a reaper task. A [`ProcessHandle`] only signals
//! the reaper and observes the exit state it publishes, so killing a process
//! never races a concurrent wait on it.

use jstd_common::{Error, ProcessKind, Result};
use parking_lot::Mutex;
use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::console::Console;

/// How long the reaper waits for the output tail once the child is gone.
/// A grandchild holding the pipes open must not block exit reporting.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Which stream a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// One line of child output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: Stream,
    pub text: String,
}

/// How a child ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitState {
    Exited(i32),
    Signaled(i32),
    /// The exit status could not be collected
    Lost(String),
}

impl ExitState {
    pub fn success(&self) -> bool {
        matches!(self, ExitState::Exited(0))
    }
}

impl From<ExitStatus> for ExitState {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ExitState::Exited(code);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitState::Signaled(signal);
            }
        }

        ExitState::Lost(format!("unrecognised exit status: {}", status))
    }
}

impl fmt::Display for ExitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitState::Exited(code) => write!(f, "exit code {}", code),
            #[cfg(unix)]
            ExitState::Signaled(signal) => match nix::sys::signal::Signal::try_from(*signal) {
                Ok(sig) => write!(f, "killed by {}", sig.as_str()),
                Err(_) => write!(f, "killed by signal {}", signal),
            },
            #[cfg(not(unix))]
            ExitState::Signaled(signal) => write!(f, "killed by signal {}", signal),
            ExitState::Lost(reason) => write!(f, "exit status lost: {}", reason),
        }
    }
}

/// Identifies the run attempt a process belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttemptId {
    pub file_index: usize,
    pub attempt: u32,
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}/{}", self.file_index, self.attempt)
    }
}

/// Handle to a spawned child process
#[derive(Debug)]
pub struct ProcessHandle {
    kind: ProcessKind,
    program: String,
    pid: Option<u32>,
    kill: CancellationToken,
    exit: watch::Receiver<Option<ExitState>>,
}

impl ProcessHandle {
    /// Spawn `program` with `args`, returning the handle and its output lines.
    ///
    /// Lines are sent to the returned channel whether or not anyone reads it.
    /// When `forward` is set every line is also written to the console.
    pub fn spawn(
        kind: ProcessKind,
        program: &str,
        args: &[String],
        forward: Option<Console>,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<OutputLine>)> {
        debug!("{} command: {} {}", kind, program, args.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::Spawn {
                program: program.to_string(),
                source,
            })?;

        let pid = child.id();
        debug!(%kind, pid = ?pid, "{} started", kind);

        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(pump(stdout, Stream::Stdout, line_tx.clone(), forward.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(pump(stderr, Stream::Stderr, line_tx, forward)));
        }

        let kill = CancellationToken::new();
        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(reap(child, kind, kill.clone(), readers, exit_tx));

        let handle = Arc::new(Self {
            kind,
            program: program.to_string(),
            pid,
            kill,
            exit: exit_rx,
        });

        Ok((handle, line_rx))
    }

    pub fn kind(&self) -> ProcessKind {
        self.kind
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Send a hard kill. Killing an exited process is a no-op.
    pub fn kill(&self) {
        if !self.is_terminated() {
            trace!(kind = %self.kind, pid = ?self.pid, "kill requested");
        }
        self.kill.cancel();
    }

    /// True once the child has exited and been reaped
    pub fn is_terminated(&self) -> bool {
        self.exit.borrow().is_some()
    }

    pub fn exit_state(&self) -> Option<ExitState> {
        self.exit.borrow().clone()
    }

    /// Wait until the child has been reaped
    pub async fn wait(&self) -> ExitState {
        let mut exit = self.exit.clone();
        let state = match exit.wait_for(Option::is_some).await {
            Ok(state) => state
                .clone()
                .unwrap_or_else(|| ExitState::Lost("no exit state published".to_string())),
            Err(_) => ExitState::Lost("reaper stopped".to_string()),
        };
        state
    }
}

async fn pump<R>(
    reader: R,
    stream: Stream,
    tx: mpsc::UnboundedSender<OutputLine>,
    forward: Option<Console>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(text)) = lines.next_line().await {
        let line = OutputLine { stream, text };
        if let Some(console) = &forward {
            console.forward(&line);
        }
        // The receiver may be gone, the pipe still has to be drained
        let _ = tx.send(line);
    }
}

async fn reap(
    mut child: Child,
    kind: ProcessKind,
    kill: CancellationToken,
    readers: Vec<JoinHandle<()>>,
    exit_tx: watch::Sender<Option<ExitState>>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill.cancelled() => {
            if let Err(e) = child.start_kill() {
                trace!("start_kill on {}: {}", kind, e);
            }
            child.wait().await
        }
    };

    for reader in readers {
        let _ = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, reader).await;
    }

    let state = match status {
        Ok(status) => ExitState::from(status),
        Err(e) => ExitState::Lost(e.to_string()),
    };
    debug!(%kind, "{} ended: {}", kind, state);
    exit_tx.send_replace(Some(state));
}

/// A process tracked by a task
#[derive(Debug, Clone)]
pub struct ProcessRecord {
    /// None for processes not tied to a single attempt
    pub owner: Option<AttemptId>,
    pub handle: Arc<ProcessHandle>,
}

/// The set of processes a task has spawned and not yet confirmed dead
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    records: Arc<Mutex<Vec<ProcessRecord>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, owner: Option<AttemptId>, handle: Arc<ProcessHandle>) {
        self.records.lock().push(ProcessRecord { owner, handle });
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn records(&self) -> Vec<ProcessRecord> {
        self.records.lock().clone()
    }

    /// Kill every process owned by `owner` and return their handles
    pub fn kill_owned(&self, owner: AttemptId) -> Vec<Arc<ProcessHandle>> {
        let handles: Vec<_> = self
            .records
            .lock()
            .iter()
            .filter(|r| r.owner == Some(owner))
            .map(|r| r.handle.clone())
            .collect();
        for handle in &handles {
            handle.kill();
        }
        handles
    }

    /// Kill every tracked process and return their handles
    pub fn kill_all(&self) -> Vec<Arc<ProcessHandle>> {
        let handles: Vec<_> = self.records.lock().iter().map(|r| r.handle.clone()).collect();
        for handle in &handles {
            handle.kill();
        }
        handles
    }

    /// Forget records whose process is confirmed terminated
    pub fn prune_terminated(&self) -> usize {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|r| !r.handle.is_terminated());
        before - records.len()
    }

    pub fn all_terminated(&self) -> bool {
        self.records.lock().iter().all(|r| r.handle.is_terminated())
    }
}

/// Poll `handles` every `interval` until all are terminated or `ceiling`
/// elapses. Returns whether all were confirmed terminated.
pub async fn wait_all_terminated(
    handles: &[Arc<ProcessHandle>],
    interval: Duration,
    ceiling: Duration,
) -> bool {
    let start = Instant::now();
    loop {
        if handles.iter().all(|h| h.is_terminated()) {
            return true;
        }
        if start.elapsed() >= ceiling {
            return false;
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> (Arc<ProcessHandle>, mpsc::UnboundedReceiver<OutputLine>) {
        ProcessHandle::spawn(
            ProcessKind::Runner,
            "/bin/sh",
            &["-c".to_string(), script.to_string()],
            None,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_output_and_exit_code() {
        let (handle, mut lines) = sh("echo hello; echo oops >&2; exit 3");
        assert_eq!(handle.wait().await, ExitState::Exited(3));
        assert!(handle.is_terminated());

        let mut seen = Vec::new();
        while let Some(line) = lines.recv().await {
            seen.push(line);
        }
        assert!(seen.contains(&OutputLine { stream: Stream::Stdout, text: "hello".into() }));
        assert!(seen.contains(&OutputLine { stream: Stream::Stderr, text: "oops".into() }));
    }

    #[tokio::test]
    async fn test_kill_is_idempotent() {
        let (handle, _lines) = sh("sleep 30");
        assert!(!handle.is_terminated());

        handle.kill();
        handle.kill();
        let state = handle.wait().await;
        assert_eq!(state, ExitState::Signaled(9));
        assert_eq!(state.to_string(), "killed by SIGKILL");

        // Already dead
        handle.kill();
        assert!(handle.is_terminated());
    }

    #[tokio::test]
    async fn test_concurrent_waiters_see_the_same_exit() {
        let (handle, _lines) = sh("exit 7");
        let (first, second) = tokio::join!(handle.wait(), handle.wait());
        assert_eq!(first, ExitState::Exited(7));
        assert_eq!(first, second);
        assert_eq!(handle.exit_state(), Some(ExitState::Exited(7)));
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let err = ProcessHandle::spawn(ProcessKind::Server, "/nonexistent/jstd", &[], None).unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_registry_kill_owned_leaves_others() {
        let registry = ProcessRegistry::new();
        let mine = AttemptId { file_index: 0, attempt: 1 };
        let theirs = AttemptId { file_index: 1, attempt: 1 };

        let (a, _la) = sh("sleep 30");
        let (b, _lb) = sh("sleep 30");
        registry.register(Some(mine), a.clone());
        registry.register(Some(theirs), b.clone());

        let killed = registry.kill_owned(mine);
        assert_eq!(killed.len(), 1);
        assert!(wait_all_terminated(&killed, Duration::from_millis(20), Duration::from_secs(5)).await);
        assert!(!b.is_terminated());

        assert_eq!(registry.prune_terminated(), 1);
        assert_eq!(registry.len(), 1);

        let rest = registry.kill_all();
        assert!(wait_all_terminated(&rest, Duration::from_millis(20), Duration::from_secs(5)).await);
        assert!(registry.all_terminated());
    }
}
