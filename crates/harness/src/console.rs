//! Console output and the quiet switch
//!
//! The quiet switch is created before the tracing subscriber and installed
//! as a per-layer filter, so teardown can silence ordinary logging without
//! touching the output streams. Events on [`SUMMARY_TARGET`] always pass.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::Metadata;
use tracing_subscriber::filter::{filter_fn, FilterFn};

use crate::process::{OutputLine, Stream};

/// Target for the final summary line, never silenced
pub const SUMMARY_TARGET: &str = "jstd::summary";

/// Shared flag silencing logs and forwarded child output
#[derive(Debug, Clone, Default)]
pub struct QuietSwitch(Arc<AtomicBool>);

impl QuietSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, quiet: bool) {
        self.0.store(quiet, Ordering::SeqCst);
    }

    pub fn is_quiet(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Layer filter dropping every event except the summary while quiet
    pub fn filter(&self) -> FilterFn<impl Fn(&Metadata<'_>) -> bool + Clone + Send + Sync + 'static> {
        let switch = self.clone();
        filter_fn(move |meta| meta.target() == SUMMARY_TARGET || !switch.is_quiet())
    }
}

/// Turns quiet mode off again when dropped
pub struct QuietGuard {
    switch: QuietSwitch,
}

impl Drop for QuietGuard {
    fn drop(&mut self) {
        self.switch.set(false);
    }
}

/// Where child output and the summary go
#[derive(Debug, Clone, Default)]
pub struct Console {
    quiet: QuietSwitch,
}

impl Console {
    pub fn new(quiet: QuietSwitch) -> Self {
        Self { quiet }
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet.is_quiet()
    }

    /// Enter quiet mode until the guard is dropped
    pub fn quiet(&self) -> QuietGuard {
        self.quiet.set(true);
        QuietGuard {
            switch: self.quiet.clone(),
        }
    }

    /// Forward a child output line to our own stdout/stderr
    pub fn forward(&self, line: &OutputLine) {
        if self.is_quiet() {
            return;
        }
        // A closed stdout must not take the harness down
        let _ = match line.stream {
            Stream::Stdout => writeln!(std::io::stdout().lock(), "{}", line.text),
            Stream::Stderr => writeln!(std::io::stderr().lock(), "{}", line.text),
        };
    }

    /// Emit the final total, visible even in quiet mode
    pub fn summary(&self, passed: u64, failed: u64) {
        tracing::info!(target: SUMMARY_TARGET, "Total Passed: {}, Fails: {}", passed, failed);
    }
}
