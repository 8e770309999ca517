//! Core domain types shared by the harness and the CLI

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Process kinds
// ============================================================================

/// Kind of child process spawned by a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessKind {
    /// JsTestDriver coordination server
    Server,
    /// Headless browser registered as a capture client
    Browser,
    /// Test-runner invocation for one configuration file
    Runner,
}

impl ProcessKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessKind::Server => "server",
            ProcessKind::Browser => "browser",
            ProcessKind::Runner => "runner",
        }
    }
}

impl fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Task modes
// ============================================================================

/// Which pipeline a task runs for every configuration file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskMode {
    /// server -> browser -> run
    #[default]
    Full,
    /// Start the server and hold it until interrupted
    Server,
    /// browser -> run against an externally started server
    Browser,
    /// run only, server and browser are already up
    Run,
}

impl TaskMode {
    pub fn starts_server(&self) -> bool {
        matches!(self, TaskMode::Full | TaskMode::Server)
    }

    pub fn starts_browser(&self) -> bool {
        matches!(self, TaskMode::Full | TaskMode::Browser)
    }

    pub fn runs_tests(&self) -> bool {
        !matches!(self, TaskMode::Server)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskMode::Full => "full",
            TaskMode::Server => "server",
            TaskMode::Browser => "browser",
            TaskMode::Run => "run",
        }
    }
}

impl fmt::Display for TaskMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(TaskMode::Full),
            "server" => Ok(TaskMode::Server),
            "browser" => Ok(TaskMode::Browser),
            "run" => Ok(TaskMode::Run),
            other => Err(format!(
                "unknown mode '{}' (expected full, server, browser or run)",
                other
            )),
        }
    }
}

// ============================================================================
// Run attempt phases
// ============================================================================

/// Phase of one run attempt for a configuration file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptPhase {
    Pending,
    ServerStarting,
    BrowserStarting,
    Running,
    Reported,
    TimedOut,
    Fatal,
}

impl AttemptPhase {
    /// Reported and Fatal end the attempt for good
    pub fn is_terminal(&self) -> bool {
        matches!(self, AttemptPhase::Reported | AttemptPhase::Fatal)
    }

    /// Check if a transition to `next` is allowed
    pub fn can_transition_to(&self, next: AttemptPhase) -> bool {
        use AttemptPhase::*;

        match (self, next) {
            (Reported | Fatal, _) => false,
            // Any in-flight phase may time out or fail hard
            (Pending | ServerStarting | BrowserStarting | Running, TimedOut | Fatal) => true,
            (Pending, ServerStarting | BrowserStarting | Running) => true,
            // The server-only pipeline reports as soon as the server is up
            (ServerStarting, BrowserStarting | Running | Reported) => true,
            (BrowserStarting, Running) => true,
            (Running, Reported) => true,
            (TimedOut, Pending | Fatal) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptPhase::Pending => "PENDING",
            AttemptPhase::ServerStarting => "SERVER_STARTING",
            AttemptPhase::BrowserStarting => "BROWSER_STARTING",
            AttemptPhase::Running => "RUNNING",
            AttemptPhase::Reported => "REPORTED",
            AttemptPhase::TimedOut => "TIMED_OUT",
            AttemptPhase::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for AttemptPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("full".parse::<TaskMode>().unwrap(), TaskMode::Full);
        assert_eq!("Browser".parse::<TaskMode>().unwrap(), TaskMode::Browser);
        assert!("phantom".parse::<TaskMode>().is_err());
    }

    #[test]
    fn test_mode_pipelines() {
        assert!(TaskMode::Full.starts_server() && TaskMode::Full.starts_browser());
        assert!(!TaskMode::Browser.starts_server() && TaskMode::Browser.starts_browser());
        assert!(!TaskMode::Run.starts_server() && !TaskMode::Run.starts_browser());
        assert!(!TaskMode::Server.runs_tests());
    }

    #[test]
    fn test_terminal_phases_are_final() {
        for next in [AttemptPhase::Pending, AttemptPhase::Running, AttemptPhase::Fatal] {
            assert!(!AttemptPhase::Reported.can_transition_to(next));
            assert!(!AttemptPhase::Fatal.can_transition_to(next));
        }
    }

    #[test]
    fn test_timed_out_either_restarts_or_fails() {
        assert!(AttemptPhase::TimedOut.can_transition_to(AttemptPhase::Pending));
        assert!(AttemptPhase::TimedOut.can_transition_to(AttemptPhase::Fatal));
        assert!(!AttemptPhase::TimedOut.can_transition_to(AttemptPhase::Reported));
    }

    #[test]
    fn test_phases_cannot_skip_backwards() {
        assert!(!AttemptPhase::Running.can_transition_to(AttemptPhase::ServerStarting));
        assert!(!AttemptPhase::BrowserStarting.can_transition_to(AttemptPhase::Reported));
        assert!(AttemptPhase::Pending.can_transition_to(AttemptPhase::Running));
    }
}
