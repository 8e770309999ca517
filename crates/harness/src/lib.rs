//! jstd-phantom harness
//!
//! Drives JsTestDriver test runs from the command line:
//! - Spawns the JsTestDriver server and polls it until it answers
//! - Captures a headless PhantomJS browser and waits for its heartbeat
//! - Runs each configuration file through the test runner and parses the report
//! - Retries timed-out attempts and kills every child process when done
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  TaskOrchestrator                                           │
//! │    └── RetryController (one per configuration file)         │
//! │          └── RunAttempt (timer armed per attempt)           │
//! │                ├── ServerSupervisor  -> HealthPoller        │
//! │                ├── BrowserSupervisor -> HeartbeatDetector   │
//! │                └── RunInvoker        -> Report              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Task                                                       │
//! │    ├── ProcessRegistry (every child, by owning attempt)     │
//! │    ├── ResultAggregator (totals, one outcome per file)      │
//! │    └── Console (output forwarding, quiet switch)            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Cleanup: kill all, wait up to 10s, exactly once per task   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod attempt;
pub mod browser;
pub mod cleanup;
pub mod console;
pub mod health;
pub mod orchestrator;
pub mod process;
pub mod results;
pub mod runner;
pub mod server;
pub mod task;

pub use attempt::{RetryController, RunAttempt, Terminal};
pub use browser::BrowserSupervisor;
pub use cleanup::{Cleanup, CleanupReport};
pub use console::{Console, QuietSwitch, SUMMARY_TARGET};
pub use health::HealthPoller;
pub use orchestrator::TaskOrchestrator;
pub use process::{ProcessHandle, ProcessRegistry};
pub use results::{FileOutcome, ResultAggregator, Totals};
pub use runner::RunInvoker;
pub use server::ServerSupervisor;
pub use task::{Task, TaskOutcome};
