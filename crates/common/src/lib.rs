//! jstd-phantom common library
//!
//! Shared error taxonomy, task options, report parsing and domain types used
//! by the harness and the command line.

pub mod config;
pub mod error;
pub mod report;
pub mod types;

pub use config::{CommandSpec, HarnessConfig, TaskOptions};
pub use error::{Error, Result};
pub use report::Report;
pub use types::*;

/// jstd-phantom version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
