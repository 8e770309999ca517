//! Test-runner report parsing
//!
//! JsTestDriver ends a run with a summary such as
//! `Total 12 tests (Passed: 11; Fails: 1; Errors: 0) (25.00 ms)`.
//! Only the two counters and two markers are consumed here; the rest of the
//! report grammar is ignored.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A report containing this marker contributes nothing to the counters
pub const RUNTIME_EXCEPTION_MARKER: &str = "RuntimeException";

/// Presence of this marker anywhere flags the report as failing
pub const FAILURE_MARKER: &str = "Error:";

const PASSED_PATTERN: &str = r"(\d+);\sFails";
const FAILED_PATTERN: &str = r"(\d+);\sErrors";
const SUMMARY_PATTERN: &str = r";\sFails";

/// Parsed result of one run attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub passed: u64,
    pub failed: u64,
    pub has_error_marker: bool,
    /// Counters were missing or the run hit a runtime exception
    pub malformed: bool,
}

impl Report {
    /// Parse a report. Never fails: a malformed report counts as zero.
    pub fn parse(text: &str) -> Self {
        let has_error_marker = text.contains(FAILURE_MARKER);

        if text.contains(RUNTIME_EXCEPTION_MARKER) {
            return Self {
                has_error_marker,
                malformed: true,
                ..Default::default()
            };
        }

        match (
            capture_count(PASSED_PATTERN, text),
            capture_count(FAILED_PATTERN, text),
        ) {
            (Some(passed), Some(failed)) => Self {
                passed,
                failed,
                has_error_marker,
                malformed: false,
            },
            _ => Self {
                has_error_marker,
                malformed: true,
                ..Default::default()
            },
        }
    }

    /// Whether the task must be flagged as failing because of this report:
    /// the failure marker, a nonzero failed count, or both
    pub fn has_failed_tests(&self) -> bool {
        self.has_error_marker || self.failed > 0
    }

    /// Whether `text` carries a structured result at all.
    ///
    /// Output without a summary line and without a runtime exception means
    /// the runner died before reporting. A summary whose counters do not
    /// parse is still structured; it just counts as zero.
    pub fn is_structured(text: &str) -> bool {
        text.contains(RUNTIME_EXCEPTION_MARKER)
            || Regex::new(SUMMARY_PATTERN).map_or(false, |re| re.is_match(text))
    }
}

fn capture_count(pattern: &str, text: &str) -> Option<u64> {
    let re = Regex::new(pattern).ok()?;
    re.captures(text)?.get(1)?.as_str().parse().ok()
}
