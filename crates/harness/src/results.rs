//! Result aggregation across configuration files

use jstd_common::{AttemptPhase, Report};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Terminal outcome of one configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOutcome {
    /// None for the server-only pipeline
    pub file: Option<PathBuf>,
    pub phase: AttemptPhase,
    pub attempts: u32,
    pub passed: u64,
    pub failed: u64,
    pub failing: bool,
    pub reason: Option<String>,
}

/// Running totals for a task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub passed: u64,
    pub failed: u64,
    pub has_failure: bool,
}

/// Tracks how many files are outstanding and what they reported.
///
/// Every file is counted down exactly once, on its first terminal outcome;
/// later deliveries for the same file are ignored.
#[derive(Debug)]
pub struct ResultAggregator {
    remaining: usize,
    totals: Totals,
    terminal: HashSet<usize>,
    outcomes: Vec<FileOutcome>,
}

impl ResultAggregator {
    pub fn new(files: usize) -> Self {
        Self {
            remaining: files,
            totals: Totals::default(),
            terminal: HashSet::new(),
            outcomes: Vec::new(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn totals(&self) -> Totals {
        self.totals
    }

    pub fn outcomes(&self) -> &[FileOutcome] {
        &self.outcomes
    }

    /// Flag the task as failing. Never cleared.
    pub fn mark_failed(&mut self) {
        self.totals.has_failure = true;
    }

    /// Add a report for `file_index`. Returns the files still outstanding,
    /// or None when this file already had its terminal outcome.
    pub fn record_report(
        &mut self,
        file_index: usize,
        file: Option<PathBuf>,
        attempts: u32,
        report: &Report,
    ) -> Option<usize> {
        if !self.terminal.insert(file_index) {
            return None;
        }

        self.totals.passed += report.passed;
        self.totals.failed += report.failed;
        if report.has_failed_tests() {
            self.mark_failed();
        }

        self.outcomes.push(FileOutcome {
            file,
            phase: AttemptPhase::Reported,
            attempts,
            passed: report.passed,
            failed: report.failed,
            failing: report.has_failed_tests(),
            reason: None,
        });

        Some(self.count_down())
    }

    /// Record a fatal outcome for `file_index`. Same contract as
    /// [`record_report`](Self::record_report).
    pub fn record_fatal(
        &mut self,
        file_index: usize,
        file: Option<PathBuf>,
        attempts: u32,
        reason: String,
    ) -> Option<usize> {
        if !self.terminal.insert(file_index) {
            return None;
        }

        self.mark_failed();
        self.outcomes.push(FileOutcome {
            file,
            phase: AttemptPhase::Fatal,
            attempts,
            passed: 0,
            failed: 0,
            failing: true,
            reason: Some(reason),
        });

        Some(self.count_down())
    }

    fn count_down(&mut self) -> usize {
        self.remaining = self.remaining.saturating_sub(1);
        self.remaining
    }
}
