// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The result model produced by a run: packages, tests and run-level metadata.

use crate::{reporter::Diagnostics, runner::ExitOutcome};
use chrono::{DateTime, FixedOffset};
use serde::{Serialize, Serializer};
use std::{fmt, time::Duration};

/// The status of a test or a package.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestStatus {
    /// Started but not finished.
    Running,
    /// Passed.
    Pass,
    /// Failed.
    Fail,
    /// Skipped.
    Skip,
    /// Never reported a terminal status.
    Unknown,
}

impl TestStatus {
    /// Whether this status is final.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Whether this status represents a failure.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Fail)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Pass => write!(f, "pass"),
            Self::Fail => write!(f, "fail"),
            Self::Skip => write!(f, "skip"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// The result of a single test function.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestRecord {
    /// The package the test belongs to.
    pub package: String,

    /// The test name, including any subtest path.
    pub name: String,

    /// The status of the test.
    pub status: TestStatus,

    /// Output lines, in the order they were produced.
    pub output: Vec<String>,

    /// How long the test took, as reported by `go test`.
    #[serde(rename = "duration-secs", serialize_with = "serialize_secs")]
    pub duration: Duration,
}

impl TestRecord {
    pub(crate) fn new(package: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            name: name.into(),
            status: TestStatus::Running,
            output: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    /// Whether this test failed.
    pub fn is_failure(&self) -> bool {
        self.status.is_failure()
    }
}

/// The results for one package.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PackageResult {
    /// The package import path.
    pub package: String,

    /// The overall status of the package.
    pub status: TestStatus,

    /// Output lines that couldn't be attributed to a test.
    pub summary: Vec<String>,

    /// The tests in this package, sorted by name.
    pub tests: Vec<TestRecord>,

    /// The duration reported by the package's own terminal event, if any.
    #[serde(rename = "duration-secs", serialize_with = "serialize_opt_secs")]
    pub duration: Option<Duration>,
}

impl PackageResult {
    pub(crate) fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            status: TestStatus::Running,
            summary: Vec::new(),
            tests: Vec::new(),
            duration: None,
        }
    }

    /// Whether the package or any of its tests failed.
    pub fn has_failures(&self) -> bool {
        self.status.is_failure() || self.tests.iter().any(|test| test.is_failure())
    }
}

/// Test counts over a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunStats {
    /// The total number of test records.
    pub total: usize,
    /// Tests that passed.
    pub passed: usize,
    /// Tests that failed.
    pub failed: usize,
    /// Tests that were skipped.
    pub skipped: usize,
    /// Tests with any other status.
    pub unknown: usize,
}

impl RunStats {
    /// Computes counts over the given packages.
    pub fn from_packages(packages: &[PackageResult]) -> Self {
        let mut stats = Self::default();
        for test in packages.iter().flat_map(|package| &package.tests) {
            stats.record(test);
        }
        stats
    }

    pub(crate) fn record(&mut self, test: &TestRecord) {
        self.total += 1;
        match test.status {
            TestStatus::Pass => self.passed += 1,
            TestStatus::Fail => self.failed += 1,
            TestStatus::Skip => self.skipped += 1,
            TestStatus::Running | TestStatus::Unknown => self.unknown += 1,
        }
    }
}

/// The complete, final result of a run.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunReport {
    /// What the run covered, for example `package ./store`.
    pub scope_description: String,

    /// The shell-quoted command that was run.
    pub command_line: String,

    /// When the run started.
    pub start_time: DateTime<FixedOffset>,

    /// Wall-clock duration of the run.
    #[serde(rename = "wall-clock-secs", serialize_with = "serialize_secs")]
    pub wall_clock: Duration,

    /// How the subprocess exited.
    pub outcome: ExitOutcome,

    /// Whether the run was cancelled.
    pub cancelled: bool,

    /// Per-package results, in first-seen order.
    pub packages: Vec<PackageResult>,

    /// Anomalies encountered while aggregating.
    pub diagnostics: Diagnostics,
}

impl RunReport {
    /// Sum of the durations reported by packages.
    pub fn cumulative_package_duration(&self) -> Duration {
        self.packages
            .iter()
            .filter_map(|package| package.duration)
            .sum()
    }

    /// Test counts over the run.
    pub fn stats(&self) -> RunStats {
        RunStats::from_packages(&self.packages)
    }

    /// The overall status of the run.
    ///
    /// Any failure fails the run. Otherwise a package that never finished makes the status
    /// unknown, a skipped package (or no packages at all) makes it a skip, and everything else
    /// passes.
    pub fn overall_status(&self) -> TestStatus {
        if self.packages.iter().any(|package| package.has_failures()) {
            TestStatus::Fail
        } else if self
            .packages
            .iter()
            .any(|package| !matches!(package.status, TestStatus::Pass | TestStatus::Skip))
        {
            TestStatus::Unknown
        } else if self.packages.is_empty()
            || self
                .packages
                .iter()
                .any(|package| package.status == TestStatus::Skip)
        {
            TestStatus::Skip
        } else {
            TestStatus::Pass
        }
    }

    /// Whether the run should be considered successful.
    pub fn is_success(&self) -> bool {
        matches!(self.overall_status(), TestStatus::Pass | TestStatus::Skip)
    }
}

fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

fn serialize_opt_secs<S: Serializer>(
    duration: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match duration {
        Some(duration) => serializer.serialize_some(&duration.as_secs_f64()),
        None => serializer.serialize_none(),
    }
}
