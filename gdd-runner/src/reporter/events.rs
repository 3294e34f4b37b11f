// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    results::{RunReport, RunStats, TestRecord, TestStatus},
    signal::ShutdownEvent,
};
use chrono::{DateTime, FixedOffset};
use std::time::Duration;

/// An event produced while a run is in progress.
///
/// Events are produced by a [`TestRunner`](crate::runner::TestRunner) and consumed by a reporter
/// such as [`TestReporter`](crate::reporter::TestReporter).
#[derive(Clone, Debug)]
pub struct ReporterEvent<'a> {
    /// The time at which the event was generated, including the offset from UTC.
    pub timestamp: DateTime<FixedOffset>,

    /// The amount of time elapsed since the start of the run.
    pub elapsed: Duration,

    /// The kind of event this is.
    pub kind: ReporterEventKind<'a>,
}

/// The kind of reporter event this is.
///
/// Forms part of [`ReporterEvent`].
#[derive(Clone, Debug)]
pub enum ReporterEventKind<'a> {
    /// The run started.
    RunStarted {
        /// What the run covers, for example `package ./store`.
        scope_description: &'a str,

        /// The shell-quoted command being run.
        command_line: &'a str,
    },

    /// A test started.
    TestStarted {
        /// The package the test belongs to.
        package: &'a str,

        /// The name of the test.
        name: &'a str,

        /// The number of tests currently running, including this one.
        running: usize,
    },

    /// A test finished.
    TestFinished {
        /// The finalized test.
        record: &'a TestRecord,

        /// The number of tests still running.
        running: usize,

        /// Counts of tests finished so far.
        current_stats: RunStats,
    },

    /// A package reported its result.
    PackageFinished {
        /// The package.
        package: &'a str,

        /// The status of the package.
        status: TestStatus,

        /// The duration reported by the package.
        duration: Option<Duration>,

        /// The number of tests in the package.
        test_count: usize,
    },

    /// Cancellation was requested by a signal.
    RunBeginCancel {
        /// The signal that was received.
        reason: ShutdownEvent,
    },

    /// A further signal arrived while the run was being cancelled, so `go test` is killed without
    /// waiting for the grace period.
    RunBeginKill {
        /// The signal that was received.
        reason: ShutdownEvent,
    },

    /// The run finished.
    RunFinished {
        /// The final report.
        report: &'a RunReport,
    },
}
