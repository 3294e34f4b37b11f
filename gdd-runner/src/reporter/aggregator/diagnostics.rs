// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

/// The kind of anomaly encountered while aggregating a test stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum DiagnosticKind {
    /// A line could not be decoded as a test event.
    MalformedLine,

    /// An event without a package was skipped.
    MissingPackage,

    /// An event with an unrecognized action was ignored.
    UnknownAction,

    /// A test finished without a prior `run` event.
    ResultWithoutRun,

    /// A test started again while a previous run was still in flight.
    TestReentered,

    /// A test was still running when its package finished.
    IncompleteBeforePackage,

    /// A test was still running when the stream ended.
    IncompleteAtEnd,

    /// Output could not be attributed to a running or finished test.
    OrphanedOutput,

    /// A package never reported a terminal status.
    UnterminatedPackage,

    /// The exit status of the subprocess disagreed with the test results.
    ExitStatusMismatch,

    /// Compiler output was never claimed by a failed package.
    UnclaimedBuildOutput,
}

impl DiagnosticKind {
    fn is_warning(self) -> bool {
        matches!(
            self,
            Self::MalformedLine
                | Self::IncompleteBeforePackage
                | Self::IncompleteAtEnd
                | Self::ExitStatusMismatch
                | Self::UnclaimedBuildOutput
        )
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::MalformedLine => "malformed-line",
            Self::MissingPackage => "missing-package",
            Self::UnknownAction => "unknown-action",
            Self::ResultWithoutRun => "result-without-run",
            Self::TestReentered => "test-reentered",
            Self::IncompleteBeforePackage => "incomplete-before-package",
            Self::IncompleteAtEnd => "incomplete-at-end",
            Self::OrphanedOutput => "orphaned-output",
            Self::UnterminatedPackage => "unterminated-package",
            Self::ExitStatusMismatch => "exit-status-mismatch",
            Self::UnclaimedBuildOutput => "unclaimed-build-output",
        };
        f.write_str(s)
    }
}

/// A single recorded anomaly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Diagnostic {
    /// The kind of anomaly.
    pub kind: DiagnosticKind,

    /// A description of what happened.
    pub message: String,
}

/// Collects anomalies encountered during aggregation.
///
/// Every entry is also logged as it is recorded: protocol problems that affect results at warn
/// level, and the rest at debug level.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    /// Records an anomaly.
    pub fn record(&mut self, kind: DiagnosticKind, message: impl Into<String>) {
        let message = message.into();
        if kind.is_warning() {
            warn!(target: "gdd_runner::aggregator", "{kind}: {message}");
        } else {
            debug!(target: "gdd_runner::aggregator", "{kind}: {message}");
        }
        self.entries.push(Diagnostic { kind, message });
    }

    /// Returns all recorded entries, in the order they were recorded.
    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    /// Returns the number of entries of the given kind.
    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.entries.iter().filter(|d| d.kind == kind).count()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the number of recorded entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
