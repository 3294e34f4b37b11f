// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    diagnostics::{DiagnosticKind, Diagnostics},
    markers::classify_package,
};
use crate::{
    decoder::{Action, TestEvent},
    errors::DecodeError,
    results::{PackageResult, TestRecord, TestStatus},
    runner::ExitOutcome,
};
use indexmap::IndexMap;
use std::{mem, time::Duration};
use tracing::debug;

/// The package that collects output which can't be attributed to any known package.
pub const UNASSOCIATED_PACKAGE: &str = "(unassociated output)";

/// The package synthesized when the subprocess failed in a way the test events don't explain.
pub const EXECUTION_ERROR_PACKAGE: &str = "(test execution error)";

/// The placeholder test inside [`EXECUTION_ERROR_PACKAGE`].
pub const EXECUTION_ERROR_TEST: &str = "(overall execution)";

/// The package synthesized when a successful run produced no test events.
pub const NO_RESULTS_PACKAGE: &str = "(no test results)";

const INCOMPLETE_BEFORE_PACKAGE_LINE: &str =
    "test did not report completion before package finished";
const INCOMPLETE_AT_END_LINE: &str =
    "test did not complete (the process may have crashed, timed out, or been terminated)";

/// A change in aggregated state, for consumers that report progress while the run is ongoing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AggregateEvent {
    /// A test started.
    TestStarted {
        /// The package the test belongs to.
        package: String,

        /// The name of the test.
        name: String,
    },

    /// A test reached a terminal status.
    TestFinished {
        /// The finalized record.
        record: TestRecord,
    },

    /// A package reported a terminal status.
    PackageFinished {
        /// The package.
        package: String,

        /// The status of the package, taking contained tests into account.
        status: TestStatus,

        /// The duration reported by the package.
        duration: Option<Duration>,

        /// The number of tests finished in the package so far.
        test_count: usize,
    },
}

/// The output of [`ResultAggregator::finish`].
#[derive(Clone, Debug)]
pub struct AggregateResults {
    /// Per-package results, in first-seen order. Never empty.
    pub packages: Vec<PackageResult>,

    /// Anomalies encountered during aggregation.
    pub diagnostics: Diagnostics,

    /// The number of events that were decoded.
    pub events_seen: usize,
}

#[derive(Debug)]
struct PackageState {
    result: PackageResult,
    terminal: bool,
    failed: bool,
}

impl PackageState {
    fn new(package: &str) -> Self {
        Self {
            result: PackageResult::new(package),
            terminal: false,
            failed: false,
        }
    }

    fn push_test(&mut self, record: TestRecord) {
        if record.is_failure() {
            self.failed = true;
        }
        self.result.tests.push(record);
    }
}

type TestKey = (String, String);

/// Reduces a stream of `go test -json` events into per-package results.
///
/// The aggregator processes one event at a time and tolerates out-of-order, duplicated, missing
/// and malformed events. Call [`Self::finish`] once the stream ends to obtain the final results.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    packages: IndexMap<String, PackageState>,
    // Keyed by (package, test), in start order so that sweeps are deterministic.
    running: IndexMap<TestKey, TestRecord>,
    // Compiler output keyed by import path, for Go 1.24+ builds.
    build_output: IndexMap<String, Vec<String>>,
    last_package: Option<String>,
    events_seen: usize,
    raw_lines: Vec<String>,
    diagnostics: Diagnostics,
}

impl ResultAggregator {
    /// Creates a new, empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of tests currently running.
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Processes a single event, returning the resulting state changes.
    pub fn handle_event(&mut self, event: TestEvent) -> Vec<AggregateEvent> {
        self.events_seen += 1;

        match &event.action {
            Action::BuildOutput => {
                self.handle_build_output(&event);
                return Vec::new();
            }
            Action::BuildFail => {
                debug!(
                    "build failed for {}",
                    event.import_path.as_deref().unwrap_or_default()
                );
                return Vec::new();
            }
            _ => {}
        }

        if event.package.is_empty() {
            if event.action == Action::Output && event.test_name().is_none() {
                let line = event.trimmed_output();
                self.diagnostics.record(
                    DiagnosticKind::OrphanedOutput,
                    format!("output without a package: {line}"),
                );
                package_state(&mut self.packages, UNASSOCIATED_PACKAGE)
                    .result
                    .summary
                    .push(line.to_owned());
            } else {
                self.diagnostics.record(
                    DiagnosticKind::MissingPackage,
                    format!(
                        "skipping {} event without a package (test: {})",
                        event.action,
                        event.test_name().unwrap_or("<none>"),
                    ),
                );
            }
            return Vec::new();
        }

        if self.last_package.as_deref() != Some(event.package.as_str()) {
            self.last_package = Some(event.package.clone());
        }
        package_state(&mut self.packages, &event.package);

        match event.test_name() {
            Some(name) => self.handle_test_event(&event, name),
            None => self.handle_package_event(&event),
        }
    }

    /// Records a line that couldn't be decoded, attaching it to the most recently referenced
    /// package.
    pub fn handle_decode_error(&mut self, error: &DecodeError) {
        self.diagnostics.record(
            DiagnosticKind::MalformedLine,
            format!("line {}: {}", error.line_number(), error.line()),
        );
        self.raw_lines.push(error.line().to_owned());

        let package = self.last_package.as_deref().unwrap_or(UNASSOCIATED_PACKAGE);
        package_state(&mut self.packages, package)
            .result
            .summary
            .push(format!(
                "[malformed line {}]: {}",
                error.line_number(),
                error.line()
            ));
    }

    /// Finalizes every test that is still running as failed.
    ///
    /// This is called by [`Self::finish`], but can be called earlier by consumers that want to
    /// report the finalized tests as they are swept.
    pub fn sweep_incomplete(&mut self) -> Vec<AggregateEvent> {
        let mut events = Vec::new();
        for ((package, name), mut record) in self.running.drain(..) {
            record.status = TestStatus::Fail;
            record.output.push(INCOMPLETE_AT_END_LINE.to_owned());
            self.diagnostics.record(
                DiagnosticKind::IncompleteAtEnd,
                format!("test {name} in package {package} was still running when the stream ended"),
            );
            package_state(&mut self.packages, &package).push_test(record.clone());
            events.push(AggregateEvent::TestFinished { record });
        }
        events
    }

    /// Consumes the aggregator, producing the final results.
    ///
    /// The results are reconciled against the exit outcome of the subprocess, so that the list of
    /// packages is never empty and a failed run is never reported as passing.
    pub fn finish(
        mut self,
        outcome: &ExitOutcome,
        cancelled: bool,
        stderr_tail: &[String],
    ) -> AggregateResults {
        self.sweep_incomplete();
        let unclaimed_build_output = self.release_build_output();

        let Self {
            packages: states,
            events_seen,
            raw_lines,
            mut diagnostics,
            ..
        } = self;

        let mut packages = Vec::with_capacity(states.len());
        for (name, state) in states {
            let PackageState {
                mut result,
                terminal,
                failed,
            } = state;

            if failed {
                result.status = TestStatus::Fail;
            } else if !terminal {
                if name == UNASSOCIATED_PACKAGE {
                    result.status = TestStatus::Skip;
                } else {
                    diagnostics.record(
                        DiagnosticKind::UnterminatedPackage,
                        format!("package {name} never reported a result"),
                    );
                    result.status = TestStatus::Unknown;
                }
            }

            // Stable, so that repeated runs of the same test keep their relative order.
            result.tests.sort_by(|a, b| a.name.cmp(&b.name));
            packages.push(result);
        }

        let execution_error = ExecutionError {
            outcome,
            cancelled,
            stderr_tail,
            build_output: &unclaimed_build_output,
            raw_lines: &raw_lines,
        };

        if packages.is_empty() {
            if outcome.is_success() {
                let first_line = if events_seen == 0 {
                    "`go test` completed without producing any test events"
                } else {
                    "`go test` completed without reporting results for any package"
                };
                let mut summary = vec![first_line.to_owned()];
                summary.extend(unclaimed_build_output.iter().cloned());
                summary.extend(raw_lines.iter().cloned());
                packages.push(PackageResult {
                    status: TestStatus::Skip,
                    summary,
                    ..PackageResult::new(NO_RESULTS_PACKAGE)
                });
            } else {
                packages.push(
                    execution_error.to_package("execution failed to produce any test results"),
                );
            }
        } else if !outcome.is_success() && !packages.iter().any(|p| p.has_failures()) {
            diagnostics.record(
                DiagnosticKind::ExitStatusMismatch,
                format!(
                    "`go test` {}, but no test failed",
                    outcome.description()
                ),
            );
            packages.push(
                execution_error.to_package("`go test` exited unsuccessfully, but no test failed"),
            );
        } else if !unclaimed_build_output.is_empty() {
            match packages.iter_mut().find(|p| p.package == UNASSOCIATED_PACKAGE) {
                Some(package) => package.summary.extend(unclaimed_build_output),
                None => packages.push(PackageResult {
                    status: TestStatus::Skip,
                    summary: unclaimed_build_output,
                    ..PackageResult::new(UNASSOCIATED_PACKAGE)
                }),
            }
        }

        AggregateResults {
            packages,
            diagnostics,
            events_seen,
        }
    }

    /// Moves compiler output that no failed package claimed into the summary of the package it was
    /// built for. Output for import paths that match no package is returned.
    fn release_build_output(&mut self) -> Vec<String> {
        let mut unclaimed = Vec::new();
        for (import_path, mut lines) in mem::take(&mut self.build_output) {
            let base = base_import_path(&import_path);
            match self.packages.get_mut(base) {
                Some(state) => {
                    self.diagnostics.record(
                        DiagnosticKind::UnclaimedBuildOutput,
                        format!("build output for {import_path} moved to package {base}"),
                    );
                    lines.append(&mut state.result.summary);
                    state.result.summary = lines;
                }
                None => {
                    self.diagnostics.record(
                        DiagnosticKind::UnclaimedBuildOutput,
                        format!("build output for {import_path} matches no package"),
                    );
                    unclaimed.append(&mut lines);
                }
            }
        }
        unclaimed
    }

    fn handle_build_output(&mut self, event: &TestEvent) {
        match event.import_path.as_deref().filter(|path| !path.is_empty()) {
            Some(import_path) => {
                self.build_output
                    .entry(import_path.to_owned())
                    .or_default()
                    .push(event.trimmed_output().to_owned());
            }
            None => {
                self.diagnostics.record(
                    DiagnosticKind::MissingPackage,
                    format!(
                        "build output without an import path: {}",
                        event.trimmed_output()
                    ),
                );
            }
        }
    }

    fn handle_test_event(&mut self, event: &TestEvent, name: &str) -> Vec<AggregateEvent> {
        let package = event.package.as_str();
        let key = (package.to_owned(), name.to_owned());

        if let Some(status) = terminal_status(&event.action) {
            let record = self.finish_test(key, status, event.elapsed());
            return vec![AggregateEvent::TestFinished { record }];
        }

        match &event.action {
            Action::Run => {
                if self.running.shift_remove(&key).is_some() {
                    self.diagnostics.record(
                        DiagnosticKind::TestReentered,
                        format!("test {name} in package {package} started again before finishing"),
                    );
                }
                self.running.insert(key, TestRecord::new(package, name));
                vec![AggregateEvent::TestStarted {
                    package: package.to_owned(),
                    name: name.to_owned(),
                }]
            }
            Action::Output => {
                self.handle_test_output(&key, event.trimmed_output());
                Vec::new()
            }
            Action::Other(other) => {
                self.diagnostics.record(
                    DiagnosticKind::UnknownAction,
                    format!("ignoring action `{other}` for test {name} in package {package}"),
                );
                Vec::new()
            }
            action => {
                debug!("ignoring {action} event for test {name} in package {package}");
                Vec::new()
            }
        }
    }

    fn handle_test_output(&mut self, key: &TestKey, text: &str) {
        if let Some(record) = self.running.get_mut(key) {
            record.output.push(text.to_owned());
            return;
        }

        let (package, name) = key;
        let state = package_state(&mut self.packages, package);
        // Output after a test finished (for example from a goroutine that outlived it) goes to the
        // most recently completed run of that test.
        if let Some(record) = state.result.tests.iter_mut().rev().find(|t| &t.name == name) {
            debug!("late output for finished test {name} in package {package}");
            record.output.push(text.to_owned());
        } else {
            self.diagnostics.record(
                DiagnosticKind::OrphanedOutput,
                format!("output for unknown test {name} in package {package}"),
            );
            state.result.summary.push(format!("[{name}] {text}"));
        }
    }

    fn finish_test(
        &mut self,
        key: TestKey,
        status: TestStatus,
        elapsed: Option<Duration>,
    ) -> TestRecord {
        let state = package_state(&mut self.packages, &key.0);
        let mut record = match self.running.shift_remove(&key) {
            Some(record) => record,
            None => {
                let (package, name) = &key;
                self.diagnostics.record(
                    DiagnosticKind::ResultWithoutRun,
                    format!("test {name} in package {package} reported {status} without a run event"),
                );
                let mut record = TestRecord::new(package, name);
                record.output = reclaim_tagged_lines(&mut state.result.summary, name);
                record
            }
        };

        record.status = status;
        record.duration = elapsed.unwrap_or_default();
        state.push_test(record.clone());
        record
    }

    fn handle_package_event(&mut self, event: &TestEvent) -> Vec<AggregateEvent> {
        let package = event.package.as_str();

        if let Some(status) = terminal_status(&event.action) {
            return self.finish_package(event, status);
        }

        match &event.action {
            Action::Start | Action::Run => {
                let state = package_state(&mut self.packages, package);
                if state.terminal {
                    debug!("ignoring {} event for finished package {package}", event.action);
                } else if state.failed {
                    state.result.status = TestStatus::Fail;
                } else {
                    state.result.status = TestStatus::Running;
                }
            }
            Action::Output => {
                package_state(&mut self.packages, package)
                    .result
                    .summary
                    .push(event.trimmed_output().to_owned());
            }
            Action::Other(other) => {
                self.diagnostics.record(
                    DiagnosticKind::UnknownAction,
                    format!("ignoring action `{other}` for package {package}"),
                );
            }
            action => {
                debug!("ignoring {action} event for package {package}");
            }
        }
        Vec::new()
    }

    fn finish_package(&mut self, event: &TestEvent, status: TestStatus) -> Vec<AggregateEvent> {
        let package = event.package.as_str();
        let mut events = Vec::new();
        let state = package_state(&mut self.packages, package);

        let incomplete: Vec<TestKey> = self
            .running
            .keys()
            .filter(|(p, _)| p == package)
            .cloned()
            .collect();
        for key in incomplete {
            if let Some(mut record) = self.running.shift_remove(&key) {
                record.status = TestStatus::Fail;
                record.output.push(INCOMPLETE_BEFORE_PACKAGE_LINE.to_owned());
                self.diagnostics.record(
                    DiagnosticKind::IncompleteBeforePackage,
                    format!(
                        "test {} was still running when package {package} finished",
                        record.name
                    ),
                );
                state.push_test(record.clone());
                events.push(AggregateEvent::TestFinished { record });
            }
        }

        if status == TestStatus::Fail {
            state.failed = true;
            if let Some(failed_build) = event.failed_build.as_deref() {
                let mut summary = take_build_output(&mut self.build_output, failed_build);
                summary.append(&mut state.result.summary);
                state.result.summary = summary;
            }
        }

        let status = if state.failed {
            TestStatus::Fail
        } else {
            status
        };
        state.result.status = status;
        state.result.duration = event.elapsed();
        state.terminal = true;

        if state.result.tests.is_empty() && !state.result.summary.is_empty() {
            if let Some(classification) = classify_package(&state.result.summary, status) {
                debug!("package {package} classified as {classification:?}");
                let record = TestRecord {
                    status: classification.placeholder_status(),
                    output: mem::take(&mut state.result.summary),
                    duration: state.result.duration.unwrap_or_default(),
                    ..TestRecord::new(package, classification.placeholder_name())
                };
                state.push_test(record.clone());
                events.push(AggregateEvent::TestFinished { record });
            }
        }

        events.push(AggregateEvent::PackageFinished {
            package: package.to_owned(),
            status,
            duration: state.result.duration,
            test_count: state.result.tests.len(),
        });
        events
    }
}

fn terminal_status(action: &Action) -> Option<TestStatus> {
    match action {
        Action::Pass => Some(TestStatus::Pass),
        Action::Fail => Some(TestStatus::Fail),
        Action::Skip => Some(TestStatus::Skip),
        _ => None,
    }
}

fn package_state<'a>(
    packages: &'a mut IndexMap<String, PackageState>,
    package: &str,
) -> &'a mut PackageState {
    let index = match packages.get_index_of(package) {
        Some(index) => index,
        None => {
            packages
                .insert_full(package.to_owned(), PackageState::new(package))
                .0
        }
    };
    &mut packages[index]
}

/// Removes `[name] `-tagged lines from the summary, returning them without the tag.
fn reclaim_tagged_lines(summary: &mut Vec<String>, name: &str) -> Vec<String> {
    let tag = format!("[{name}] ");
    let (reclaimed, kept): (Vec<_>, Vec<_>) = mem::take(summary)
        .into_iter()
        .partition(|line| line.starts_with(&tag));
    *summary = kept;
    reclaimed
        .into_iter()
        .map(|line| line[tag.len()..].to_owned())
        .collect()
}

/// Takes buffered compiler output for a failed build.
///
/// Import paths for test builds look like `example.com/a [example.com/a.test]`; if there's no
/// exact match, every buffer for the same base path is taken.
fn take_build_output(
    build_output: &mut IndexMap<String, Vec<String>>,
    failed_build: &str,
) -> Vec<String> {
    if let Some(lines) = build_output.shift_remove(failed_build) {
        return lines;
    }

    let base = base_import_path(failed_build);
    let mut lines = Vec::new();
    build_output.retain(|import_path, buffered| {
        if base_import_path(import_path) == base {
            lines.append(buffered);
            false
        } else {
            true
        }
    });
    lines
}

fn base_import_path(import_path: &str) -> &str {
    import_path
        .split_once(" [")
        .map_or(import_path, |(base, _)| base)
}

struct ExecutionError<'a> {
    outcome: &'a ExitOutcome,
    cancelled: bool,
    stderr_tail: &'a [String],
    build_output: &'a [String],
    raw_lines: &'a [String],
}

impl ExecutionError<'_> {
    fn to_package(&self, summary: &str) -> PackageResult {
        let mut output = vec![format!("`go test` {}", self.outcome.description())];
        if self.cancelled {
            output.push("the run was cancelled".to_owned());
        }
        for (header, lines) in [
            ("build output:", self.build_output),
            ("stderr:", self.stderr_tail),
            ("stdout:", self.raw_lines),
        ] {
            if !lines.is_empty() {
                output.push(header.to_owned());
                output.extend(lines.iter().cloned());
            }
        }

        PackageResult {
            status: TestStatus::Fail,
            summary: vec![summary.to_owned()],
            tests: vec![TestRecord {
                status: TestStatus::Fail,
                output,
                ..TestRecord::new(EXECUTION_ERROR_PACKAGE, EXECUTION_ERROR_TEST)
            }],
            ..PackageResult::new(EXECUTION_ERROR_PACKAGE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::EventDecoder;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use proptest::{collection::vec, prelude::*};
    use test_strategy::proptest;

    fn non_zero_exit() -> ExitOutcome {
        ExitOutcome::NonZeroExit {
            code: Some(1),
            description: "exited with code 1".to_owned(),
        }
    }

    fn feed(aggregator: &mut ResultAggregator, input: &str) -> Vec<AggregateEvent> {
        let mut decoder = EventDecoder::new();
        let mut events = Vec::new();
        for line in input.lines() {
            match decoder.decode(line) {
                Ok(Some(event)) => events.extend(aggregator.handle_event(event)),
                Ok(None) => {}
                Err(error) => aggregator.handle_decode_error(&error),
            }
        }
        events
    }

    fn aggregate(input: &str, outcome: &ExitOutcome) -> AggregateResults {
        let mut aggregator = ResultAggregator::new();
        feed(&mut aggregator, input);
        aggregator.finish(outcome, false, &[])
    }

    fn find<'a>(results: &'a AggregateResults, package: &str) -> &'a PackageResult {
        results
            .packages
            .iter()
            .find(|p| p.package == package)
            .unwrap_or_else(|| panic!("package {package} not found"))
    }

    const PASSING_RUN: &str = indoc! {r#"
        {"Action":"start","Package":"pkgA"}
        {"Action":"run","Package":"pkgA","Test":"TestX"}
        {"Action":"output","Package":"pkgA","Test":"TestX","Output":"ok\n"}
        {"Action":"pass","Package":"pkgA","Test":"TestX","Elapsed":0.01}
        {"Action":"pass","Package":"pkgA","Elapsed":0.02}
    "#};

    #[test]
    fn passing_test_and_package() {
        let results = aggregate(PASSING_RUN, &ExitOutcome::Success);
        assert_eq!(results.packages.len(), 1);
        let package = &results.packages[0];
        assert_eq!(package.package, "pkgA");
        assert_eq!(package.status, TestStatus::Pass);
        assert_eq!(package.duration, Some(Duration::from_millis(20)));
        assert_eq!(package.tests.len(), 1);
        assert_eq!(package.tests[0].name, "TestX");
        assert_eq!(package.tests[0].status, TestStatus::Pass);
        assert_eq!(package.tests[0].output, vec!["ok".to_owned()]);
        assert_eq!(package.tests[0].duration, Duration::from_millis(10));
        assert!(results.diagnostics.is_empty());
    }

    #[test]
    fn stream_ends_mid_test() {
        let input = indoc! {r#"
            {"Action":"run","Package":"pkgA","Test":"TestX"}
        "#};
        let results = aggregate(input, &non_zero_exit());

        assert_eq!(results.packages.len(), 1);
        let package = &results.packages[0];
        assert_eq!(package.status, TestStatus::Fail);
        assert_eq!(package.tests.len(), 1);
        assert_eq!(package.tests[0].status, TestStatus::Fail);
        assert_eq!(package.tests[0].output, vec![INCOMPLETE_AT_END_LINE.to_owned()]);
        assert_eq!(results.diagnostics.count(DiagnosticKind::IncompleteAtEnd), 1);
    }

    #[test]
    fn build_failure_placeholder() {
        let input = indoc! {r##"
            {"Action":"run","Package":"pkgB"}
            {"Action":"output","Package":"pkgB","Output":"# build failed\n"}
            {"Action":"fail","Package":"pkgB","Elapsed":0}
        "##};
        let results = aggregate(input, &non_zero_exit());

        let package = find(&results, "pkgB");
        assert_eq!(package.status, TestStatus::Fail);
        assert!(package.summary.is_empty());
        assert_eq!(package.tests.len(), 1);
        assert_eq!(package.tests[0].name, "(package: build failed)");
        assert_eq!(package.tests[0].status, TestStatus::Fail);
        assert_eq!(package.tests[0].output, vec!["# build failed".to_owned()]);
        // The package failed, so the exit status is explained.
        assert_eq!(results.packages.len(), 1);
    }

    #[test]
    fn non_zero_exit_without_output() {
        let outcome = ExitOutcome::NonZeroExit {
            code: Some(2),
            description: "exited with code 2".to_owned(),
        };
        let mut aggregator = ResultAggregator::new();
        let results = aggregator_finish(
            &mut aggregator,
            &outcome,
            &["go: cannot find main module".to_owned()],
        );

        assert_eq!(results.packages.len(), 1);
        let package = &results.packages[0];
        assert_eq!(package.package, EXECUTION_ERROR_PACKAGE);
        assert_eq!(package.status, TestStatus::Fail);
        assert_eq!(package.tests.len(), 1);
        let test = &package.tests[0];
        assert_eq!(test.name, EXECUTION_ERROR_TEST);
        assert_eq!(test.status, TestStatus::Fail);
        assert_eq!(
            test.output,
            vec![
                "`go test` exited with code 2".to_owned(),
                "stderr:".to_owned(),
                "go: cannot find main module".to_owned(),
            ]
        );
    }

    fn aggregator_finish(
        aggregator: &mut ResultAggregator,
        outcome: &ExitOutcome,
        stderr_tail: &[String],
    ) -> AggregateResults {
        mem::take(aggregator).finish(outcome, false, stderr_tail)
    }

    #[test]
    fn successful_run_without_events() {
        let results = aggregate("", &ExitOutcome::Success);
        assert_eq!(results.packages.len(), 1);
        assert_eq!(results.packages[0].package, NO_RESULTS_PACKAGE);
        assert_eq!(results.packages[0].status, TestStatus::Skip);
        assert!(results.packages[0].tests.is_empty());
    }

    #[test]
    fn raw_stdout_is_kept_for_execution_errors() {
        let input = "FAIL\t./... [setup failed]\n";
        let results = aggregate(input, &non_zero_exit());
        assert_eq!(results.packages.len(), 1);
        let output = &results.packages[0].tests[0].output;
        assert_eq!(
            output[1..],
            ["stdout:".to_owned(), "FAIL\t./... [setup failed]".to_owned()]
        );
    }

    #[test]
    fn non_zero_exit_without_failures() {
        let results = aggregate(PASSING_RUN, &non_zero_exit());
        assert_eq!(results.packages.len(), 2);
        assert_eq!(results.packages[0].status, TestStatus::Pass);
        assert_eq!(results.packages[1].package, EXECUTION_ERROR_PACKAGE);
        assert_eq!(results.packages[1].status, TestStatus::Fail);
        assert_eq!(
            results.diagnostics.count(DiagnosticKind::ExitStatusMismatch),
            1
        );
    }

    #[test]
    fn no_test_files_placeholder() {
        let input = indoc! {r#"
            {"Action":"start","Package":"example.com/cmd"}
            {"Action":"output","Package":"example.com/cmd","Output":"?   \texample.com/cmd\t[no test files]\n"}
            {"Action":"skip","Package":"example.com/cmd","Elapsed":0}
        "#};
        let results = aggregate(input, &ExitOutcome::Success);
        let package = find(&results, "example.com/cmd");
        assert_eq!(package.status, TestStatus::Skip);
        assert!(package.summary.is_empty());
        assert_eq!(package.tests.len(), 1);
        assert_eq!(package.tests[0].name, "(package: no test files)");
        assert_eq!(package.tests[0].status, TestStatus::Skip);
    }

    #[test]
    fn failing_test_fails_passing_package() {
        let input = indoc! {r#"
            {"Action":"run","Package":"pkgA","Test":"TestB"}
            {"Action":"fail","Package":"pkgA","Test":"TestB","Elapsed":0.5}
            {"Action":"pass","Package":"pkgA","Elapsed":0.6}
            {"Action":"run","Package":"pkgA"}
        "#};
        let results = aggregate(input, &non_zero_exit());
        assert_eq!(results.packages.len(), 1);
        assert_eq!(results.packages[0].status, TestStatus::Fail);
    }

    #[test]
    fn package_finish_sweeps_running_tests() {
        let input = indoc! {r#"
            {"Action":"run","Package":"pkgA","Test":"TestSlow"}
            {"Action":"run","Package":"pkgB","Test":"TestOther"}
            {"Action":"pass","Package":"pkgA","Elapsed":1}
            {"Action":"pass","Package":"pkgB","Test":"TestOther","Elapsed":0}
            {"Action":"pass","Package":"pkgB","Elapsed":0}
        "#};
        let mut aggregator = ResultAggregator::new();
        let events = feed(&mut aggregator, input);
        assert!(events.contains(&AggregateEvent::PackageFinished {
            package: "pkgA".to_owned(),
            status: TestStatus::Fail,
            duration: Some(Duration::from_secs(1)),
            test_count: 1,
        }));
        let results = aggregator.finish(&non_zero_exit(), false, &[]);

        let pkg_a = find(&results, "pkgA");
        assert_eq!(pkg_a.status, TestStatus::Fail);
        assert_eq!(
            pkg_a.tests[0].output,
            vec![INCOMPLETE_BEFORE_PACKAGE_LINE.to_owned()]
        );
        assert_eq!(find(&results, "pkgB").status, TestStatus::Pass);
        assert_eq!(
            results
                .diagnostics
                .count(DiagnosticKind::IncompleteBeforePackage),
            1
        );
    }

    #[test]
    fn late_output_goes_to_most_recent_run() {
        let input = indoc! {r#"
            {"Action":"run","Package":"pkgA","Test":"TestX"}
            {"Action":"pass","Package":"pkgA","Test":"TestX","Elapsed":0}
            {"Action":"run","Package":"pkgA","Test":"TestX"}
            {"Action":"fail","Package":"pkgA","Test":"TestX","Elapsed":0}
            {"Action":"output","Package":"pkgA","Test":"TestX","Output":"late\n"}
            {"Action":"fail","Package":"pkgA","Elapsed":0}
        "#};
        let results = aggregate(input, &non_zero_exit());
        let tests = &find(&results, "pkgA").tests;
        assert_eq!(tests.len(), 2);
        // Sorting is stable, so the runs keep their completion order.
        assert_eq!(tests[0].status, TestStatus::Pass);
        assert!(tests[0].output.is_empty());
        assert_eq!(tests[1].status, TestStatus::Fail);
        assert_eq!(tests[1].output, vec!["late".to_owned()]);
    }

    #[test]
    fn result_without_run_reclaims_tagged_output() {
        let input = indoc! {r#"
            {"Action":"output","Package":"pkgA","Test":"TestGhost","Output":"first\n"}
            {"Action":"output","Package":"pkgA","Output":"package line\n"}
            {"Action":"output","Package":"pkgA","Test":"TestGhost","Output":"second\n"}
            {"Action":"skip","Package":"pkgA","Test":"TestGhost","Elapsed":0}
            {"Action":"pass","Package":"pkgA","Elapsed":0}
        "#};
        let results = aggregate(input, &ExitOutcome::Success);
        let package = find(&results, "pkgA");
        assert_eq!(package.summary, vec!["package line".to_owned()]);
        assert_eq!(package.tests[0].status, TestStatus::Skip);
        assert_eq!(
            package.tests[0].output,
            vec!["first".to_owned(), "second".to_owned()]
        );
        assert_eq!(
            results.diagnostics.count(DiagnosticKind::OrphanedOutput),
            2
        );
        assert_eq!(
            results.diagnostics.count(DiagnosticKind::ResultWithoutRun),
            1
        );
    }

    #[test]
    fn reentered_test_replaces_in_flight_record() {
        let input = indoc! {r#"
            {"Action":"run","Package":"pkgA","Test":"TestX"}
            {"Action":"output","Package":"pkgA","Test":"TestX","Output":"attempt 1\n"}
            {"Action":"run","Package":"pkgA","Test":"TestX"}
            {"Action":"output","Package":"pkgA","Test":"TestX","Output":"attempt 2\n"}
            {"Action":"pass","Package":"pkgA","Test":"TestX","Elapsed":0}
            {"Action":"pass","Package":"pkgA","Elapsed":0}
        "#};
        let results = aggregate(input, &ExitOutcome::Success);
        let package = find(&results, "pkgA");
        assert_eq!(package.tests.len(), 1);
        assert_eq!(package.tests[0].output, vec!["attempt 2".to_owned()]);
        assert_eq!(results.diagnostics.count(DiagnosticKind::TestReentered), 1);
    }

    #[test]
    fn malformed_lines_attach_to_last_package() {
        let input = indoc! {r#"
            not json at all
            {"Action":"run","Package":"pkgA","Test":"TestX"}
            {"Action":"pass","Package":"pkgA","Test":"TestX","Elapsed":0}
            {"Action":"pass","Package":"pkgA","Elapsed":0}
            FAIL	trailing garbage
        "#};
        let results = aggregate(input, &ExitOutcome::Success);
        assert_eq!(results.packages.len(), 2);
        assert_eq!(results.packages[0].package, UNASSOCIATED_PACKAGE);
        assert_eq!(results.packages[0].status, TestStatus::Skip);
        assert_eq!(
            results.packages[0].summary,
            vec!["[malformed line 1]: not json at all".to_owned()]
        );
        assert_eq!(
            results.packages[1].summary,
            vec!["[malformed line 5]: FAIL\ttrailing garbage".to_owned()]
        );
        assert_eq!(results.diagnostics.count(DiagnosticKind::MalformedLine), 2);
    }

    #[test]
    fn events_without_package() {
        let input = indoc! {r#"
            {"Action":"output","Output":"go: downloading example.com/dep v1.0.0\n"}
            {"Action":"pass"}
            {"Action":"run","Package":"pkgA","Test":"TestX"}
            {"Action":"pass","Package":"pkgA","Test":"TestX","Elapsed":0}
            {"Action":"pass","Package":"pkgA","Elapsed":0}
        "#};
        let results = aggregate(input, &ExitOutcome::Success);
        assert_eq!(
            find(&results, UNASSOCIATED_PACKAGE).summary,
            vec!["go: downloading example.com/dep v1.0.0".to_owned()]
        );
        assert_eq!(results.diagnostics.count(DiagnosticKind::MissingPackage), 1);
    }

    #[test]
    fn unterminated_package_is_unknown() {
        let input = indoc! {r#"
            {"Action":"start","Package":"pkgA"}
            {"Action":"run","Package":"pkgA","Test":"TestX"}
            {"Action":"pass","Package":"pkgA","Test":"TestX","Elapsed":0}
            {"Action":"pause","Package":"pkgA","Test":"TestY"}
            {"Action":"frobnicate","Package":"pkgA"}
        "#};
        let results = aggregate(input, &non_zero_exit());
        let package = find(&results, "pkgA");
        assert_eq!(package.status, TestStatus::Unknown);
        assert_eq!(package.duration, None);
        assert_eq!(
            results.diagnostics.count(DiagnosticKind::UnterminatedPackage),
            1
        );
        assert_eq!(results.diagnostics.count(DiagnosticKind::UnknownAction), 1);
        // Nothing failed, so the non-zero exit gets its own package.
        assert_eq!(
            results.packages.last().map(|p| p.package.as_str()),
            Some(EXECUTION_ERROR_PACKAGE)
        );
    }

    #[test]
    fn build_output_moves_into_failed_package() {
        let input = indoc! {r##"
            {"ImportPath":"example.com/b [example.com/b.test]","Action":"build-output","Output":"# example.com/b [example.com/b.test]\n"}
            {"ImportPath":"example.com/b [example.com/b.test]","Action":"build-output","Output":"./b_test.go:3:1: syntax error\n"}
            {"ImportPath":"example.com/b [example.com/b.test]","Action":"build-fail"}
            {"Action":"start","Package":"example.com/b"}
            {"Action":"output","Package":"example.com/b","Output":"FAIL\texample.com/b [build failed]\n"}
            {"Action":"fail","Package":"example.com/b","Elapsed":0,"FailedBuild":"example.com/b [example.com/b.test]"}
        "##};
        let results = aggregate(input, &non_zero_exit());
        assert_eq!(results.packages.len(), 1);
        let package = &results.packages[0];
        assert_eq!(package.status, TestStatus::Fail);
        assert_eq!(package.tests[0].name, "(package: build failed)");
        assert_eq!(
            package.tests[0].output,
            vec![
                "# example.com/b [example.com/b.test]".to_owned(),
                "./b_test.go:3:1: syntax error".to_owned(),
                "FAIL\texample.com/b [build failed]".to_owned(),
            ]
        );
    }

    #[test]
    fn successful_run_without_packages() {
        let input = indoc! {r#"
            {"Action":"pass"}
        "#};
        let results = aggregate(input, &ExitOutcome::Success);
        assert_eq!(results.events_seen, 1);
        assert_eq!(results.packages.len(), 1);
        let package = &results.packages[0];
        assert_eq!(package.package, NO_RESULTS_PACKAGE);
        assert_eq!(package.status, TestStatus::Skip);
        assert_eq!(
            package.summary,
            vec!["`go test` completed without reporting results for any package".to_owned()]
        );
    }

    #[test]
    fn build_output_without_packages_on_success() {
        let input = indoc! {r##"
            {"ImportPath":"example.com/b","Action":"build-output","Output":"# example.com/b\n"}
        "##};
        let results = aggregate(input, &ExitOutcome::Success);
        assert_eq!(results.packages.len(), 1);
        assert_eq!(results.packages[0].package, NO_RESULTS_PACKAGE);
        assert_eq!(results.packages[0].summary[1..], ["# example.com/b".to_owned()]);
        assert_eq!(
            results.diagnostics.count(DiagnosticKind::UnclaimedBuildOutput),
            1
        );
    }

    #[test]
    fn unclaimed_build_output_is_reported_with_the_exit_status() {
        let input = indoc! {r##"
            {"ImportPath":"example.com/x [example.com/x.test]","Action":"build-output","Output":"./x_test.go:3: syntax error\n"}
            {"ImportPath":"example.com/x [example.com/x.test]","Action":"build-fail"}
        "##};
        let results = aggregate(input, &non_zero_exit());
        assert_eq!(results.packages.len(), 1);
        let package = &results.packages[0];
        assert_eq!(package.package, EXECUTION_ERROR_PACKAGE);
        assert_eq!(
            package.tests[0].output,
            vec![
                "`go test` exited with code 1".to_owned(),
                "build output:".to_owned(),
                "./x_test.go:3: syntax error".to_owned(),
            ]
        );
        assert_eq!(
            results.diagnostics.count(DiagnosticKind::UnclaimedBuildOutput),
            1
        );
    }

    #[test]
    fn unclaimed_build_output_moves_to_its_package() {
        let input = indoc! {r##"
            {"ImportPath":"example.com/b [example.com/b.test]","Action":"build-output","Output":"# example.com/b [example.com/b.test]\n"}
            {"ImportPath":"example.com/b [example.com/b.test]","Action":"build-fail"}
            {"Action":"start","Package":"example.com/b"}
            {"Action":"output","Package":"example.com/b","Output":"FAIL\texample.com/b [build failed]\n"}
        "##};
        let results = aggregate(input, &non_zero_exit());
        let package = find(&results, "example.com/b");
        assert_eq!(package.status, TestStatus::Unknown);
        assert_eq!(
            package.summary,
            vec![
                "# example.com/b [example.com/b.test]".to_owned(),
                "FAIL\texample.com/b [build failed]".to_owned(),
            ]
        );
        assert_eq!(
            results.diagnostics.count(DiagnosticKind::UnclaimedBuildOutput),
            1
        );
    }

    #[test]
    fn unclaimed_build_output_with_other_failures() {
        let input = indoc! {r##"
            {"ImportPath":"example.com/gone","Action":"build-output","Output":"# example.com/gone\n"}
            {"Action":"run","Package":"pkgA","Test":"TestX"}
            {"Action":"fail","Package":"pkgA","Test":"TestX","Elapsed":0}
            {"Action":"fail","Package":"pkgA","Elapsed":0}
        "##};
        let results = aggregate(input, &non_zero_exit());
        assert_eq!(results.packages.len(), 2);
        let unassociated = find(&results, UNASSOCIATED_PACKAGE);
        assert_eq!(unassociated.status, TestStatus::Skip);
        assert_eq!(unassociated.summary, vec!["# example.com/gone".to_owned()]);
    }

    #[test]
    fn tests_are_sorted_and_packages_keep_first_seen_order() {
        let input = indoc! {r#"
            {"Action":"run","Package":"z","Test":"TestB"}
            {"Action":"run","Package":"a","Test":"TestA"}
            {"Action":"run","Package":"z","Test":"TestA"}
            {"Action":"pass","Package":"z","Test":"TestB","Elapsed":0}
            {"Action":"pass","Package":"z","Test":"TestA","Elapsed":0}
            {"Action":"pass","Package":"a","Test":"TestA","Elapsed":0}
            {"Action":"pass","Package":"a","Elapsed":0}
            {"Action":"pass","Package":"z","Elapsed":0}
        "#};
        let results = aggregate(input, &ExitOutcome::Success);
        let names: Vec<_> = results.packages.iter().map(|p| p.package.as_str()).collect();
        assert_eq!(names, ["z", "a"]);
        let tests: Vec<_> = results.packages[0]
            .tests
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(tests, ["TestA", "TestB"]);
    }

    fn event_line(package: &str, test: Option<&str>, action: &str) -> String {
        match test {
            Some(test) => format!(
                r#"{{"Action":"{action}","Package":"{package}","Test":"{test}","Elapsed":0.1}}"#
            ),
            None => format!(r#"{{"Action":"{action}","Package":"{package}","Elapsed":0.1}}"#),
        }
    }

    fn mixed_package_lines() -> Vec<String> {
        vec![
            event_line("pkgA", Some("TestFail"), "run"),
            event_line("pkgA", Some("TestPass"), "run"),
            event_line("pkgA", Some("TestFail"), "fail"),
            event_line("pkgA", Some("TestPass"), "pass"),
            event_line("pkgA", None, "pass"),
        ]
    }

    fn arbitrary_line() -> impl Strategy<Value = String> {
        let packages = prop_oneof![Just("pkgA"), Just("pkgB"), Just("")];
        let tests = prop_oneof![Just(None), Just(Some("TestA")), Just(Some("TestB"))];
        let actions = prop_oneof![
            Just("start"),
            Just("run"),
            Just("output"),
            Just("pass"),
            Just("fail"),
            Just("skip"),
            Just("pause"),
            Just("cont"),
        ];
        let build_output = prop_oneof![Just("pkgA"), Just("pkgC [pkgC.test]")].prop_map(|path| {
            format!(r##"{{"ImportPath":"{path}","Action":"build-output","Output":"# {path}\n"}}"##)
        });
        prop_oneof![
            4 => (packages, tests, actions)
                .prop_map(|(package, test, action)| event_line(package, test, action)),
            1 => build_output,
            1 => "[^\n]{0,20}",
        ]
    }

    #[proptest]
    fn failure_is_monotonic(
        #[strategy(Just(mixed_package_lines()).prop_shuffle())] lines: Vec<String>,
    ) {
        let results = aggregate(&lines.join("\n"), &non_zero_exit());
        let package = find(&results, "pkgA");
        assert_eq!(package.status, TestStatus::Fail);
        let fail = package.tests.iter().find(|t| t.name == "TestFail").unwrap();
        assert_eq!(fail.status, TestStatus::Fail);
    }

    #[proptest]
    fn records_are_always_terminal(
        #[strategy(vec(arbitrary_line(), 0..40))] lines: Vec<String>,
        exit_success: bool,
    ) {
        let outcome = if exit_success {
            ExitOutcome::Success
        } else {
            non_zero_exit()
        };
        let results = aggregate(&lines.join("\n"), &outcome);
        assert!(!results.packages.is_empty());
        for package in &results.packages {
            assert!(package.status.is_terminal());
            for test in &package.tests {
                assert!(test.status.is_terminal());
                assert_ne!(test.status, TestStatus::Unknown);
            }
        }
    }

    #[proptest]
    fn aggregation_is_deterministic(#[strategy(vec(arbitrary_line(), 0..40))] lines: Vec<String>) {
        let input = lines.join("\n");
        let first = aggregate(&input, &ExitOutcome::Success);
        let second = aggregate(&input, &ExitOutcome::Success);
        assert_eq!(first.packages, second.packages);
        assert_eq!(first.diagnostics, second.diagnostics);
    }

    #[proptest]
    fn malformed_line_changes_nothing_else(#[strategy(0..=5usize)] position: usize) {
        let mut lines: Vec<_> = PASSING_RUN.lines().map(|l| l.to_owned()).collect();
        lines.insert(position, "this is not json".to_owned());
        let results = aggregate(&lines.join("\n"), &ExitOutcome::Success);

        let package = find(&results, "pkgA");
        assert_eq!(package.status, TestStatus::Pass);
        assert_eq!(package.tests.len(), 1);
        assert_eq!(package.tests[0].status, TestStatus::Pass);
        assert_eq!(package.tests[0].output, vec!["ok".to_owned()]);
    }
}
