// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prints human-readable progress and results to stderr.

use super::{
    events::{ReporterEvent, ReporterEventKind},
    structured::{MessageFormat, StructuredReporter},
};
use crate::{
    config::FailureOutput,
    errors::WriteEventError,
    helpers::{DisplayBracketedDuration, plural},
    results::{RunReport, RunStats, TestRecord, TestStatus},
};
use owo_colors::{OwoColorize, Style};
use std::io::{self, BufWriter, Write};
use swrite::{SWrite, swrite};

/// Where the human-readable output goes.
pub enum ReporterStderr<'a> {
    /// Standard error.
    Terminal,

    /// An in-memory buffer, for tests.
    Buffer(&'a mut Vec<u8>),
}

/// Test reporter builder.
#[derive(Debug, Default)]
pub struct TestReporterBuilder {
    failure_output: Option<FailureOutput>,
    message_format: MessageFormat,
    hide_summary_output: bool,
}

impl TestReporterBuilder {
    /// Sets when the output of failing tests is displayed.
    pub fn set_failure_output(&mut self, failure_output: FailureOutput) -> &mut Self {
        self.failure_output = Some(failure_output);
        self
    }

    /// Sets the machine-readable format written to stdout when the run finishes.
    pub fn set_message_format(&mut self, message_format: MessageFormat) -> &mut Self {
        self.message_format = message_format;
        self
    }

    /// Don't print the summary output of failed packages at the end of the run.
    pub fn set_hide_summary_output(&mut self, hide: bool) -> &mut Self {
        self.hide_summary_output = hide;
        self
    }

    /// Creates a new test reporter.
    pub fn build<'a>(&self, stderr: ReporterStderr<'a>) -> TestReporter<'a> {
        TestReporter {
            inner: TestReporterImpl {
                failure_output: self.failure_output.unwrap_or_default(),
                hide_summary_output: self.hide_summary_output,
                styles: Box::default(),
                final_failures: Vec::new(),
            },
            stderr,
            structured_reporter: StructuredReporter::new(self.message_format),
        }
    }
}

/// Reports run progress to stderr, and optionally the final report to stdout.
pub struct TestReporter<'a> {
    inner: TestReporterImpl,
    stderr: ReporterStderr<'a>,
    structured_reporter: StructuredReporter,
}

impl TestReporter<'_> {
    /// Colorizes output.
    pub fn colorize(&mut self) {
        self.inner.styles.colorize();
    }

    /// Reports an event.
    pub fn report_event(&mut self, event: ReporterEvent<'_>) -> Result<(), WriteEventError> {
        match &mut self.stderr {
            ReporterStderr::Terminal => {
                let mut writer = BufWriter::new(io::stderr());
                self.inner.write_event_impl(&event, &mut writer)?;
                writer.flush()?;
            }
            ReporterStderr::Buffer(buf) => {
                self.inner.write_event_impl(&event, *buf)?;
            }
        }

        self.structured_reporter.write_event(&event)
    }
}

struct TestReporterImpl {
    failure_output: FailureOutput,
    hide_summary_output: bool,
    styles: Box<Styles>,
    final_failures: Vec<TestRecord>,
}

impl TestReporterImpl {
    fn write_event_impl(
        &mut self,
        event: &ReporterEvent<'_>,
        writer: &mut dyn Write,
    ) -> io::Result<()> {
        match &event.kind {
            ReporterEventKind::RunStarted {
                scope_description,
                command_line,
            } => {
                writeln!(
                    writer,
                    "{:>12} {scope_description}: {}",
                    "Starting".style(self.styles.pass),
                    command_line.style(self.styles.count),
                )?;
            }
            ReporterEventKind::TestStarted { .. } => {}
            ReporterEventKind::TestFinished { record, .. } => {
                self.write_status_line(record, writer)?;
                if record.is_failure() && !record.output.is_empty() {
                    if self.failure_output.is_immediate() {
                        self.write_test_output(record, writer)?;
                    } else if self.failure_output.is_final() {
                        self.final_failures.push((*record).clone());
                    }
                }
            }
            ReporterEventKind::PackageFinished {
                package,
                status,
                duration,
                test_count,
            } => {
                let label = match status {
                    TestStatus::Pass => "PKG PASS".style(self.styles.pass),
                    TestStatus::Skip => "PKG SKIP".style(self.styles.skip),
                    TestStatus::Fail => "PKG FAIL".style(self.styles.fail),
                    TestStatus::Running | TestStatus::Unknown => "PKG ????".style(self.styles.skip),
                };
                write!(writer, "{label:>12} ")?;
                write!(
                    writer,
                    "{}",
                    DisplayBracketedDuration(duration.unwrap_or_default())
                )?;
                writeln!(
                    writer,
                    "{} ({} {})",
                    package.style(self.styles.package),
                    test_count.style(self.styles.count),
                    plural::tests_str(*test_count),
                )?;
            }
            ReporterEventKind::RunBeginCancel { reason } => {
                writeln!(
                    writer,
                    "{:>12} due to {} signal",
                    "Cancelling".style(self.styles.fail),
                    reason.description(),
                )?;
            }
            ReporterEventKind::RunBeginKill { reason } => {
                writeln!(
                    writer,
                    "{:>12} due to {} signal",
                    "Killing".style(self.styles.fail),
                    reason.description(),
                )?;
            }
            ReporterEventKind::RunFinished { report } => {
                self.write_run_finished(report, writer)?;
            }
        }

        Ok(())
    }

    fn write_run_finished(&mut self, report: &RunReport, writer: &mut dyn Write) -> io::Result<()> {
        for record in std::mem::take(&mut self.final_failures) {
            self.write_status_line(&record, writer)?;
            self.write_test_output(&record, writer)?;
        }

        if !self.hide_summary_output && !matches!(self.failure_output, FailureOutput::Never) {
            for package in &report.packages {
                if package.has_failures() && !package.summary.is_empty() {
                    let header = format!("--- OUTPUT: {} ---", package.package);
                    writeln!(writer, "{}", header.style(self.styles.fail))?;
                    for line in &package.summary {
                        writeln!(writer, "{line}")?;
                    }
                    writeln!(writer)?;
                }
            }
        }

        let stats = report.stats();
        let overall = report.overall_status();
        let summary_style = match overall {
            TestStatus::Pass => self.styles.pass,
            TestStatus::Skip => self.styles.skip,
            TestStatus::Fail | TestStatus::Running | TestStatus::Unknown => self.styles.fail,
        };
        write!(
            writer,
            "------------\n{:>12} ",
            "Summary".style(summary_style)
        )?;
        write!(writer, "{}", DisplayBracketedDuration(report.wall_clock))?;

        let mut summary_str = String::new();
        write_summary_str(&stats, &self.styles, &mut summary_str);
        writeln!(
            writer,
            "{} {} run across {} {}: {summary_str}",
            stats.total.style(self.styles.count),
            plural::tests_str(stats.total),
            report.packages.len().style(self.styles.count),
            plural::packages_str(report.packages.len()),
        )?;

        for package in &report.packages {
            for record in package.tests.iter().filter(|t| t.is_failure()) {
                self.write_status_line(record, writer)?;
            }
        }

        if report.cancelled {
            writeln!(
                writer,
                "{:>12} the run was cancelled",
                "Cancelled".style(self.styles.fail)
            )?;
        }

        if !report.diagnostics.is_empty() {
            let count = report.diagnostics.len();
            writeln!(
                writer,
                "{:>12} {} {} in test output (set GDD_LOG=debug for details)",
                "Note".style(self.styles.skip),
                count.style(self.styles.count),
                plural::anomalies_str(count),
            )?;
        }

        Ok(())
    }

    fn write_status_line(&self, record: &TestRecord, writer: &mut dyn Write) -> io::Result<()> {
        let label = match record.status {
            TestStatus::Pass => "PASS".style(self.styles.pass),
            TestStatus::Fail => "FAIL".style(self.styles.fail),
            TestStatus::Skip => "SKIP".style(self.styles.skip),
            TestStatus::Running | TestStatus::Unknown => "????".style(self.styles.skip),
        };
        write!(writer, "{label:>12} ")?;
        write!(writer, "{}", DisplayBracketedDuration(record.duration))?;
        writeln!(
            writer,
            "{} {}",
            record.package.style(self.styles.package),
            record.name,
        )
    }

    fn write_test_output(&self, record: &TestRecord, writer: &mut dyn Write) -> io::Result<()> {
        let header = format!("--- OUTPUT: {} {} ---", record.package, record.name);
        writeln!(writer, "{}", header.style(self.styles.fail))?;
        for line in &record.output {
            writeln!(writer, "{line}")?;
        }
        writeln!(writer)
    }
}

fn write_summary_str(run_stats: &RunStats, styles: &Styles, out: &mut String) {
    swrite!(
        out,
        "{} {}",
        run_stats.passed.style(styles.count),
        "passed".style(styles.pass)
    );

    if run_stats.failed > 0 {
        swrite!(
            out,
            ", {} {}",
            run_stats.failed.style(styles.count),
            "failed".style(styles.fail),
        );
    }

    if run_stats.unknown > 0 {
        swrite!(
            out,
            ", {} {}",
            run_stats.unknown.style(styles.count),
            "unknown".style(styles.fail),
        );
    }

    swrite!(
        out,
        ", {} {}",
        run_stats.skipped.style(styles.count),
        "skipped".style(styles.skip),
    );
}

#[derive(Debug, Default)]
struct Styles {
    is_colorized: bool,
    count: Style,
    pass: Style,
    fail: Style,
    skip: Style,
    package: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.is_colorized = true;
        self.count = Style::new().bold();
        self.pass = Style::new().green().bold();
        self.fail = Style::new().red().bold();
        self.skip = Style::new().yellow().bold();
        self.package = Style::new().magenta().bold();
    }
}
