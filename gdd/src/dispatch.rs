// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::{ExpectedError, GddExitCode, Result},
    output::{OutputContext, OutputOpts, OutputWriter, clap_styles},
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use gdd_runner::{
    config::{FailureOutput, GddConfig, RunSettings},
    helpers::plural,
    list::TestTargetList,
    reporter::{MessageFormat, TestReporterBuilder},
    runner::TestRunnerBuilder,
    signal::SignalHandlerKind,
    test_command::RunConfig,
};
use owo_colors::{OwoColorize, Style};
use std::{io::Write, time::Duration};
use tracing::debug;

/// A streaming runner for Go tests.
///
/// gdd runs `go test -json`, reports each test as it finishes, and summarizes the run.
#[derive(Debug, Parser)]
#[command(version, name = "gdd", styles = clap_styles::style())]
pub struct GddApp {
    #[command(flatten)]
    common: CommonOpts,

    #[command(subcommand)]
    command: Command,
}

impl GddApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> Result<OutputContext> {
        self.common.output.init()
    }

    /// Executes the app, returning the process exit code.
    pub fn exec(self, output: OutputContext, output_writer: &mut OutputWriter) -> Result<i32> {
        let workdir = match self.common.workdir {
            Some(workdir) => workdir,
            None => current_dir()?,
        };
        debug!("working directory: {workdir}");

        match self.command {
            Command::List { message_format } => {
                exec_list(&workdir, message_format, output, output_writer)
            }
            Command::Run(run_opts) => {
                let config =
                    GddConfig::from_sources(&workdir, self.common.config_file.as_deref())?;
                run_opts.exec(&workdir, &config, output, output_writer)
            }
        }
    }
}

#[derive(Debug, Args)]
struct CommonOpts {
    /// Directory to run `go test` from [default: current directory]
    #[arg(long, short = 'C', global = true, value_name = "DIR")]
    workdir: Option<Utf8PathBuf>,

    /// Config file [default: workdir/.config/gdd.toml]
    #[arg(long, global = true, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,

    #[command(flatten)]
    output: OutputOpts,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List tests in the project
    ///
    /// Scans `*_test.go` files for `TestXxx(*testing.T)` functions without building anything.
    /// Use --message-format json to get machine-readable output.
    List {
        /// Output format: human, json, json-pretty
        #[arg(short = 'T', long, default_value_t, value_name = "FMT")]
        message_format: MessageFormat,
    },

    /// Run tests with streaming output
    Run(RunOpts),
}

#[derive(Debug, Args)]
struct RunOpts {
    #[command(subcommand)]
    scope: Option<RunScopeCommand>,

    #[command(flatten)]
    runner_opts: TestRunnerOpts,

    #[command(flatten)]
    reporter_opts: TestReporterOpts,
}

#[derive(Debug, Subcommand)]
enum RunScopeCommand {
    /// Run every package in the project (default)
    All,

    /// Run all tests in one package
    Package {
        /// Package path relative to the working directory, e.g. `./internal/store`
        path: String,
    },

    /// Run a single test function
    Test {
        /// Package path relative to the working directory
        path: String,

        /// Name of the test function, e.g. `TestOpen`
        name: String,
    },
}

impl RunScopeCommand {
    fn to_run_config(&self) -> RunConfig {
        match self {
            Self::All => RunConfig::all(),
            Self::Package { path } => RunConfig::package(path),
            Self::Test { path, name } => RunConfig::single(path, name),
        }
    }
}

#[derive(Debug, Default, Args)]
#[command(next_help_heading = "RUNNER OPTIONS")]
struct TestRunnerOpts {
    /// Program to invoke instead of `go` [default: from config]
    #[arg(long, value_name = "PATH")]
    go_binary: Option<String>,

    /// Pass -short to `go test`
    #[arg(long)]
    short: bool,

    /// Pass -race to `go test`
    #[arg(long)]
    race: bool,

    /// Pass -timeout to `go test`, e.g. 90s or 10m [default: from config]
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// How long `go test` gets to exit after cancellation before it is killed
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    grace_period: Option<Duration>,

    /// Extra argument passed to `go test` after the standard flags (may be repeated)
    #[arg(long = "go-arg", value_name = "ARG", allow_hyphen_values = true)]
    go_args: Vec<String>,
}

impl TestRunnerOpts {
    fn apply(&self, settings: &mut RunSettings) {
        if let Some(go_binary) = &self.go_binary {
            settings.go_binary = go_binary.clone();
        }
        settings.short |= self.short;
        settings.race |= self.race;
        if let Some(timeout) = self.timeout {
            settings.timeout = Some(timeout);
        }
        settings.extra_args.extend(self.go_args.iter().cloned());
    }

    fn to_builder(&self) -> TestRunnerBuilder {
        let mut builder = TestRunnerBuilder::default();
        if let Some(grace_period) = self.grace_period {
            builder.set_grace_period(grace_period);
        }
        builder
    }
}

#[derive(Debug, Default, Args)]
#[command(next_help_heading = "REPORTER OPTIONS")]
struct TestReporterOpts {
    /// Output of failing tests: immediate, final, never [default: from config]
    #[arg(long, value_name = "WHEN", env = "GDD_FAILURE_OUTPUT")]
    failure_output: Option<FailureOutput>,

    /// Also write the final report to stdout in this format: human, json, json-pretty
    #[arg(long, default_value_t, value_name = "FMT")]
    message_format: MessageFormat,

    /// Don't print the output of failed packages at the end of the run
    #[arg(long)]
    hide_summary_output: bool,
}

impl TestReporterOpts {
    fn to_builder(&self, config: &GddConfig) -> TestReporterBuilder {
        let mut builder = TestReporterBuilder::default();
        builder
            .set_failure_output(
                self.failure_output
                    .unwrap_or(config.output_settings().failure_output),
            )
            .set_message_format(self.message_format)
            .set_hide_summary_output(self.hide_summary_output);
        builder
    }
}

impl RunOpts {
    fn exec(
        self,
        workdir: &Utf8Path,
        config: &GddConfig,
        output: OutputContext,
        output_writer: &mut OutputWriter,
    ) -> Result<i32> {
        let run_config = self
            .scope
            .as_ref()
            .map_or_else(RunConfig::all, RunScopeCommand::to_run_config)
            .with_working_dir(workdir);

        let mut settings = config.run_settings().clone();
        self.runner_opts.apply(&mut settings);

        let runner = self.runner_opts.to_builder().build(
            &run_config,
            &settings,
            SignalHandlerKind::Standard,
        )?;
        debug!("running `{}`", runner.command_line());

        let mut reporter = self
            .reporter_opts
            .to_builder(config)
            .build(output_writer.reporter_output());
        if output.color.should_colorize(supports_color::Stream::Stderr) {
            reporter.colorize();
        }

        let report = runner.try_execute(|event| reporter.report_event(event))?;
        if !report.is_success() {
            return Err(ExpectedError::test_run_failed());
        }
        Ok(GddExitCode::OK)
    }
}

fn exec_list(
    workdir: &Utf8Path,
    message_format: MessageFormat,
    output: OutputContext,
    output_writer: &mut OutputWriter,
) -> Result<i32> {
    let list = TestTargetList::discover(workdir)?;

    let mut writer = output_writer.stdout_writer();
    match message_format {
        MessageFormat::Human => {
            let mut styles = ListStyles::default();
            if output.color.should_colorize(supports_color::Stream::Stdout) {
                styles.colorize();
            }
            write_list_human(&list, output.verbose, &styles, &mut writer)
                .map_err(ExpectedError::write_failed)?;
        }
        MessageFormat::Json => {
            serde_json::to_writer(&mut writer, &list).map_err(|err| {
                ExpectedError::WriteEventError { err: err.into() }
            })?;
            writeln!(writer).map_err(ExpectedError::write_failed)?;
        }
        MessageFormat::JsonPretty => {
            serde_json::to_writer_pretty(&mut writer, &list).map_err(|err| {
                ExpectedError::WriteEventError { err: err.into() }
            })?;
            writeln!(writer).map_err(ExpectedError::write_failed)?;
        }
    }
    writer.flush().map_err(ExpectedError::write_failed)?;

    Ok(GddExitCode::OK)
}

#[derive(Debug, Default)]
struct ListStyles {
    package: Style,
    count: Style,
    path: Style,
}

impl ListStyles {
    fn colorize(&mut self) {
        self.package = Style::new().magenta().bold();
        self.count = Style::new().bold();
        self.path = Style::new().dimmed();
    }
}

fn write_list_human(
    list: &TestTargetList,
    verbose: bool,
    styles: &ListStyles,
    writer: &mut dyn Write,
) -> std::io::Result<()> {
    let mut current_dir = None;
    for target in list.targets() {
        if current_dir != Some(target.package_dir.as_str()) {
            current_dir = Some(target.package_dir.as_str());
            writeln!(
                writer,
                "{} (package {}):",
                target.go_package_path().style(styles.package),
                target.package_name,
            )?;
        }
        if verbose {
            writeln!(
                writer,
                "    {} {}",
                target.name,
                target.file_path.style(styles.path)
            )?;
        } else {
            writeln!(writer, "    {}", target.name)?;
        }
    }

    let packages = list.package_dirs().count();
    writeln!(
        writer,
        "{} {} in {} {}",
        list.targets().len().style(styles.count),
        plural::tests_str(list.targets().len()),
        packages.style(styles.count),
        plural::packages_str(packages),
    )
}

fn current_dir() -> Result<Utf8PathBuf> {
    let dir =
        std::env::current_dir().map_err(|err| ExpectedError::CurrentDirFailed { err })?;
    Utf8PathBuf::try_from(dir).map_err(|err| ExpectedError::CurrentDirInvalidUtf8 {
        path: err.into_path_buf(),
    })
}
