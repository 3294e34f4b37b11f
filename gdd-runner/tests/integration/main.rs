// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests that drive the runner against a fake `go` binary.
//!
//! The fake binary is a shell script, so these tests only run on Unix.

#![cfg(unix)]

mod executor;
mod fake_go;

use color_eyre::eyre::Result;
use fake_go::FakeGo;
use gdd_runner::{
    reporter::{
        EXECUTION_ERROR_PACKAGE, EXECUTION_ERROR_TEST, ReporterEventKind, ReporterStderr,
        TestReporterBuilder,
    },
    results::{RunReport, TestStatus},
    runner::{ExitOutcome, TestRunnerBuilder},
    signal::SignalHandlerKind,
    test_command::RunConfig,
};
use indoc::indoc;
use pretty_assertions::assert_eq;
use std::time::Duration;

const PASSING_STREAM: &str = indoc! {r#"
    {"Time":"2025-05-01T10:00:00.000000+02:00","Action":"start","Package":"example.com/calc"}
    {"Time":"2025-05-01T10:00:00.100000+02:00","Action":"run","Package":"example.com/calc","Test":"TestAdd"}
    {"Time":"2025-05-01T10:00:00.100100+02:00","Action":"output","Package":"example.com/calc","Test":"TestAdd","Output":"=== RUN   TestAdd\n"}
    {"Time":"2025-05-01T10:00:00.100200+02:00","Action":"output","Package":"example.com/calc","Test":"TestAdd","Output":"--- PASS: TestAdd (0.00s)\n"}
    {"Time":"2025-05-01T10:00:00.100300+02:00","Action":"pass","Package":"example.com/calc","Test":"TestAdd","Elapsed":0}
    {"Time":"2025-05-01T10:00:00.100400+02:00","Action":"run","Package":"example.com/calc","Test":"TestSub"}
    {"Time":"2025-05-01T10:00:00.100500+02:00","Action":"skip","Package":"example.com/calc","Test":"TestSub","Elapsed":0}
    {"Time":"2025-05-01T10:00:00.100600+02:00","Action":"output","Package":"example.com/calc","Output":"ok  \texample.com/calc\t0.002s\n"}
    {"Time":"2025-05-01T10:00:00.100700+02:00","Action":"pass","Package":"example.com/calc","Elapsed":0.002}
"#};

const FAILING_STREAM: &str = indoc! {r#"
    {"Action":"start","Package":"example.com/calc"}
    {"Action":"run","Package":"example.com/calc","Test":"TestDiv"}
    {"Action":"output","Package":"example.com/calc","Test":"TestDiv","Output":"=== RUN   TestDiv\n"}
    {"Action":"output","Package":"example.com/calc","Test":"TestDiv","Output":"    calc_test.go:12: division by zero\n"}
    {"Action":"output","Package":"example.com/calc","Test":"TestDiv","Output":"--- FAIL: TestDiv (0.00s)\n"}
    {"Action":"fail","Package":"example.com/calc","Test":"TestDiv","Elapsed":0.01}
    {"Action":"output","Package":"example.com/calc","Output":"FAIL\n"}
    {"Action":"output","Package":"example.com/calc","Output":"FAIL\texample.com/calc\t0.011s\n"}
    {"Action":"fail","Package":"example.com/calc","Elapsed":0.011}
"#};

fn run(config: RunConfig, fake: &FakeGo) -> Result<(RunReport, Vec<String>)> {
    let settings = fake.install()?;
    let runner = TestRunnerBuilder::default()
        .set_grace_period(Duration::from_millis(500))
        .build(
            &config.with_working_dir(fake.dir()),
            &settings,
            SignalHandlerKind::Noop,
        )?;

    let mut kinds = Vec::new();
    let report = runner.execute(|event| {
        let name = match event.kind {
            ReporterEventKind::RunStarted { .. } => "run-started".to_owned(),
            ReporterEventKind::TestStarted { name, .. } => format!("test-started {name}"),
            ReporterEventKind::TestFinished { record, .. } => {
                format!("test-finished {} {}", record.name, record.status)
            }
            ReporterEventKind::PackageFinished { package, status, .. } => {
                format!("package-finished {package} {status}")
            }
            ReporterEventKind::RunBeginCancel { .. } => "run-begin-cancel".to_owned(),
            ReporterEventKind::RunBeginKill { .. } => "run-begin-kill".to_owned(),
            ReporterEventKind::RunFinished { .. } => "run-finished".to_owned(),
        };
        kinds.push(name);
    });
    Ok((report, kinds))
}

#[test]
fn passing_run_streams_events_in_order() -> Result<()> {
    let fake = FakeGo::new()?.stdout(PASSING_STREAM);
    let (report, events) = run(RunConfig::package("./calc"), &fake)?;

    assert_eq!(
        events,
        [
            "run-started",
            "test-started TestAdd",
            "test-finished TestAdd pass",
            "test-started TestSub",
            "test-finished TestSub skip",
            "package-finished example.com/calc pass",
            "run-finished",
        ]
    );

    assert!(report.outcome.is_success());
    assert_eq!(report.overall_status(), TestStatus::Pass);
    assert!(report.is_success());
    assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);

    let package = &report.packages[0];
    assert_eq!(package.summary, ["ok  \texample.com/calc\t0.002s"]);
    assert_eq!(package.tests.len(), 2);
    assert_eq!(package.tests[0].name, "TestAdd");
    assert_eq!(
        package.tests[0].output,
        ["=== RUN   TestAdd", "--- PASS: TestAdd (0.00s)"]
    );

    assert_eq!(
        fake.recorded_args()?,
        "test -json -v -count=1 ./calc",
        "standard flags precede the target"
    );
    Ok(())
}

#[test]
fn failing_run_keeps_test_output() -> Result<()> {
    let fake = FakeGo::new()?.stdout(FAILING_STREAM).exit_code(1);
    let (report, _) = run(RunConfig::single("./calc", "TestDiv"), &fake)?;

    assert!(matches!(
        report.outcome,
        ExitOutcome::NonZeroExit { code: Some(1), .. }
    ));
    assert_eq!(report.overall_status(), TestStatus::Fail);
    assert!(!report.is_success());
    // The failure explains the exit status, so no execution error package is added.
    assert_eq!(report.packages.len(), 1);

    let test = &report.packages[0].tests[0];
    assert_eq!(test.status, TestStatus::Fail);
    assert!(test.output.contains(&"    calc_test.go:12: division by zero".to_owned()));
    assert_eq!(test.duration, Duration::from_millis(10));

    assert_eq!(
        fake.recorded_args()?,
        "test -json -v -count=1 ./calc -run ^TestDiv$"
    );
    Ok(())
}

#[test]
fn non_zero_exit_without_events_reports_stderr() -> Result<()> {
    let fake = FakeGo::new()?
        .stderr("go: go.mod file not found in current directory\n")
        .exit_code(1);
    let (report, _) = run(RunConfig::all(), &fake)?;

    assert_eq!(report.packages.len(), 1);
    let package = &report.packages[0];
    assert_eq!(package.package, EXECUTION_ERROR_PACKAGE);
    assert_eq!(package.tests[0].name, EXECUTION_ERROR_TEST);
    assert!(
        package.tests[0]
            .output
            .contains(&"go: go.mod file not found in current directory".to_owned()),
        "stderr tail is attached: {:?}",
        package.tests[0].output
    );
    assert_eq!(report.overall_status(), TestStatus::Fail);
    Ok(())
}

#[test]
fn missing_binary_is_a_launch_failure() -> Result<()> {
    let fake = FakeGo::new()?;
    let mut settings = fake.install()?;
    settings.go_binary = fake.dir().join("does-not-exist").into_string();

    let runner = TestRunnerBuilder::default().build(
        &RunConfig::all().with_working_dir(fake.dir()),
        &settings,
        SignalHandlerKind::Noop,
    )?;
    let report = runner.execute(|_| {});

    assert!(matches!(report.outcome, ExitOutcome::LaunchFailed(_)));
    assert_eq!(report.packages[0].package, EXECUTION_ERROR_PACKAGE);
    assert_eq!(report.overall_status(), TestStatus::Fail);
    Ok(())
}

#[test]
fn events_arrive_before_the_process_exits() -> Result<()> {
    let fake = FakeGo::new()?.stdout(PASSING_STREAM).sleep_before_exit(1.0);
    let settings = fake.install()?;
    let runner = TestRunnerBuilder::default().build(
        &RunConfig::package("./calc").with_working_dir(fake.dir()),
        &settings,
        SignalHandlerKind::Noop,
    )?;

    let mut first_finish = None;
    let report = runner.execute(|event| {
        if let ReporterEventKind::TestFinished { .. } = event.kind {
            first_finish.get_or_insert(event.elapsed);
        }
    });

    let first_finish = first_finish.expect("a test finished");
    assert!(
        first_finish + Duration::from_millis(500) < report.wall_clock,
        "first result at {first_finish:?}, run took {:?}",
        report.wall_clock
    );
    Ok(())
}

#[test]
fn callback_error_cancels_the_run() -> Result<()> {
    let fake = FakeGo::new()?.stdout(PASSING_STREAM).sleep_before_exit(30.0);
    let settings = fake.install()?;
    let runner = TestRunnerBuilder::default()
        .set_grace_period(Duration::from_millis(200))
        .build(
            &RunConfig::package("./calc").with_working_dir(fake.dir()),
            &settings,
            SignalHandlerKind::Noop,
        )?;

    let started = std::time::Instant::now();
    let result = runner.try_execute(|event| match event.kind {
        ReporterEventKind::TestFinished { .. } => Err("stop"),
        _ => Ok(()),
    });

    assert_eq!(result.unwrap_err(), "stop");
    assert!(
        started.elapsed() < Duration::from_secs(10),
        "the subprocess was terminated instead of running to completion"
    );
    Ok(())
}

#[test]
fn reporter_renders_a_real_run() -> Result<()> {
    let fake = FakeGo::new()?.stdout(FAILING_STREAM).exit_code(1);
    let settings = fake.install()?;
    let runner = TestRunnerBuilder::default().build(
        &RunConfig::package("./calc").with_working_dir(fake.dir()),
        &settings,
        SignalHandlerKind::Noop,
    )?;

    let mut buf = Vec::new();
    let mut reporter = TestReporterBuilder::default().build(ReporterStderr::Buffer(&mut buf));
    let report = runner.try_execute(|event| reporter.report_event(event))?;
    drop(reporter);

    let output = String::from_utf8(buf)?;
    assert!(output.contains("FAIL [   0.010s] example.com/calc TestDiv"), "{output}");
    assert!(output.contains("--- OUTPUT: example.com/calc TestDiv ---"), "{output}");
    assert!(output.contains("1 test run across 1 package"), "{output}");
    assert_eq!(report.stats().failed, 1);
    Ok(())
}

#[test]
fn invalid_run_config_is_rejected_before_spawning() -> Result<()> {
    let fake = FakeGo::new()?;
    let settings = fake.install()?;
    let config = RunConfig {
        test_name: None,
        ..RunConfig::single("./calc", "TestDiv")
    };
    let err = TestRunnerBuilder::default()
        .build(&config, &settings, SignalHandlerKind::Noop)
        .unwrap_err();
    assert_eq!(err.to_string(), "invalid run configuration");
    assert!(fake.recorded_args().is_err(), "nothing was spawned");
    Ok(())
}

#[tokio::test]
async fn async_runner_on_the_callers_runtime() -> Result<()> {
    let fake = FakeGo::new()?
        .stderr("go: downloading example.com/dep v1.0.0\nfirst\nsecond\n")
        .exit_code(2);
    let settings = fake.install()?;
    let runner = TestRunnerBuilder::default()
        .set_stderr_tail_lines(2)
        .build_async(
            &RunConfig::all().with_working_dir(fake.dir()),
            &settings,
            SignalHandlerKind::Noop,
        )?;
    assert!(
        runner.command_line().ends_with(" test -json -v -count=1 ./..."),
        "{}",
        runner.command_line()
    );

    let mut finished = 0;
    let report = runner
        .execute(|event| {
            if let ReporterEventKind::RunFinished { .. } = event.kind {
                finished += 1;
            }
        })
        .await;

    assert_eq!(finished, 1);
    assert!(matches!(
        report.outcome,
        ExitOutcome::NonZeroExit { code: Some(2), .. }
    ));
    assert_eq!(report.packages.len(), 1);
    assert_eq!(
        report.packages[0].tests[0].output,
        ["`go test` exited with code 2", "stderr:", "first", "second"]
    );
    Ok(())
}

#[test]
fn second_signal_kills_without_waiting_for_the_grace_period() -> Result<()> {
    let fake = FakeGo::new()?
        .stdout(PASSING_STREAM)
        .ignore_sigterm()
        .sleep_before_exit(60.0);
    let settings = fake.install()?;
    let runner = TestRunnerBuilder::default()
        .set_grace_period(Duration::from_secs(60))
        .build(
            &RunConfig::package("./calc").with_working_dir(fake.dir()),
            &settings,
            SignalHandlerKind::Standard,
        )?;

    let started = std::time::Instant::now();
    let mut seen = Vec::new();
    let report = runner.execute(|event| {
        let raise = match event.kind {
            ReporterEventKind::PackageFinished { .. } => {
                seen.push("package-finished".to_owned());
                true
            }
            ReporterEventKind::RunBeginCancel { reason } => {
                seen.push(format!("cancel due to {}", reason.description()));
                true
            }
            ReporterEventKind::RunBeginKill { reason } => {
                seen.push(format!("kill due to {}", reason.description()));
                false
            }
            _ => false,
        };
        if raise {
            // The standard handler is installed, so this doesn't stop the test process.
            assert_eq!(unsafe { libc::raise(libc::SIGINT) }, 0);
        }
    });

    assert_eq!(
        seen,
        [
            "package-finished",
            "cancel due to interrupt",
            "kill due to interrupt"
        ]
    );
    assert!(report.cancelled);
    assert!(
        started.elapsed() < Duration::from_secs(30),
        "the process group was killed instead of waiting out the grace period"
    );
    Ok(())
}
