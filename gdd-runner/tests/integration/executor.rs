// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cancellation at the executor level, without the dispatcher in between.

use crate::{PASSING_STREAM, fake_go::FakeGo};
use color_eyre::eyre::{Result, bail};
use gdd_runner::{
    runner::{ExecutorEvent, ExitOutcome, RunStream, StreamingExecutor},
    test_command::RunConfig,
};
use std::time::{Duration, Instant};

fn start(fake: &FakeGo) -> Result<RunStream> {
    let settings = fake.install()?;
    let executor = StreamingExecutor::new(
        &RunConfig::package("./calc").with_working_dir(fake.dir()),
        &settings,
    )?
    .with_grace_period(Duration::from_millis(200));
    Ok(executor.start())
}

async fn first_line(stream: &mut RunStream) -> Result<String> {
    match stream.recv().await {
        Some(ExecutorEvent::LineProduced { line }) => Ok(line),
        other => bail!("expected a line, got {other:?}"),
    }
}

fn is_alive(pid: i32) -> bool {
    // Signal 0 only checks that the process exists.
    unsafe { libc::kill(pid, 0) == 0 }
}

#[tokio::test]
async fn cancel_terminates_and_still_completes() -> Result<()> {
    let fake = FakeGo::new()?.stdout(PASSING_STREAM).sleep_before_exit(30.0);
    let mut stream = start(&fake)?;
    first_line(&mut stream).await?;

    let started = Instant::now();
    stream.cancel();
    // Cancelling twice is harmless.
    stream.cancel();

    let complete = loop {
        match stream.recv().await {
            Some(ExecutorEvent::LineProduced { .. }) => {}
            Some(ExecutorEvent::RunComplete(complete)) => break complete,
            None => bail!("stream closed without a completion message"),
        }
    };
    assert!(complete.cancelled);
    assert!(
        matches!(complete.outcome, ExitOutcome::NonZeroExit { code: None, .. }),
        "terminated by a signal: {:?}",
        complete.outcome
    );
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(stream.recv().await.is_none(), "nothing follows completion");

    stream.join().await;
    Ok(())
}

#[tokio::test]
async fn dropping_the_stream_kills_the_subprocess() -> Result<()> {
    let fake = FakeGo::new()?.stdout(PASSING_STREAM).sleep_before_exit(30.0);
    let mut stream = start(&fake)?;
    first_line(&mut stream).await?;

    let pid = fake.recorded_pid()?;
    assert!(is_alive(pid), "the script is still sleeping");
    drop(stream);

    let deadline = Instant::now() + Duration::from_secs(10);
    while is_alive(pid) {
        if Instant::now() > deadline {
            bail!("process {pid} outlived its stream");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    Ok(())
}
