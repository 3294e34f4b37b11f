// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{dispatcher::DispatcherContext, executor::StreamingExecutor};
use crate::{
    config::RunSettings,
    errors::TestRunnerBuildError,
    reporter::ReporterEvent,
    results::RunReport,
    signal::{SignalHandler, SignalHandlerKind},
    stopwatch::stopwatch,
    test_command::RunConfig,
};
use std::{convert::Infallible, time::Duration};
use tokio::runtime::Runtime;

/// Test runner options.
#[derive(Debug, Default)]
pub struct TestRunnerBuilder {
    grace_period: Option<Duration>,
    stderr_tail_lines: Option<usize>,
}

impl TestRunnerBuilder {
    /// Sets how long `go test` gets to exit after a cancellation before it is killed.
    pub fn set_grace_period(&mut self, grace_period: Duration) -> &mut Self {
        self.grace_period = Some(grace_period);
        self
    }

    /// Sets how many trailing stderr lines are kept for error reporting.
    pub fn set_stderr_tail_lines(&mut self, lines: usize) -> &mut Self {
        self.stderr_tail_lines = Some(lines);
        self
    }

    /// Creates a new test runner with its own Tokio runtime.
    ///
    /// The run configuration is validated here, before anything is spawned.
    pub fn build(
        &self,
        config: &RunConfig,
        settings: &RunSettings,
        signal_handler: SignalHandlerKind,
    ) -> Result<TestRunner, TestRunnerBuildError> {
        let inner = self.build_inner(config, settings)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("gdd-runner-worker")
            .build()
            .map_err(TestRunnerBuildError::TokioRuntimeCreate)?;
        let _guard = runtime.enter();

        // signal_handler.build() must be called from within the guard.
        let signal_handler = signal_handler.build()?;

        Ok(TestRunner {
            inner,
            signal_handler,
            runtime,
        })
    }

    /// Creates a new test runner that runs on the caller's Tokio runtime.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build_async(
        &self,
        config: &RunConfig,
        settings: &RunSettings,
        signal_handler: SignalHandlerKind,
    ) -> Result<AsyncTestRunner, TestRunnerBuildError> {
        let inner = self.build_inner(config, settings)?;
        let signal_handler = signal_handler.build()?;
        Ok(AsyncTestRunner {
            inner,
            signal_handler,
        })
    }

    fn build_inner(
        &self,
        config: &RunConfig,
        settings: &RunSettings,
    ) -> Result<TestRunnerInner, TestRunnerBuildError> {
        let mut executor = StreamingExecutor::new(config, settings)?;
        if let Some(grace_period) = self.grace_period {
            executor = executor.with_grace_period(grace_period);
        }
        if let Some(lines) = self.stderr_tail_lines {
            executor = executor.with_stderr_tail_lines(lines);
        }
        Ok(TestRunnerInner {
            executor,
            scope_description: config.scope_description(),
        })
    }
}

/// Context for a single `go test` run.
///
/// Created using [`TestRunnerBuilder::build`].
#[derive(Debug)]
pub struct TestRunner {
    inner: TestRunnerInner,
    signal_handler: SignalHandler,
    runtime: Runtime,
}

impl TestRunner {
    /// Returns the shell-quoted command that will be run.
    pub fn command_line(&self) -> String {
        self.inner.executor.command().command_line()
    }

    /// Runs `go test`, calling the callback with progress as it happens.
    pub fn execute<F>(self, mut callback: F) -> RunReport
    where
        F: FnMut(ReporterEvent<'_>),
    {
        match self.try_execute::<Infallible, _>(|event| {
            callback(event);
            Ok(())
        }) {
            Ok(report) => report,
            Err(never) => match never {},
        }
    }

    /// Runs `go test`, calling the callback with progress as it happens.
    ///
    /// If the callback returns an error, the run is cancelled, the callback is no longer called,
    /// and the first error is returned once the subprocess has exited.
    pub fn try_execute<E, F>(mut self, callback: F) -> Result<RunReport, E>
    where
        F: FnMut(ReporterEvent<'_>) -> Result<(), E>,
    {
        let Self {
            inner,
            signal_handler,
            runtime,
        } = &mut self;
        runtime.block_on(inner.execute(signal_handler, callback))
    }
}

/// Like [`TestRunner`], but runs on the caller's Tokio runtime.
///
/// Created using [`TestRunnerBuilder::build_async`].
#[derive(Debug)]
pub struct AsyncTestRunner {
    inner: TestRunnerInner,
    signal_handler: SignalHandler,
}

impl AsyncTestRunner {
    /// Returns the shell-quoted command that will be run.
    pub fn command_line(&self) -> String {
        self.inner.executor.command().command_line()
    }

    /// Runs `go test`, calling the callback with progress as it happens.
    pub async fn execute<F>(self, mut callback: F) -> RunReport
    where
        F: FnMut(ReporterEvent<'_>),
    {
        match self
            .try_execute::<Infallible, _>(|event| {
                callback(event);
                Ok(())
            })
            .await
        {
            Ok(report) => report,
            Err(never) => match never {},
        }
    }

    /// Runs `go test`, calling the callback with progress as it happens.
    ///
    /// See [`TestRunner::try_execute`].
    pub async fn try_execute<E, F>(mut self, callback: F) -> Result<RunReport, E>
    where
        F: FnMut(ReporterEvent<'_>) -> Result<(), E>,
    {
        self.inner
            .execute(&mut self.signal_handler, callback)
            .await
    }
}

#[derive(Debug)]
struct TestRunnerInner {
    executor: StreamingExecutor,
    scope_description: String,
}

impl TestRunnerInner {
    async fn execute<E, F>(
        &self,
        signal_handler: &mut SignalHandler,
        callback: F,
    ) -> Result<RunReport, E>
    where
        F: FnMut(ReporterEvent<'_>) -> Result<(), E>,
    {
        let stopwatch = stopwatch();
        let command_line = self.executor.command().command_line();
        let stream = self.executor.clone().start();

        let dispatcher =
            DispatcherContext::new(callback, &stopwatch, &self.scope_description, &command_line);
        dispatcher.run(stream, signal_handler).await
    }
}
