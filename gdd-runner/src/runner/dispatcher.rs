// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The consumer side of a run.
//!
//! The dispatcher pulls messages from the executor one at a time, decodes and aggregates them, and
//! forwards progress to the reporter callback. It is the only owner of the aggregator.

use super::executor::{ExecutorEvent, ExitOutcome, RunComplete, RunStream};
use crate::{
    decoder::EventDecoder,
    reporter::{AggregateEvent, ReporterEvent, ReporterEventKind, ResultAggregator},
    results::{RunReport, RunStats},
    signal::{ShutdownEvent, SignalHandler},
    stopwatch::StopwatchStart,
};
use tracing::{debug, warn};

pub(super) struct DispatcherContext<'a, F, E> {
    callback: F,
    callback_error: Option<E>,
    stopwatch: &'a StopwatchStart,
    scope_description: &'a str,
    command_line: &'a str,
    decoder: EventDecoder,
    aggregator: ResultAggregator,
    stats: RunStats,
    cancel_requested: bool,
    kill_requested: bool,
}

impl<'a, F, E> DispatcherContext<'a, F, E>
where
    F: FnMut(ReporterEvent<'_>) -> Result<(), E>,
{
    pub(super) fn new(
        callback: F,
        stopwatch: &'a StopwatchStart,
        scope_description: &'a str,
        command_line: &'a str,
    ) -> Self {
        Self {
            callback,
            callback_error: None,
            stopwatch,
            scope_description,
            command_line,
            decoder: EventDecoder::new(),
            aggregator: ResultAggregator::new(),
            stats: RunStats::default(),
            cancel_requested: false,
            kill_requested: false,
        }
    }

    /// Drives the run to completion, returning the report, or the first error returned by the
    /// callback. A callback error cancels the run.
    pub(super) async fn run(
        mut self,
        mut stream: RunStream,
        signal_handler: &mut SignalHandler,
    ) -> Result<RunReport, E> {
        self.emit(ReporterEventKind::RunStarted {
            scope_description: self.scope_description,
            command_line: self.command_line,
        });

        let completion = loop {
            if self.callback_error.is_some() && !self.cancel_requested {
                self.cancel_requested = true;
                stream.cancel();
            }

            tokio::select! {
                event = stream.recv() => match event {
                    Some(ExecutorEvent::LineProduced { line }) => self.handle_line(&line),
                    Some(ExecutorEvent::RunComplete(complete)) => break complete,
                    None => {
                        warn!("executor channel closed without a completion message");
                        break RunComplete {
                            outcome: ExitOutcome::ExecutorTerminated,
                            cancelled: self.cancel_requested,
                            stderr_tail: Vec::new(),
                        };
                    }
                },
                Some(reason) = signal_handler.recv(), if !self.kill_requested => {
                    self.handle_signal(reason, &mut stream);
                }
            }
        };
        stream.join().await;

        for event in self.aggregator.sweep_incomplete() {
            self.forward(event);
        }

        let cancelled = completion.cancelled || self.cancel_requested;
        let results = self.aggregator.finish(
            &completion.outcome,
            cancelled,
            &completion.stderr_tail,
        );
        let snapshot = self.stopwatch.snapshot();
        let report = RunReport {
            scope_description: self.scope_description.to_owned(),
            command_line: self.command_line.to_owned(),
            start_time: snapshot.start_time.fixed_offset(),
            wall_clock: snapshot.duration,
            outcome: completion.outcome,
            cancelled,
            packages: results.packages,
            diagnostics: results.diagnostics,
        };

        // The aggregator has been consumed; emit directly.
        let event = ReporterEvent {
            timestamp: snapshot.end_time().fixed_offset(),
            elapsed: snapshot.duration,
            kind: ReporterEventKind::RunFinished { report: &report },
        };
        if self.callback_error.is_none() {
            if let Err(error) = (self.callback)(event) {
                self.callback_error = Some(error);
            }
        }

        match self.callback_error {
            Some(error) => Err(error),
            None => Ok(report),
        }
    }

    /// The first shutdown signal cancels the run gracefully. Any signal after that, including one
    /// that arrives while a callback error is cancelling the run, kills `go test` outright.
    fn handle_signal(&mut self, reason: ShutdownEvent, stream: &mut RunStream) {
        if self.cancel_requested {
            warn!(
                "received {} signal during cancellation, killing go test",
                reason.description()
            );
            self.kill_requested = true;
            stream.kill();
            self.emit(ReporterEventKind::RunBeginKill { reason });
        } else {
            debug!("received {} signal, cancelling run", reason.description());
            self.cancel_requested = true;
            stream.cancel();
            self.emit(ReporterEventKind::RunBeginCancel { reason });
        }
    }

    fn handle_line(&mut self, line: &str) {
        match self.decoder.decode(line) {
            Ok(Some(event)) => {
                for event in self.aggregator.handle_event(event) {
                    self.forward(event);
                }
            }
            Ok(None) => {}
            Err(error) => self.aggregator.handle_decode_error(&error),
        }
    }

    fn forward(&mut self, event: AggregateEvent) {
        match event {
            AggregateEvent::TestStarted { package, name } => {
                let running = self.aggregator.running_count();
                self.emit(ReporterEventKind::TestStarted {
                    package: &package,
                    name: &name,
                    running,
                });
            }
            AggregateEvent::TestFinished { record } => {
                self.stats.record(&record);
                let running = self.aggregator.running_count();
                let current_stats = self.stats;
                self.emit(ReporterEventKind::TestFinished {
                    record: &record,
                    running,
                    current_stats,
                });
            }
            AggregateEvent::PackageFinished {
                package,
                status,
                duration,
                test_count,
            } => {
                self.emit(ReporterEventKind::PackageFinished {
                    package: &package,
                    status,
                    duration,
                    test_count,
                });
            }
        }
    }

    fn emit(&mut self, kind: ReporterEventKind<'_>) {
        if self.callback_error.is_some() {
            return;
        }
        let snapshot = self.stopwatch.snapshot();
        let event = ReporterEvent {
            timestamp: snapshot.end_time().fixed_offset(),
            elapsed: snapshot.duration,
            kind,
        };
        if let Err(error) = (self.callback)(event) {
            self.callback_error = Some(error);
        }
    }
}
