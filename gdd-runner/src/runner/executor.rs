// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runs `go test` and streams its output.
//!
//! The [`StreamingExecutor`] spawns the subprocess on a background task, with separate tasks
//! reading stdout and stderr. Each stdout line is sent to the consumer as soon as it's read, over a
//! channel with room for a single message, so memory use is bounded by how far the consumer lags.

use super::os;
use crate::{
    config::RunSettings,
    errors::{DisplayErrorChain, LaunchError, RunConfigError},
    test_command::{GoTestCommand, RunConfig},
};
use serde::{Serialize, Serializer};
use std::{collections::VecDeque, future, process::ExitStatus, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{ChildStderr, ChildStdout},
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

/// A message from the executor to its consumer.
#[derive(Clone, Debug)]
pub enum ExecutorEvent {
    /// A line was written to stdout. The trailing newline is removed.
    LineProduced {
        /// The line, with invalid UTF-8 replaced.
        line: String,
    },

    /// The run finished. This is always the last message.
    RunComplete(RunComplete),
}

/// How a run finished.
#[derive(Clone, Debug)]
pub struct RunComplete {
    /// How the subprocess exited.
    pub outcome: ExitOutcome,

    /// Whether the run was cancelled before the subprocess exited on its own.
    pub cancelled: bool,

    /// The last lines written to stderr.
    pub stderr_tail: Vec<String>,
}

/// The exit outcome of the subprocess.
#[derive(Clone, Debug)]
pub enum ExitOutcome {
    /// The subprocess exited with status 0.
    Success,

    /// The subprocess exited unsuccessfully. For `go test`, this is expected when tests fail.
    NonZeroExit {
        /// The exit code, if the process exited normally.
        code: Option<i32>,

        /// A description of how the process exited, for example `exited with code 1`.
        description: String,
    },

    /// The subprocess could not be started, or could not be waited on.
    LaunchFailed(LaunchError),

    /// The executor went away without reporting an outcome.
    ExecutorTerminated,
}

impl ExitOutcome {
    pub(crate) fn from_exit_status(status: ExitStatus) -> Self {
        if status.success() {
            Self::Success
        } else {
            Self::NonZeroExit {
                code: status.code(),
                description: os::describe_exit_status(status),
            }
        }
    }

    /// Whether the subprocess exited successfully.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// A description of the outcome, phrased to follow the name of the command.
    pub fn description(&self) -> String {
        match self {
            Self::Success => "exited successfully".to_owned(),
            Self::NonZeroExit { description, .. } => description.clone(),
            Self::LaunchFailed(error) => {
                format!("could not be run: {}", DisplayErrorChain::new(error))
            }
            Self::ExecutorTerminated => "executor terminated unexpectedly".to_owned(),
        }
    }
}

impl Serialize for ExitOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        #[serde(tag = "kind", rename_all = "kebab-case")]
        enum Repr<'a> {
            Success,
            NonZeroExit {
                code: Option<i32>,
                description: &'a str,
            },
            LaunchFailed {
                error: String,
            },
            ExecutorTerminated,
        }

        let repr = match self {
            Self::Success => Repr::Success,
            Self::NonZeroExit { code, description } => Repr::NonZeroExit {
                code: *code,
                description,
            },
            Self::LaunchFailed(error) => Repr::LaunchFailed {
                error: DisplayErrorChain::new(error).to_string(),
            },
            Self::ExecutorTerminated => Repr::ExecutorTerminated,
        };
        repr.serialize(serializer)
    }
}

/// How urgently a run should stop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum CancelRequest {
    /// Ask the subprocess to exit, and kill it if it hasn't after the grace period.
    Graceful,

    /// Kill the subprocess right away.
    Kill,
}

/// Launches `go test` and streams its output.
#[derive(Clone, Debug)]
pub struct StreamingExecutor {
    command: GoTestCommand,
    grace_period: Duration,
    stderr_tail_lines: usize,
}

impl StreamingExecutor {
    /// How long the subprocess gets to exit after SIGTERM before it is killed.
    pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

    /// How many trailing stderr lines are kept for error reporting.
    pub const DEFAULT_STDERR_TAIL_LINES: usize = 50;

    /// Validates the run config and prepares an executor for it.
    pub fn new(config: &RunConfig, settings: &RunSettings) -> Result<Self, RunConfigError> {
        GoTestCommand::new(config, settings).map(Self::from_command)
    }

    /// Creates an executor for an already-built command.
    pub fn from_command(command: GoTestCommand) -> Self {
        Self {
            command,
            grace_period: Self::DEFAULT_GRACE_PERIOD,
            stderr_tail_lines: Self::DEFAULT_STDERR_TAIL_LINES,
        }
    }

    /// Sets the grace period between SIGTERM and SIGKILL on cancellation.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Sets the number of trailing stderr lines to keep.
    pub fn with_stderr_tail_lines(mut self, lines: usize) -> Self {
        self.stderr_tail_lines = lines;
        self
    }

    /// Returns the command that will be run.
    pub fn command(&self) -> &GoTestCommand {
        &self.command
    }

    /// Spawns the subprocess on a background task and returns the stream of its events.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self) -> RunStream {
        let (sender, receiver) = mpsc::channel(1);
        let (cancel_sender, cancel_receiver) = watch::channel(None);
        let handle = tokio::spawn(self.run(sender, cancel_receiver));
        RunStream {
            receiver,
            cancel_sender,
            handle,
        }
    }

    async fn run(
        self,
        sender: mpsc::Sender<ExecutorEvent>,
        mut cancel_receiver: watch::Receiver<Option<CancelRequest>>,
    ) {
        let command_line = self.command.command_line();
        let mut std_cmd = self.command.to_std_command();
        os::set_process_group(&mut std_cmd);
        let mut cmd = tokio::process::Command::from(std_cmd);
        cmd.kill_on_drop(true);

        info!("running `{command_line}` in {}", self.command.cwd());
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                let error = LaunchError::Spawn {
                    command: command_line,
                    err: Arc::new(err),
                };
                send_complete(&sender, ExitOutcome::LaunchFailed(error), false, Vec::new()).await;
                return;
            }
        };

        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            (stdout, _) => {
                let stream = if stdout.is_none() { "stdout" } else { "stderr" };
                if let Err(err) =
                    os::terminate_child(&mut child, Duration::ZERO, future::pending()).await
                {
                    debug!("failed to reap child after pipe setup failure: {err}");
                }
                let error = LaunchError::PipeSetup {
                    command: command_line,
                    stream,
                };
                send_complete(&sender, ExitOutcome::LaunchFailed(error), false, Vec::new()).await;
                return;
            }
        };

        let stdout_task = tokio::spawn(read_stdout(stdout, sender.clone()));
        let stderr_task = tokio::spawn(read_stderr(stderr, self.stderr_tail_lines));

        let mut cancelled = false;
        let status = tokio::select! {
            status = child.wait() => status,
            request = cancel_requested(&mut cancel_receiver) => {
                info!("cancelling `{command_line}` ({request:?})");
                cancelled = true;
                let grace_period = match request {
                    CancelRequest::Graceful => self.grace_period,
                    CancelRequest::Kill => Duration::ZERO,
                };
                os::terminate_child(
                    &mut child,
                    grace_period,
                    kill_requested(&mut cancel_receiver),
                )
                .await
            }
            () = sender.closed() => {
                debug!("consumer went away, cancelling `{command_line}`");
                cancelled = true;
                os::terminate_child(
                    &mut child,
                    self.grace_period,
                    kill_requested(&mut cancel_receiver),
                )
                .await
            }
        };

        let lines = match stdout_task.await {
            Ok(lines) => lines,
            Err(err) => {
                warn!("stdout reader for `{command_line}` panicked: {err}");
                0
            }
        };
        let stderr_tail = match stderr_task.await {
            Ok(tail) => tail,
            Err(err) => {
                warn!("stderr reader for `{command_line}` panicked: {err}");
                Vec::new()
            }
        };

        let outcome = match status {
            Ok(status) => ExitOutcome::from_exit_status(status),
            Err(err) => ExitOutcome::LaunchFailed(LaunchError::Wait {
                command: command_line,
                err: Arc::new(err),
            }),
        };
        debug!(
            "subprocess finished after {lines} stdout lines: {}",
            outcome.description()
        );
        send_complete(&sender, outcome, cancelled, stderr_tail).await;
    }
}

async fn send_complete(
    sender: &mpsc::Sender<ExecutorEvent>,
    outcome: ExitOutcome,
    cancelled: bool,
    stderr_tail: Vec<String>,
) {
    let complete = RunComplete {
        outcome,
        cancelled,
        stderr_tail,
    };
    if sender
        .send(ExecutorEvent::RunComplete(complete))
        .await
        .is_err()
    {
        debug!("consumer went away before the run completed");
    }
}

/// Waits for a cancellation request. A dropped [`RunStream`] counts as a graceful one.
async fn cancel_requested(receiver: &mut watch::Receiver<Option<CancelRequest>>) -> CancelRequest {
    loop {
        if let Some(request) = *receiver.borrow_and_update() {
            return request;
        }
        if receiver.changed().await.is_err() {
            return CancelRequest::Graceful;
        }
    }
}

/// Waits for a request to kill the subprocess right away. Never completes once the stream is gone.
async fn kill_requested(receiver: &mut watch::Receiver<Option<CancelRequest>>) {
    loop {
        if *receiver.borrow_and_update() == Some(CancelRequest::Kill) {
            return;
        }
        if receiver.changed().await.is_err() {
            return future::pending().await;
        }
    }
}

/// Reads lines, replacing invalid UTF-8, and calls `f` with each one until EOF or until `f` returns
/// false. Returns the number of lines read.
async fn for_each_line<R, F, Fut>(reader: R, stream: &str, mut f: F) -> usize
where
    R: AsyncRead + Unpin,
    F: FnMut(String) -> Fut,
    Fut: Future<Output = bool>,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut count = 0;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                count += 1;
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']).to_owned();
                if !f(line).await {
                    break;
                }
            }
            Err(err) => {
                warn!("error reading {stream} of go test: {err}");
                break;
            }
        }
    }
    count
}

async fn read_stdout(stdout: ChildStdout, sender: mpsc::Sender<ExecutorEvent>) -> usize {
    let sender = &sender;
    for_each_line(stdout, "stdout", move |line| async move {
        sender
            .send(ExecutorEvent::LineProduced { line })
            .await
            .is_ok()
    })
    .await
}

async fn read_stderr(stderr: ChildStderr, tail_lines: usize) -> Vec<String> {
    let mut tail = VecDeque::with_capacity(tail_lines);
    for_each_line(stderr, "stderr", |line| {
        warn!(target: "gdd_runner::go_test_stderr", "{line}");
        tail.push_back(line);
        while tail.len() > tail_lines {
            tail.pop_front();
        }
        std::future::ready(true)
    })
    .await;
    tail.into()
}

/// The consumer's end of a run.
///
/// Dropping the stream cancels the run.
#[derive(Debug)]
pub struct RunStream {
    receiver: mpsc::Receiver<ExecutorEvent>,
    cancel_sender: watch::Sender<Option<CancelRequest>>,
    handle: JoinHandle<()>,
}

impl RunStream {
    /// Receives the next event, or `None` once the executor is done.
    ///
    /// A well-behaved executor always sends [`ExecutorEvent::RunComplete`] before closing the
    /// channel.
    pub async fn recv(&mut self) -> Option<ExecutorEvent> {
        self.receiver.recv().await
    }

    /// Requests cancellation. The subprocess is terminated, and the stream still ends with a
    /// [`ExecutorEvent::RunComplete`] message.
    ///
    /// Calling this more than once has no further effect.
    pub fn cancel(&mut self) {
        self.request(CancelRequest::Graceful);
    }

    /// Requests that the subprocess be killed without waiting for the grace period, including
    /// during a graceful cancellation that is already underway.
    pub fn kill(&mut self) {
        self.request(CancelRequest::Kill);
    }

    fn request(&mut self, request: CancelRequest) {
        // Requests only ever escalate. The worker may already have finished, in which case there
        // are no receivers and this is a no-op.
        self.cancel_sender.send_if_modified(|current| {
            if current.is_some_and(|existing| existing >= request) {
                false
            } else {
                *current = Some(request);
                true
            }
        });
    }

    /// Waits for the background task to finish. A run that is still in progress is cancelled.
    pub async fn join(self) {
        let Self {
            receiver, handle, ..
        } = self;
        // Closing the receiver lets a worker blocked on sending finish.
        drop(receiver);
        if let Err(err) = handle.await {
            warn!("executor task failed: {err}");
        }
    }
}
