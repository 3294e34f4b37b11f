// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{io, process::ExitStatus, time::Duration};
use tokio::process::Child;
use tracing::debug;

pub(super) fn set_process_group(_cmd: &mut std::process::Command) {}

/// Windows has no graceful termination for console processes, so the child is killed right away.
pub(super) async fn terminate_child(
    child: &mut Child,
    _grace_period: Duration,
    _kill_requested: impl Future<Output = ()>,
) -> io::Result<ExitStatus> {
    if let Err(err) = child.start_kill() {
        debug!("failed to kill child process: {err}");
    }
    child.wait().await
}

pub(super) fn describe_exit_status(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exited with code {code}"),
        None => "exited with an unknown status".to_owned(),
    }
}
