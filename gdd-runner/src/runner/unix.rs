// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use libc::{SIGKILL, SIGTERM};
use std::{
    io,
    os::unix::process::{CommandExt, ExitStatusExt},
    process::ExitStatus,
    time::Duration,
};
use tokio::process::Child;
use tracing::debug;

/// Puts the child in its own process group, so that the test binaries `go test` spawns can be
/// signalled along with it.
pub(super) fn set_process_group(cmd: &mut std::process::Command) {
    cmd.process_group(0);
}

/// Sends SIGTERM to the child's process group, then SIGKILL once the grace period is over or
/// `kill_requested` completes, whichever comes first. Always reaps the child.
pub(super) async fn terminate_child(
    child: &mut Child,
    grace_period: Duration,
    kill_requested: impl Future<Output = ()>,
) -> io::Result<ExitStatus> {
    let Some(pid) = child.id().and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        // Already exited.
        return child.wait().await;
    };

    // A negative pid addresses the whole process group.
    unsafe { libc::kill(-pid, SIGTERM) };

    let reason = tokio::select! {
        status = child.wait() => return status,
        () = tokio::time::sleep(grace_period) => "still running after the grace period",
        () = kill_requested => "asked to be killed",
    };
    debug!("process group {pid} {reason}, sending SIGKILL");
    unsafe { libc::kill(-pid, SIGKILL) };
    child.wait().await
}

pub(super) fn describe_exit_status(status: ExitStatus) -> String {
    match (status.code(), status.signal()) {
        (Some(code), _) => format!("exited with code {code}"),
        (None, Some(signal)) => format!("was terminated by signal {signal}"),
        (None, None) => "exited with an unknown status".to_owned(),
    }
}
