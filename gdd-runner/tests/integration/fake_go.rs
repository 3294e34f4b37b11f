// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A stand-in for the `go` binary: a shell script that replays a recorded `go test -json` stream.

use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use color_eyre::eyre::{Result, WrapErr};
use gdd_runner::config::RunSettings;
use std::{fs, os::unix::fs::PermissionsExt};
use swrite::{SWrite, swriteln};

pub(crate) struct FakeGo {
    dir: Utf8TempDir,
    stdout: String,
    stderr: String,
    sleep_before_exit: Option<f64>,
    ignore_sigterm: bool,
    exit_code: i32,
}

impl FakeGo {
    pub(crate) fn new() -> Result<Self> {
        Ok(Self {
            dir: Utf8TempDir::with_prefix("gdd-fake-go-")?,
            stdout: String::new(),
            stderr: String::new(),
            sleep_before_exit: None,
            ignore_sigterm: false,
            exit_code: 0,
        })
    }

    pub(crate) fn stdout(mut self, stream: &str) -> Self {
        self.stdout = stream.to_owned();
        self
    }

    pub(crate) fn stderr(mut self, text: &str) -> Self {
        self.stderr = text.to_owned();
        self
    }

    pub(crate) fn sleep_before_exit(mut self, secs: f64) -> Self {
        self.sleep_before_exit = Some(secs);
        self
    }

    /// Makes the script and everything it runs ignore SIGTERM, so that only SIGKILL stops it.
    pub(crate) fn ignore_sigterm(mut self) -> Self {
        self.ignore_sigterm = true;
        self
    }

    pub(crate) fn exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    /// Writes the script out and returns settings that invoke it.
    pub(crate) fn install(&self) -> Result<RunSettings> {
        let stdout_path = self.dir.path().join("stdout.jsonl");
        fs::write(&stdout_path, &self.stdout).wrap_err("writing recorded stdout")?;
        let stderr_path = self.dir.path().join("stderr.txt");
        fs::write(&stderr_path, &self.stderr).wrap_err("writing recorded stderr")?;

        let mut script = String::from("#!/bin/sh\n");
        if self.ignore_sigterm {
            script.push_str("trap '' TERM\n");
        }
        swriteln!(script, "echo $$ > '{}'", self.pid_path());
        swriteln!(script, "printf '%s\\n' \"$*\" > '{}'", self.args_path());
        swriteln!(script, "cat '{stdout_path}'");
        swriteln!(script, "cat '{stderr_path}' >&2");
        if let Some(secs) = self.sleep_before_exit {
            swriteln!(script, "sleep {secs}");
        }
        swriteln!(script, "exit {}", self.exit_code);

        let script_path = self.dir.path().join("go");
        fs::write(&script_path, script).wrap_err("writing fake go script")?;
        fs::set_permissions(&script_path, fs::Permissions::from_mode(0o755))?;

        Ok(RunSettings {
            go_binary: script_path.into_string(),
            ..RunSettings::default()
        })
    }

    /// The directory the fake binary lives in, used as the working directory for runs.
    pub(crate) fn dir(&self) -> &Utf8Path {
        self.dir.path()
    }

    /// The arguments the script was last invoked with, space-separated.
    pub(crate) fn recorded_args(&self) -> Result<String> {
        let args = fs::read_to_string(self.args_path()).wrap_err("reading recorded args")?;
        Ok(args.trim_end().to_owned())
    }

    /// The process ID of the script's last invocation.
    pub(crate) fn recorded_pid(&self) -> Result<i32> {
        let pid = fs::read_to_string(self.pid_path()).wrap_err("reading recorded pid")?;
        pid.trim().parse().wrap_err("parsing recorded pid")
    }

    fn pid_path(&self) -> Utf8PathBuf {
        self.dir.path().join("pid.txt")
    }

    fn args_path(&self) -> Utf8PathBuf {
        self.dir.path().join("args.txt")
    }
}
