// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Building the `go test` invocation for a run.

use crate::{config::RunSettings, errors::RunConfigError};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use std::{fmt, process::Stdio};
use tracing::warn;

/// The breadth of a test run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunScope {
    /// A single test function within its package.
    Single,

    /// All tests within one package.
    Package,

    /// Every package in the project, recursively.
    All,
}

impl fmt::Display for RunScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => write!(f, "single-test"),
            Self::Package => write!(f, "package"),
            Self::All => write!(f, "all"),
        }
    }
}

/// Describes what a run should execute.
///
/// `All` ignores the target path. `Package` requires a target path, and `Single` requires both a
/// target path and a test name; [`RunConfig::validate`] checks this before anything is spawned.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunConfig {
    /// The scope of the run.
    pub scope: RunScope,

    /// The package path, relative to the working directory (for example `./internal/store`).
    pub target_path: Option<String>,

    /// The test function to run, for `Single` scope.
    pub test_name: Option<String>,

    /// The directory `go test` is executed from: usually the module root.
    pub working_dir: Option<Utf8PathBuf>,
}

impl RunConfig {
    /// A run over every package in the project.
    pub fn all() -> Self {
        Self {
            scope: RunScope::All,
            target_path: None,
            test_name: None,
            working_dir: None,
        }
    }

    /// A run over all tests in one package.
    pub fn package(target_path: impl Into<String>) -> Self {
        Self {
            scope: RunScope::Package,
            target_path: Some(target_path.into()),
            test_name: None,
            working_dir: None,
        }
    }

    /// A run of a single test function.
    pub fn single(target_path: impl Into<String>, test_name: impl Into<String>) -> Self {
        Self {
            scope: RunScope::Single,
            target_path: Some(target_path.into()),
            test_name: Some(test_name.into()),
            working_dir: None,
        }
    }

    /// Sets the working directory.
    pub fn with_working_dir(mut self, working_dir: impl Into<Utf8PathBuf>) -> Self {
        self.working_dir = Some(working_dir.into());
        self
    }

    /// Checks that the fields required by the scope are present.
    pub fn validate(&self) -> Result<(), RunConfigError> {
        match self.scope {
            RunScope::Single => {
                self.required_target_path()?;
                self.required_test_name()?;
            }
            RunScope::Package => {
                self.required_target_path()?;
            }
            RunScope::All => {}
        }
        Ok(())
    }

    /// A human-readable description of what this run covers.
    pub fn scope_description(&self) -> String {
        match self.scope {
            RunScope::All => "all project tests".to_owned(),
            RunScope::Package => {
                format!("package {}", self.target_path.as_deref().unwrap_or_default())
            }
            RunScope::Single => format!(
                "test {} (in {})",
                self.test_name.as_deref().unwrap_or_default(),
                self.target_path.as_deref().unwrap_or_default(),
            ),
        }
    }

    fn required_target_path(&self) -> Result<&str, RunConfigError> {
        match self.target_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Ok(path),
            _ => Err(RunConfigError::MissingTargetPath { scope: self.scope }),
        }
    }

    fn required_test_name(&self) -> Result<&str, RunConfigError> {
        match self.test_name.as_deref() {
            Some(name) if !name.trim().is_empty() => Ok(name),
            _ => Err(RunConfigError::MissingTestName { scope: self.scope }),
        }
    }
}

/// A validated, ready-to-spawn `go test` command.
#[derive(Clone, Debug)]
pub struct GoTestCommand {
    program: String,
    args: Vec<String>,
    cwd: Utf8PathBuf,
    env: Vec<(String, String)>,
}

impl GoTestCommand {
    /// Flags passed to every invocation: JSON events, verbose mode so that pass and skip events
    /// are reported for every test, and `-count=1` to bypass the test cache.
    pub const BASE_ARGS: &'static [&'static str] = &["test", "-json", "-v", "-count=1"];

    /// Validates the run config and builds the command line for it.
    pub fn new(config: &RunConfig, settings: &RunSettings) -> Result<Self, RunConfigError> {
        config.validate()?;

        let mut args: Vec<String> = Self::BASE_ARGS.iter().map(|&s| s.to_owned()).collect();
        if settings.short {
            args.push("-short".to_owned());
        }
        if settings.race {
            args.push("-race".to_owned());
        }
        if let Some(timeout) = settings.timeout {
            args.push(format!("-timeout={}ms", timeout.as_millis()));
        }
        args.extend(settings.extra_args.iter().cloned());

        match config.scope {
            RunScope::Single => {
                let target_path = config.required_target_path()?;
                let test_name = config.required_test_name()?;
                args.push(target_path.to_owned());
                args.push("-run".to_owned());
                args.push(format!("^{}$", regex::escape(test_name)));
            }
            RunScope::Package => {
                args.push(config.required_target_path()?.to_owned());
            }
            RunScope::All => {
                args.push("./...".to_owned());
            }
        }

        let cwd = match &config.working_dir {
            Some(dir) => dir.clone(),
            None => {
                warn!("working directory not specified, defaulting to `.`");
                Utf8PathBuf::from(".")
            }
        };

        let mut env: Vec<_> = settings
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.sort();

        Ok(Self {
            program: settings.go_binary.clone(),
            args,
            cwd,
            env,
        })
    }

    /// The program to run.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// The arguments passed to the program.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The working directory of the subprocess.
    pub fn cwd(&self) -> &Utf8Path {
        &self.cwd
    }

    /// The full command line, shell-quoted, for display purposes.
    pub fn command_line(&self) -> String {
        shell_words::join(
            std::iter::once(self.program.as_str()).chain(self.args.iter().map(|s| s.as_str())),
        )
    }

    pub(crate) fn to_std_command(&self) -> std::process::Command {
        let mut cmd = std::process::Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.cwd)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}
