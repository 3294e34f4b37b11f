// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::StderrStyles;
use camino::Utf8PathBuf;
use gdd_runner::errors::*;
use owo_colors::OwoColorize;
use std::error::Error;
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

/// Documented exit codes for `gdd` failures.
///
/// Unknown or unexpected failures always result in exit code 1.
pub enum GddExitCode {}

impl GddExitCode {
    /// No errors occurred and gdd exited normally.
    pub const OK: i32 = 0;

    /// One or more tests failed, or the run's outcome could not be determined.
    pub const TEST_RUN_FAILED: i32 = 100;

    /// Discovering tests produced an error.
    pub const TEST_LIST_CREATION_FAILED: i32 = 104;

    /// Writing data to stdout or stderr produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;

    /// A user issue happened while setting up a gdd invocation.
    pub const SETUP_ERROR: i32 = 96;
}

// The #[error()] strings are mostly placeholders: errors are meant to be printed with
// display_to_stderr, which colorizes them.

/// An error that gdd expects might happen, with a documented exit code.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("could not determine the current directory")]
    CurrentDirFailed {
        #[source]
        err: std::io::Error,
    },
    #[error("working directory is not valid UTF-8")]
    CurrentDirInvalidUtf8 { path: std::path::PathBuf },
    #[error("failed to open log file")]
    LogFileOpenFailed {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("test discovery error")]
    DiscoveryError {
        #[from]
        err: DiscoveryError,
    },
    #[error("test runner build error")]
    TestRunnerBuildError {
        #[from]
        err: TestRunnerBuildError,
    },
    #[error("error writing output")]
    WriteEventError {
        #[from]
        err: WriteEventError,
    },
    #[error("test run failed")]
    TestRunFailed,
}

impl ExpectedError {
    pub(crate) fn test_run_failed() -> Self {
        Self::TestRunFailed
    }

    pub(crate) fn write_failed(err: std::io::Error) -> Self {
        Self::WriteEventError {
            err: WriteEventError::Io(err),
        }
    }

    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::CurrentDirFailed { .. }
            | Self::CurrentDirInvalidUtf8 { .. }
            | Self::LogFileOpenFailed { .. }
            | Self::ConfigParseError { .. }
            | Self::TestRunnerBuildError { .. } => GddExitCode::SETUP_ERROR,
            Self::DiscoveryError { .. } => GddExitCode::TEST_LIST_CREATION_FAILED,
            Self::WriteEventError { .. } => GddExitCode::WRITE_OUTPUT_ERROR,
            Self::TestRunFailed => GddExitCode::TEST_RUN_FAILED,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match &self {
            Self::CurrentDirFailed { err } => {
                error!("could not determine the current directory");
                Some(err as &dyn Error)
            }
            Self::CurrentDirInvalidUtf8 { path } => {
                error!(
                    "working directory `{}` is not valid UTF-8",
                    path.display().style(styles.bold)
                );
                None
            }
            Self::LogFileOpenFailed { path, err } => {
                error!("failed to open log file `{}`", path.style(styles.bold));
                Some(err as &dyn Error)
            }
            Self::ConfigParseError { err } => {
                error!(
                    "failed to parse gdd config at `{}`",
                    err.config_file().style(styles.bold)
                );
                Some(err.kind() as &dyn Error)
            }
            Self::DiscoveryError { err } => {
                error!("failed to discover tests");
                Some(err as &dyn Error)
            }
            Self::TestRunnerBuildError { err } => {
                error!("failed to build test runner");
                Some(err as &dyn Error)
            }
            Self::WriteEventError { err } => {
                error!("failed to write event to output");
                Some(err as &dyn Error)
            }
            Self::TestRunFailed => {
                error!("test run failed");
                None
            }
        };

        while let Some(err) = next_error {
            error!(target: "gdd::no_heading", "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}
