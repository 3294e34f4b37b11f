// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by gdd.

use crate::test_command::RunScope;
use camino::Utf8PathBuf;
use config::ConfigError;
use std::{error, fmt, io, sync::Arc};
use thiserror::Error;

/// An invalid run configuration, detected before any subprocess is spawned.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum RunConfigError {
    /// The scope requires a target path but none was given.
    #[error("{scope} scope requires a non-empty target path")]
    MissingTargetPath {
        /// The scope that was requested.
        scope: RunScope,
    },

    /// A single-test run was requested without a test name.
    #[error("{scope} scope requires a non-empty test name")]
    MissingTestName {
        /// The scope that was requested.
        scope: RunScope,
    },
}

/// An error that occurred while launching the `go test` subprocess.
///
/// Launch errors are delivered as the completion outcome of a run rather than returned to the
/// caller, since by the time they happen the run has already been handed off to the executor.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum LaunchError {
    /// The process could not be spawned (for example, the program was not found).
    #[error("failed to spawn `{command}`")]
    Spawn {
        /// The command line that was attempted.
        command: String,

        /// The underlying error.
        #[source]
        err: Arc<io::Error>,
    },

    /// The process was spawned, but a pipe to it could not be set up.
    #[error("failed to set up {stream} pipe for `{command}`")]
    PipeSetup {
        /// The command line that was spawned.
        command: String,

        /// The stream that was missing.
        stream: &'static str,
    },

    /// Waiting for the process to exit failed.
    #[error("failed to wait for `{command}` to exit")]
    Wait {
        /// The command line that was spawned.
        command: String,

        /// The underlying error.
        #[source]
        err: Arc<io::Error>,
    },
}

/// A line of output that could not be decoded into a test event.
///
/// The wrapped tool interleaves plain-text diagnostics with JSON events (especially on build
/// failures), so this is an expected condition rather than a fatal one.
#[derive(Clone, Debug, Error)]
#[error("line {line_number} is not a valid test event")]
pub struct DecodeError {
    line_number: usize,
    line: String,
    #[source]
    err: Arc<serde_json::Error>,
}

impl DecodeError {
    pub(crate) fn new(line_number: usize, line: impl Into<String>, err: serde_json::Error) -> Self {
        Self {
            line_number,
            line: line.into(),
            err: Arc::new(err),
        }
    }

    /// Returns the 1-based line number of the offending line.
    pub fn line_number(&self) -> usize {
        self.line_number
    }

    /// Returns the original text of the offending line.
    pub fn line(&self) -> &str {
        &self.line
    }
}

/// An error that occurred while parsing the gdd config.
#[derive(Debug, Error)]
#[error("failed to parse gdd config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file that failed to parse.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }

    /// Returns the kind of error.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of a [`ConfigParseError`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// The layered config sources could not be read or merged.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// The merged config did not match the expected shape.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),
}

/// An error that occurred while discovering test targets.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DiscoveryError {
    /// The project root could not be resolved.
    #[error("failed to resolve project root `{root}`")]
    RootResolve {
        /// The root that was provided.
        root: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: io::Error,
    },

    /// The project root isn't valid UTF-8.
    #[error("project root `{}` is not valid UTF-8", root.display())]
    RootNotUtf8 {
        /// The root that was resolved.
        root: std::path::PathBuf,
    },

    /// Walking the directory tree failed.
    #[error("error walking directory `{root}`")]
    Walk {
        /// The root being walked.
        root: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: walkdir::Error,
    },
}

/// An error that occurred while building a test runner.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TestRunnerBuildError {
    /// The run configuration is invalid.
    #[error("invalid run configuration")]
    RunConfig(#[from] RunConfigError),

    /// An error occurred while creating the Tokio runtime.
    #[error("error creating Tokio runtime")]
    TokioRuntimeCreate(#[source] io::Error),

    /// An error occurred while setting up signals.
    #[error("error setting up signals")]
    SignalHandlerSetupError(#[from] SignalHandlerSetupError),
}

/// An error occurred while setting up the signal handler.
#[derive(Debug, Error)]
#[error("error setting up signal handler")]
pub struct SignalHandlerSetupError(#[from] io::Error);

/// An error that occurs while writing an event or a report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WriteEventError {
    /// An error occurred while writing to the output.
    #[error("error writing to output")]
    Io(#[from] io::Error),

    /// An error occurred while serializing the report.
    #[error("error serializing report")]
    Json(#[from] serde_json::Error),
}

/// Displays an error and its chain of sources on a single line, separated by `: `.
pub struct DisplayErrorChain<E> {
    error: E,
}

impl<E: error::Error> DisplayErrorChain<E> {
    /// Creates a new `DisplayErrorChain`.
    pub fn new(error: E) -> Self {
        Self { error }
    }
}

impl<E: error::Error> fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        let mut source = self.error.source();
        while let Some(err) = source {
            write!(f, ": {err}")?;
            source = err.source();
        }

        Ok(())
    }
}
