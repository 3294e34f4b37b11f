// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Decoding `go test -json` events, one line at a time.

use crate::errors::DecodeError;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, time::Duration};

/// A single event emitted by `go test -json`.
///
/// Fields that `go test` omits when empty default to `None` or the empty string.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct TestEvent {
    /// When the event was emitted.
    #[serde(rename = "Time", default)]
    pub time: Option<DateTime<FixedOffset>>,

    /// What happened.
    #[serde(rename = "Action")]
    pub action: Action,

    /// The package the event belongs to. Empty for some build output.
    #[serde(rename = "Package", default)]
    pub package: String,

    /// The test the event belongs to, if it's test-scoped.
    #[serde(rename = "Test", default)]
    pub test: Option<String>,

    /// Elapsed time in seconds, on terminal events.
    #[serde(rename = "Elapsed", default)]
    pub elapsed: Option<f64>,

    /// Output text, on `output` events. Usually ends with a newline.
    #[serde(rename = "Output", default)]
    pub output: Option<String>,

    /// The import path being built, on `build-output` and `build-fail` events.
    #[serde(rename = "ImportPath", default)]
    pub import_path: Option<String>,

    /// On a package `fail`, the import path of the package whose build failed.
    #[serde(rename = "FailedBuild", default)]
    pub failed_build: Option<String>,
}

impl TestEvent {
    /// Returns the test name, treating an empty name as absent.
    pub fn test_name(&self) -> Option<&str> {
        self.test.as_deref().filter(|name| !name.is_empty())
    }

    /// Returns the output text with trailing newlines removed.
    pub fn trimmed_output(&self) -> &str {
        self.output
            .as_deref()
            .unwrap_or_default()
            .trim_end_matches(['\n', '\r'])
    }

    /// Returns the elapsed time, if reported and representable.
    ///
    /// Negative, NaN or overflowing values are treated as zero.
    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
            .map(|secs| Duration::try_from_secs_f64(secs).unwrap_or_default())
    }
}

/// The action of a [`TestEvent`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    /// The test binary for a package is about to start (Go 1.20+).
    Start,
    /// A test has started running.
    Run,
    /// The test or package printed output.
    Output,
    /// The test or package passed.
    Pass,
    /// The test or package failed.
    Fail,
    /// The test or package was skipped.
    Skip,
    /// The test has been paused (`t.Parallel`).
    Pause,
    /// The test has continued running.
    Cont,
    /// A benchmark printed output but did not fail.
    Bench,
    /// Compiler output for a package build (Go 1.24+).
    BuildOutput,
    /// A package build failed (Go 1.24+).
    BuildFail,
    /// An action this version doesn't know about.
    Other(String),
}

impl Action {
    /// Returns the action as it appears on the wire.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Start => "start",
            Self::Run => "run",
            Self::Output => "output",
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Skip => "skip",
            Self::Pause => "pause",
            Self::Cont => "cont",
            Self::Bench => "bench",
            Self::BuildOutput => "build-output",
            Self::BuildFail => "build-fail",
            Self::Other(other) => other,
        }
    }

    /// Whether this action finishes a test or package.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Pass | Self::Fail | Self::Skip)
    }
}

impl From<&str> for Action {
    fn from(s: &str) -> Self {
        match s {
            "start" => Self::Start,
            "run" => Self::Run,
            "output" => Self::Output,
            "pass" => Self::Pass,
            "fail" => Self::Fail,
            "skip" => Self::Skip,
            "pause" => Self::Pause,
            "cont" => Self::Cont,
            "bench" => Self::Bench,
            "build-output" => Self::BuildOutput,
            "build-fail" => Self::BuildFail,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from(s.as_str()))
    }
}

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Decodes lines of `go test -json` output into [`TestEvent`]s.
///
/// Blank lines count towards line numbers but decode to nothing.
#[derive(Clone, Debug, Default)]
pub struct EventDecoder {
    line_number: usize,
}

impl EventDecoder {
    /// Creates a new decoder, starting at line 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes the next line.
    pub fn decode(&mut self, line: &str) -> Result<Option<TestEvent>, DecodeError> {
        self.line_number += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        serde_json::from_str(trimmed).map(Some).map_err(|err| {
            DecodeError::new(self.line_number, line.trim_end_matches(['\n', '\r']), err)
        })
    }

    /// The number of lines seen so far.
    pub fn lines_seen(&self) -> usize {
        self.line_number
    }
}
