// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Machine-readable output for a finished run.

use super::events::{ReporterEvent, ReporterEventKind};
use crate::{errors::WriteEventError, results::RunReport};
use std::{
    fmt,
    io::{self, Write},
    str::FromStr,
};

/// The format used for machine-readable output on stdout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MessageFormat {
    /// No machine-readable output: only the human-readable reporter writes anything.
    #[default]
    Human,

    /// The final run report as a single JSON document.
    Json,

    /// The final run report as pretty-printed JSON.
    JsonPretty,
}

impl fmt::Display for MessageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Human => write!(f, "human"),
            Self::Json => write!(f, "json"),
            Self::JsonPretty => write!(f, "json-pretty"),
        }
    }
}

impl FromStr for MessageFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "human" => Ok(Self::Human),
            "json" => Ok(Self::Json),
            "json-pretty" => Ok(Self::JsonPretty),
            other => Err(format!(
                "unrecognized message format `{other}` (expected human, json or json-pretty)"
            )),
        }
    }
}

pub(super) struct StructuredReporter {
    format: MessageFormat,
}

impl StructuredReporter {
    pub(super) fn new(format: MessageFormat) -> Self {
        Self { format }
    }

    pub(super) fn write_event(&mut self, event: &ReporterEvent<'_>) -> Result<(), WriteEventError> {
        let ReporterEventKind::RunFinished { report } = &event.kind else {
            return Ok(());
        };
        if self.format == MessageFormat::Human {
            return Ok(());
        }

        let stdout = io::stdout();
        let mut writer = stdout.lock();
        write_report(self.format, report, &mut writer)?;
        writer.flush()?;
        Ok(())
    }
}

/// Serializes a report in the given format.
///
/// Writes nothing for [`MessageFormat::Human`].
pub fn write_report(
    format: MessageFormat,
    report: &RunReport,
    writer: &mut dyn Write,
) -> Result<(), WriteEventError> {
    match format {
        MessageFormat::Human => return Ok(()),
        MessageFormat::Json => serde_json::to_writer(&mut *writer, report)?,
        MessageFormat::JsonPretty => serde_json::to_writer_pretty(&mut *writer, report)?,
    }
    writeln!(writer)?;
    Ok(())
}
