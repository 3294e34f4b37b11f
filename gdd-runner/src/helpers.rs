// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! General support code for gdd-runner.

use std::{fmt, time::Duration};

/// Utilities for pluralizing various words based on count.
pub mod plural {
    /// Returns "test" if `count` is 1, otherwise "tests".
    pub fn tests_str(count: usize) -> &'static str {
        if count == 1 { "test" } else { "tests" }
    }

    /// Returns "package" if `count` is 1, otherwise "packages".
    pub fn packages_str(count: usize) -> &'static str {
        if count == 1 { "package" } else { "packages" }
    }

    /// Returns "anomaly" if `count` is 1, otherwise "anomalies".
    pub fn anomalies_str(count: usize) -> &'static str {
        if count == 1 { "anomaly" } else { "anomalies" }
    }

    /// Returns "file" if `count` is 1, otherwise "files".
    pub fn files_str(count: usize) -> &'static str {
        if count == 1 { "file" } else { "files" }
    }
}

/// Displays a duration as `[   0.010s] `, right-aligned.
pub(crate) struct DisplayBracketedDuration(pub(crate) Duration);

impl fmt::Display for DisplayBracketedDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // * > means right-align.
        // * 8 is the number of characters to pad to.
        // * .3 means print three digits after the decimal point.
        write!(f, "[{:>8.3?}s] ", self.0.as_secs_f64())
    }
}
