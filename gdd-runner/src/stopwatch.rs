// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stopwatch for tracking how long a run takes.
//!
//! A run needs a start time to report and a duration. The start time comes from the realtime clock
//! and the duration from the monotonic clock, so that clock adjustments during a run don't skew it.

use chrono::{DateTime, Local};
use std::time::{Duration, Instant};

pub(crate) fn stopwatch() -> StopwatchStart {
    StopwatchStart::new()
}

/// The start state of a stopwatch.
#[derive(Clone, Debug)]
pub(crate) struct StopwatchStart {
    start_time: DateTime<Local>,
    instant: Instant,
}

impl StopwatchStart {
    fn new() -> Self {
        Self {
            // These two syscalls happen close enough to each other for our purposes.
            start_time: Local::now(),
            instant: Instant::now(),
        }
    }

    pub(crate) fn snapshot(&self) -> StopwatchSnapshot {
        StopwatchSnapshot {
            start_time: self.start_time,
            duration: self.instant.elapsed(),
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct StopwatchSnapshot {
    pub(crate) start_time: DateTime<Local>,
    pub(crate) duration: Duration,
}

impl StopwatchSnapshot {
    pub(crate) fn end_time(&self) -> DateTime<Local> {
        self.start_time + self.duration
    }
}
