// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for gdd, a streaming runner for Go tests.
//!
//! A run spawns `go test -json`, decodes its event stream line by line as it arrives, and folds
//! the events into per-package and per-test results. The basic flow is:
//!
//! 1. Build a [`RunConfig`](test_command::RunConfig) describing what to run, and load
//!    [`GddConfig`](config::GddConfig) for project-level settings.
//! 2. Build a [`TestRunner`](runner::TestRunner) from those.
//! 3. Execute it with a callback that receives [`ReporterEvent`](reporter::ReporterEvent)s, for
//!    example by forwarding them to a [`TestReporter`](reporter::TestReporter).
//! 4. Inspect the returned [`RunReport`](results::RunReport).

pub mod config;
pub mod decoder;
pub mod errors;
pub mod helpers;
pub mod list;
pub mod reporter;
pub mod results;
pub mod runner;
pub mod signal;
mod stopwatch;
pub mod test_command;
