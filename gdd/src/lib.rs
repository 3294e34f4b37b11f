// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A streaming runner for Go tests.
//!
//! `gdd run` executes `go test -json`, reports every test as it finishes, and exits with a
//! non-zero code if anything failed or the outcome couldn't be determined. `gdd list` shows the
//! test functions found in the project.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::OutputWriter;
