// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test runner.
//!
//! The main structure in this module is [`TestRunner`]. Underneath it, a [`StreamingExecutor`]
//! runs `go test` on a background task, and a dispatcher feeds its output through the decoder
//! and the aggregator.

mod dispatcher;
mod executor;
mod imp;

#[cfg(unix)]
#[path = "unix.rs"]
mod os;

#[cfg(windows)]
#[path = "windows.rs"]
mod os;

pub use executor::*;
pub use imp::*;
