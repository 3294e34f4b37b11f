// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reduces `go test -json` events into per-package results.

mod diagnostics;
mod imp;
mod markers;

pub use diagnostics::*;
pub use imp::*;
