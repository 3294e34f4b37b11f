// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Aggregating test events and reporting run progress.
//!
//! The [`ResultAggregator`] turns decoded events into per-package results. The
//! [`TestReporter`] consumes [`ReporterEvent`]s produced during a run and writes them out.

mod aggregator;
mod displayer;
mod events;
mod structured;

pub use aggregator::*;
pub use displayer::*;
pub use events::*;
pub use structured::{MessageFormat, write_report};
