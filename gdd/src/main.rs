// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use clap::Parser;
use color_eyre::Result;
use gdd::{GddApp, OutputWriter};

fn main() -> Result<()> {
    color_eyre::install()?;
    let _ = enable_ansi_support::enable_ansi_support();

    let app = GddApp::parse();
    let output = match app.init_output() {
        Ok(output) => output,
        Err(error) => {
            // Logging isn't set up, so fall back to a plain message.
            eprintln!("error: {error}");
            std::process::exit(error.process_exit_code())
        }
    };

    match app.exec(output, &mut OutputWriter::default()) {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            error.display_to_stderr(&output.stderr_styles());
            std::process::exit(error.process_exit_code())
        }
    }
}
