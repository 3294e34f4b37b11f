// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Layered configuration for gdd.
//!
//! The embedded default config is read first, followed by the project's `.config/gdd.toml` (or
//! an explicitly provided file).

use crate::errors::{ConfigParseError, ConfigParseErrorKind};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, builder::DefaultState};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr, time::Duration};
use tracing::warn;

/// Overall gdd configuration.
#[derive(Clone, Debug, Default)]
pub struct GddConfig {
    config_file: Option<Utf8PathBuf>,
    run: RunSettings,
    output: OutputSettings,
}

impl GddConfig {
    /// The path to the project config, relative to the project root.
    pub const CONFIG_PATH: &'static str = ".config/gdd.toml";

    /// Contains the default config as a TOML file.
    ///
    /// Repository-specific configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// Reads the gdd config from the given file, or if not specified from
    /// `.config/gdd.toml` under the project root.
    ///
    /// Keys that aren't recognized are reported as warnings.
    pub fn from_sources(
        project_root: &Utf8Path,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        Self::from_sources_with_warnings(project_root, config_file, |config_file, unknown| {
            warn!(
                "ignoring unknown configuration keys in config file {config_file}: {}",
                unknown.join(", ")
            );
        })
    }

    /// Like [`Self::from_sources`], but calls `unknown_cb` with the unknown keys, if any.
    pub fn from_sources_with_warnings(
        project_root: &Utf8Path,
        config_file: Option<&Utf8Path>,
        mut unknown_cb: impl FnMut(&Utf8Path, &[String]),
    ) -> Result<Self, ConfigParseError> {
        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = project_root.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let builder = Self::make_default_config().add_source(source);
        let (deserialized, unknown) = Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;
        if !unknown.is_empty() {
            unknown_cb(&config_file, &unknown);
        }

        let exists = config_file.exists();
        Ok(Self {
            config_file: exists.then_some(config_file),
            run: deserialized.run,
            output: deserialized.output,
        })
    }

    /// Returns the config file that was read, if one existed.
    pub fn config_file(&self) -> Option<&Utf8Path> {
        self.config_file.as_deref()
    }

    /// Returns the settings for the `go test` invocation.
    pub fn run_settings(&self) -> &RunSettings {
        &self.run
    }

    /// Returns the output settings.
    pub fn output_settings(&self) -> &OutputSettings {
        &self.output
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    /// Returns the deserialized config along with the keys that were ignored.
    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(GddConfigDeserialize, Vec<String>), ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        let mut ignored = Vec::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.push(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config: GddConfigDeserialize =
            serde_path_to_error::deserialize(ignored_de).map_err(|error| {
                // The config crate also reports the key; drop it so the path is only shown once.
                let path = error.path().clone();
                let error = match error.into_inner() {
                    ConfigError::At { error, .. } => *error,
                    other => other,
                };
                ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                    path, error,
                )))
            })?;

        ignored.sort();
        Ok((config, ignored))
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct GddConfigDeserialize {
    #[serde(default)]
    run: RunSettings,
    #[serde(default)]
    output: OutputSettings,
}

/// Settings that shape the `go test` command line.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RunSettings {
    /// The program to invoke.
    pub go_binary: String,

    /// Arguments appended after the standard flags.
    pub extra_args: Vec<String>,

    /// Passed to `go test` as `-timeout`.
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,

    /// Passes `-short`.
    pub short: bool,

    /// Passes `-race`.
    pub race: bool,

    /// Extra environment variables for the subprocess.
    pub env: BTreeMap<String, String>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            go_binary: "go".to_owned(),
            extra_args: Vec::new(),
            timeout: None,
            short: false,
            race: false,
            env: BTreeMap::new(),
        }
    }
}

/// Settings for the human-readable reporter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct OutputSettings {
    /// When to show the output of failing tests.
    pub failure_output: FailureOutput,
}

/// When to display the output of a failing test.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureOutput {
    /// As soon as the test finishes.
    #[default]
    Immediate,

    /// After the run finishes, before the summary.
    Final,

    /// Never.
    Never,
}

impl FailureOutput {
    /// Whether output should be shown as each test finishes.
    pub fn is_immediate(self) -> bool {
        matches!(self, Self::Immediate)
    }

    /// Whether output should be shown at the end of the run.
    pub fn is_final(self) -> bool {
        matches!(self, Self::Final)
    }
}

impl fmt::Display for FailureOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate => write!(f, "immediate"),
            Self::Final => write!(f, "final"),
            Self::Never => write!(f, "never"),
        }
    }
}

impl FromStr for FailureOutput {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "immediate" => Ok(Self::Immediate),
            "final" => Ok(Self::Final),
            "never" => Ok(Self::Never),
            other => Err(format!(
                "unrecognized value for failure-output: {other} (expected immediate, final or never)"
            )),
        }
    }
}
