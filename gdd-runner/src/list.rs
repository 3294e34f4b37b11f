// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Discovering Go test functions in a project tree.
//!
//! Discovery is a best-effort scan: it reads each `*_test.go` file's `package` clause and its
//! top-level `func TestXxx(t *testing.T)` declarations without compiling anything. The run itself
//! is always authoritative.

use crate::{
    errors::DiscoveryError,
    helpers::plural,
    test_command::{RunConfig, RunScope},
};
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::Serialize;
use std::{fs, sync::LazyLock};
use tracing::{debug, info, warn};

static PACKAGE_CLAUSE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^package\s+(\w+)").expect("package regex is valid"));

// `Test` alone, or `Test` followed by a word character that isn't lowercase.
static TEST_FUNC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^func\s+(Test(?:[\w&&[^\p{Ll}]]\w*)?)\s*\(\s*\w*\s*\*\s*testing\.T\s*\)")
        .expect("test function regex is valid")
});

/// A test function found during discovery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestTarget {
    /// The name of the test function, for example `TestOpen`.
    pub name: String,

    /// The package name declared in the file.
    pub package_name: String,

    /// The directory containing the file, relative to the project root, with forward slashes.
    /// `.` for the root itself.
    pub package_dir: String,

    /// The absolute path to the test file.
    pub file_path: Utf8PathBuf,
}

impl TestTarget {
    /// The package path in the form `go test` expects: `./<dir>`, or `.` for the root.
    pub fn go_package_path(&self) -> String {
        if self.package_dir == "." {
            ".".to_owned()
        } else {
            format!("./{}", self.package_dir)
        }
    }

    /// Builds a run configuration for this target.
    ///
    /// `Single` runs just this test, `Package` runs its whole package and `All` ignores the target.
    pub fn to_run_config(&self, scope: RunScope) -> RunConfig {
        match scope {
            RunScope::Single => RunConfig::single(self.go_package_path(), &self.name),
            RunScope::Package => RunConfig::package(self.go_package_path()),
            RunScope::All => RunConfig::all(),
        }
    }
}

/// The list of test targets discovered under a project root.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestTargetList {
    root: Utf8PathBuf,
    file_count: usize,
    targets: Vec<TestTarget>,
}

impl TestTargetList {
    /// Walks `root` and collects every test target in it.
    ///
    /// `vendor` and hidden directories are skipped. Files that can't be read are logged and
    /// skipped.
    pub fn discover(root: &Utf8Path) -> Result<Self, DiscoveryError> {
        let root = resolve_root(root)?;
        debug!("discovering tests under {root}");

        let mut file_count = 0;
        let mut targets = Vec::new();

        let walker = walkdir::WalkDir::new(&root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_skipped_dir(entry));

        for entry in walker {
            let entry = entry.map_err(|err| DiscoveryError::Walk {
                root: root.clone(),
                err,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let Some(path) = Utf8Path::from_path(entry.path()) else {
                warn!("skipping non-UTF-8 path `{}`", entry.path().display());
                continue;
            };
            if !path.as_str().ends_with("_test.go") {
                continue;
            }

            let contents = match fs::read_to_string(path) {
                Ok(contents) => contents,
                Err(err) => {
                    warn!("could not read test file `{path}`: {err}");
                    continue;
                }
            };
            file_count += 1;

            let package_dir = package_dir_for(&root, path);
            targets.extend(scan_test_file(&contents, &package_dir, path));
        }

        // Stable: declaration order within a file is preserved.
        targets.sort_by(|a, b| {
            (&a.package_dir, &a.file_path).cmp(&(&b.package_dir, &b.file_path))
        });

        info!(
            "discovered {} {} in {} {}",
            targets.len(),
            plural::tests_str(targets.len()),
            file_count,
            plural::files_str(file_count),
        );

        Ok(Self {
            root,
            file_count,
            targets,
        })
    }

    /// The resolved project root.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// The number of test files that were scanned.
    pub fn file_count(&self) -> usize {
        self.file_count
    }

    /// The discovered targets, sorted by directory, then file, then declaration order.
    pub fn targets(&self) -> &[TestTarget] {
        &self.targets
    }

    /// Returns true if no targets were found.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Iterates over the distinct package directories, in order.
    pub fn package_dirs(&self) -> impl Iterator<Item = &str> + '_ {
        let mut last = None;
        self.targets.iter().filter_map(move |target| {
            let dir = target.package_dir.as_str();
            if last == Some(dir) {
                None
            } else {
                last = Some(dir);
                Some(dir)
            }
        })
    }
}

fn resolve_root(root: &Utf8Path) -> Result<Utf8PathBuf, DiscoveryError> {
    let resolved = root
        .as_std_path()
        .canonicalize()
        .map_err(|err| DiscoveryError::RootResolve {
            root: root.to_owned(),
            err,
        })?;
    Utf8PathBuf::try_from(resolved)
        .map_err(|err| DiscoveryError::RootNotUtf8 {
            root: err.into_path_buf(),
        })
}

fn is_skipped_dir(entry: &walkdir::DirEntry) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    let skip = name == "vendor" || (name.len() > 1 && name.starts_with('.'));
    if skip {
        debug!("skipping directory `{}`", entry.path().display());
    }
    skip
}

fn package_dir_for(root: &Utf8Path, file: &Utf8Path) -> String {
    let dir = file
        .parent()
        .and_then(|parent| parent.strip_prefix(root).ok())
        .map(|rel| rel.components().map(|c| c.as_str()).collect::<Vec<_>>().join("/"))
        .unwrap_or_default();
    if dir.is_empty() { ".".to_owned() } else { dir }
}

fn scan_test_file(contents: &str, package_dir: &str, file_path: &Utf8Path) -> Vec<TestTarget> {
    let Some(package_name) = PACKAGE_CLAUSE_RE
        .captures(contents)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_owned())
    else {
        warn!("no package clause in `{file_path}`, skipping");
        return Vec::new();
    };

    TEST_FUNC_RE
        .captures_iter(contents)
        .filter_map(|caps| caps.get(1))
        .map(|name| {
            debug!(
                "discovered {} in package {package_name} (dir: {package_dir})",
                name.as_str()
            );
            TestTarget {
                name: name.as_str().to_owned(),
                package_name: package_name.clone(),
                package_dir: package_dir.to_owned(),
                file_path: file_path.to_owned(),
            }
        })
        .collect()
}
