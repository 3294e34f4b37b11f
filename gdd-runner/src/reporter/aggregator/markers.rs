// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Classification of packages that finish without reporting any tests.
//!
//! `go test` reports these situations only through free-form text in the package output, so
//! classification relies on marker strings. The markers below match the output of current Go
//! toolchains and may need updating if that text changes.

use crate::results::TestStatus;

/// Substrings indicating that a package has nothing to test.
///
/// * `[no test files]`: printed by `go test` for packages without `_test.go` files, e.g.
///   `?   \texample.com/cmd\t[no test files]`.
/// * `no Go files` and `no non-test Go files`: build errors for directories that contain no
///   buildable sources for this platform.
pub(crate) const NO_TEST_FILES_MARKERS: &[&str] =
    &["[no test files]", "no Go files", "no non-test Go files"];

/// Prefix of the header line `go build` prints before compiler errors, e.g. `# example.com/a`.
pub(crate) const BUILD_ERROR_HEADER: &str = "# ";

/// Both of these appear in the summary line for a package whose test binary failed to build, e.g.
/// `FAIL\texample.com/a [build failed]`.
pub(crate) const BUILD_FAILED_MARKERS: [&str; 2] = ["FAIL\t", "[build failed]"];

/// Why a package without tests finished the way it did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PackageClassification {
    /// The package has no test files.
    NoTestFiles,

    /// The package failed to build.
    BuildFailed,
}

impl PackageClassification {
    /// The name of the placeholder test synthesized for this classification.
    pub(crate) fn placeholder_name(self) -> &'static str {
        match self {
            Self::NoTestFiles => "(package: no test files)",
            Self::BuildFailed => "(package: build failed)",
        }
    }

    /// The status of the placeholder test.
    pub(crate) fn placeholder_status(self) -> TestStatus {
        match self {
            Self::NoTestFiles => TestStatus::Skip,
            Self::BuildFailed => TestStatus::Fail,
        }
    }
}

pub(crate) fn is_no_test_files_line(line: &str) -> bool {
    NO_TEST_FILES_MARKERS
        .iter()
        .any(|marker| line.contains(marker))
}

pub(crate) fn is_build_failure_line(line: &str) -> bool {
    line.starts_with(BUILD_ERROR_HEADER)
        || BUILD_FAILED_MARKERS
            .iter()
            .all(|marker| line.contains(marker))
}

/// Classifies a package that finished with `status` and no tests, based on its summary output.
///
/// "No test files" takes precedence. A build failure is only recognized for failed packages.
pub(crate) fn classify_package(
    summary: &[String],
    status: TestStatus,
) -> Option<PackageClassification> {
    if summary.iter().any(|line| is_no_test_files_line(line)) {
        Some(PackageClassification::NoTestFiles)
    } else if status == TestStatus::Fail && summary.iter().any(|line| is_build_failure_line(line))
    {
        Some(PackageClassification::BuildFailed)
    } else {
        None
    }
}
