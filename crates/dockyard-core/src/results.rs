use crate::case::TestOutcome;
use crate::cleanup::{CleanupFailure, CleanupReport};
use serde::{Serialize, Serializer};
use std::path::PathBuf;
use std::time::Duration;

#[allow(clippy::trivially_copy_pass_by_ref)]
pub(crate) fn serialize_ms<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SuiteResult {
    pub name: String,
    pub path: Option<PathBuf>,
    pub attempts: u32,
    pub config_error: Option<String>,
    pub setup_error: Option<String>,
    pub tests: Vec<TestOutcome>,
    pub cleanup_failures: Vec<CleanupFailure>,
    pub cancelled: bool,
    #[serde(rename = "duration_ms", serialize_with = "serialize_ms")]
    pub duration: Duration,
}

impl SuiteResult {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Self::default()
        }
    }

    pub fn config_failure(name: &str, path: Option<PathBuf>, error: String) -> Self {
        Self {
            name: name.to_owned(),
            path,
            config_error: Some(error),
            ..Self::default()
        }
    }

    /// Cleanup failures are reported separately and do not fail the suite.
    pub fn passed(&self) -> bool {
        self.config_error.is_none()
            && self.setup_error.is_none()
            && !self.cancelled
            && self.tests.iter().all(|t| t.passed)
    }

    pub fn passed_tests(&self) -> usize {
        self.tests.iter().filter(|t| t.passed).count()
    }

    pub fn failed_tests(&self) -> usize {
        self.tests.len() - self.passed_tests()
    }
}

/// Everything the results accumulator saw by the time the bus closed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub suites: Vec<SuiteResult>,
    pub cancelled: bool,
    /// Process-wide teardown performed after every suite finished.
    pub final_cleanup: Option<CleanupReport>,
    /// Report consumers that failed to produce their output.
    pub report_errors: Vec<String>,
    #[serde(rename = "duration_ms", serialize_with = "serialize_ms")]
    pub duration: Duration,
}

impl RunSummary {
    pub fn cleanup_failures(&self) -> impl Iterator<Item = &CleanupFailure> {
        self.suites
            .iter()
            .flat_map(|s| s.cleanup_failures.iter())
            .chain(self.final_cleanup.iter().flat_map(|r| r.failures.iter()))
    }

    pub fn passed(&self) -> bool {
        !self.cancelled
            && self.suites.iter().all(SuiteResult::passed)
            && self.cleanup_failures().next().is_none()
            && self.report_errors.is_empty()
    }

    pub fn exit_code(&self) -> u8 {
        u8::from(!self.passed())
    }

    pub fn total_tests(&self) -> usize {
        self.suites.iter().map(|s| s.tests.len()).sum()
    }

    pub fn failed_tests(&self) -> usize {
        self.suites.iter().map(SuiteResult::failed_tests).sum()
    }
}
