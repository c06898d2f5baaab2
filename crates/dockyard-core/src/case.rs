use crate::unit::Unit;
use crate::CoreError;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// What a test sees of its suite when it is bound to a target.
pub struct TestContext<'a> {
    pub suite: &'a str,
    pub target: &'a dyn Unit,
    pub units: Vec<&'a dyn Unit>,
}

impl TestContext<'_> {
    pub fn unit(&self, name: &str) -> Option<&dyn Unit> {
        self.units.iter().copied().find(|u| u.name() == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TestFailure {
    pub message: String,
}

impl TestFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<CoreError> for TestFailure {
    fn from(e: CoreError) -> Self {
        Self::new(e.to_string())
    }
}

/// One test case run against a target unit.
#[async_trait]
pub trait SuiteTest: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> &str;

    /// Bind the resolved target. Called once, after every unit is ready.
    fn initialize(&mut self, ctx: &TestContext<'_>) -> Result<(), CoreError>;

    /// Execute once. Implementations should return promptly when `cancel`
    /// fires; the runner also stops waiting on its own.
    async fn run(&mut self, cancel: &CancellationToken) -> Result<(), TestFailure>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestOutcome {
    pub name: String,
    pub kind: String,
    pub target: String,
    pub passed: bool,
    pub message: Option<String>,
    #[serde(rename = "duration_ms", serialize_with = "crate::results::serialize_ms")]
    pub duration: Duration,
}

impl TestOutcome {
    pub fn pass(name: &str, kind: &str, target: &str, duration: Duration) -> Self {
        Self {
            name: name.to_owned(),
            kind: kind.to_owned(),
            target: target.to_owned(),
            passed: true,
            message: None,
            duration,
        }
    }

    pub fn fail(name: &str, kind: &str, target: &str, message: String, duration: Duration) -> Self {
        Self {
            name: name.to_owned(),
            kind: kind.to_owned(),
            target: target.to_owned(),
            passed: false,
            message: Some(message),
            duration,
        }
    }
}
