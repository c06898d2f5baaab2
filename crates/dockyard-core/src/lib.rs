//! Orchestration core for Dockyard test environments.
//!
//! This crate drives units (service containers) through their lifecycle, runs
//! each suite's tests against resolved targets with setup retry, fans events
//! out to report consumers through the `EventBus`, and tears every created
//! resource down through the `CleanupRegistry` in container-before-network
//! order. It also hosts the out-of-band orphan scanner
//! (`ResourceDiscoverer`) and remover (`CleanupOrchestrator`), the runner
//! configuration, and the two-stage interrupt handling.

pub mod case;
pub mod cleanup;
pub mod config;
pub mod discover;
pub mod dry_run;
pub mod events;
pub mod lifecycle;
pub mod orchestrator;
pub mod registry;
pub mod results;
pub mod retry;
pub mod runner;
pub mod shutdown;
pub mod suite;
pub mod unit;

pub use case::{SuiteTest, TestContext, TestFailure, TestOutcome};
pub use cleanup::{CleanupFailure, CleanupRegistry, CleanupReport, CleanupTarget};
pub use config::{RunnerConfig, CONFIG_FILE};
pub use discover::{DiscoverOptions, Discovery, ResourceDiscoverer, ResourceScope};
pub use dry_run::{check_suite, dry_run_suite, DryRunReport};
pub use events::{
    DispatchHandle, Event, EventBus, EventConsumer, EventKind, EventSender, RecordingConsumer,
};
pub use lifecycle::{validate_transition, UnitState};
pub use orchestrator::{CleanupOrchestrator, CleanupResult, KindCounts};
pub use registry::Registries;
pub use results::{RunSummary, SuiteResult};
pub use retry::{sleep_or_cancel, RetryPolicy};
pub use runner::{Runner, SuiteSource};
pub use shutdown::{install_signal_handler, Shutdown, SignalAction, EXIT_FORCED};
pub use suite::{RunContext, SuiteRunner};
pub use unit::{StartContext, Unit, UnitSlot};

pub use tokio_util::sync::CancellationToken;

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Suite(#[from] dockyard_schema::SuiteError),
    #[error("runtime error: {0}")]
    Runtime(#[from] dockyard_runtime::RuntimeError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("setup failed for unit '{unit}' during {operation}: {reason}")]
    Setup {
        unit: String,
        operation: String,
        reason: String,
    },
    #[error("unit '{unit}': {operation} timed out after {after:?}")]
    Timeout {
        unit: String,
        operation: String,
        after: Duration,
    },
    #[error("unit '{unit}' does not provide variable '{variable}'")]
    UnknownVariable { unit: String, variable: String },
    #[error("unknown {category} kind '{kind}' (registered: {registered})")]
    UnknownKind {
        category: &'static str,
        kind: String,
        registered: String,
    },
    #[error("invalid state transition for unit '{unit}': {from} -> {to}")]
    InvalidTransition {
        unit: String,
        from: UnitState,
        to: UnitState,
    },
    #[error("operation cancelled")]
    Cancelled,
    #[error("cleanup failed: {0}")]
    Cleanup(String),
    #[error("event bus error: {0}")]
    EventBus(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Errors raised while bringing units up; these are the only ones retried.
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            Self::Setup { .. } | Self::Timeout { .. } | Self::Runtime(_)
        )
    }

    /// Errors detectable before any infrastructure exists.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Suite(_) | Self::Config(_) | Self::UnknownKind { .. }
        )
    }

    pub fn setup(unit: &str, operation: &str, reason: impl ToString) -> Self {
        Self::Setup {
            unit: unit.to_owned(),
            operation: operation.to_owned(),
            reason: reason.to_string(),
        }
    }
}
