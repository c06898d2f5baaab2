use crate::case::{TestContext, TestFailure, TestOutcome};
use crate::cleanup::{short_id, CleanupRegistry, CleanupTarget};
use crate::events::{EventKind, EventSender};
use crate::registry::Registries;
use crate::results::SuiteResult;
use crate::retry::{sleep_or_cancel, RetryPolicy};
use crate::unit::{StartContext, UnitSlot};
use crate::CoreError;
use dockyard_runtime::{managed_labels, resource_name, ContainerRuntime, NetworkSpec, PortAllocator};
use dockyard_schema::SuiteSpec;
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Process-wide collaborators shared by every suite of one run.
#[derive(Clone)]
pub struct RunContext {
    pub run_id: String,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub ports: Arc<PortAllocator>,
    pub cleanup: Arc<CleanupRegistry>,
    pub registries: Arc<Registries>,
    pub events: EventSender,
    pub cancel: CancellationToken,
    /// Bounds concurrent unit builds across all suites.
    pub build_permits: Arc<Semaphore>,
    pub retry: RetryPolicy,
    pub build_timeout: Duration,
    pub startup_timeout: Duration,
}

/// Runs one validated suite: setup with retry, tests in order, teardown always.
pub struct SuiteRunner<'a> {
    ctx: &'a RunContext,
    spec: &'a SuiteSpec,
    path: Option<PathBuf>,
}

impl<'a> SuiteRunner<'a> {
    pub fn new(ctx: &'a RunContext, spec: &'a SuiteSpec, path: Option<PathBuf>) -> Self {
        Self { ctx, spec, path }
    }

    fn emit(&self, source: Option<&str>, kind: EventKind) {
        self.ctx.events.emit(&self.spec.name, source, kind);
    }

    pub async fn run(self) -> SuiteResult {
        let started = Instant::now();
        let suite = self.spec.name.as_str();
        let mut result = SuiteResult::new(suite);
        result.path.clone_from(&self.path);
        info!(suite, "suite started");
        self.emit(None, EventKind::SuiteStarted);

        let mut attempt = 1;
        loop {
            result.attempts = attempt;
            let mut slots = match self.build_units() {
                Ok(slots) => slots,
                Err(e) => {
                    result.config_error = Some(e.to_string());
                    break;
                }
            };

            let setup = self.setup(&mut slots, attempt).await;
            if setup.is_ok() {
                result.tests = self.run_tests(&slots).await;
            }
            self.teardown(&mut slots, &mut result).await;

            match setup {
                Ok(()) => break,
                Err(CoreError::Cancelled) => {
                    result.cancelled = true;
                    break;
                }
                Err(e) if self.ctx.retry.should_retry(attempt, &e) => {
                    warn!(suite, attempt, "setup failed, retrying: {e}");
                    self.emit(
                        None,
                        EventKind::SetupRetry {
                            attempt,
                            max_attempts: self.ctx.retry.max_attempts,
                            reason: e.to_string(),
                        },
                    );
                    if sleep_or_cancel(self.ctx.retry.delay, &self.ctx.cancel)
                        .await
                        .is_err()
                    {
                        result.setup_error = Some(e.to_string());
                        result.cancelled = true;
                        break;
                    }
                    attempt += 1;
                }
                Err(e) => {
                    warn!(suite, "setup failed: {e}");
                    result.setup_error = Some(e.to_string());
                    break;
                }
            }
        }

        if self.ctx.cancel.is_cancelled() {
            result.cancelled = true;
        }
        result.duration = started.elapsed();
        info!(
            suite,
            passed = result.passed_tests(),
            failed = result.failed_tests(),
            "suite finished"
        );
        self.emit(
            None,
            EventKind::SuiteFinished {
                result: result.clone(),
            },
        );
        result
    }

    /// Fresh unit instances for one setup attempt.
    fn build_units(&self) -> Result<Vec<UnitSlot>, CoreError> {
        self.spec
            .units
            .iter()
            .map(|u| self.ctx.registries.build_unit(u).map(UnitSlot::new))
            .collect()
    }

    async fn setup(&self, slots: &mut [UnitSlot], attempt: u32) -> Result<(), CoreError> {
        if self.ctx.cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        let suite = self.spec.name.as_str();
        let part = if attempt > 1 {
            format!("net-a{attempt}")
        } else {
            "net".to_owned()
        };
        let net_name = resource_name(suite, &part, &self.ctx.run_id);
        let network = self
            .ctx
            .runtime
            .create_network(&NetworkSpec {
                name: net_name.clone(),
                labels: managed_labels(suite, &self.ctx.run_id),
            })
            .await
            .map_err(|e| CoreError::setup(suite, "create network", e))?;
        self.ctx
            .cleanup
            .register(CleanupTarget::network(&network, &net_name, suite));
        debug!(suite, network = short_id(&network), "suite network created");

        let start_ctx = StartContext {
            suite: suite.to_owned(),
            run_id: self.ctx.run_id.clone(),
            attempt,
            network,
            runtime: self.ctx.runtime.clone(),
            ports: self.ctx.ports.clone(),
            cleanup: self.ctx.cleanup.clone(),
            cancel: self.ctx.cancel.clone(),
        };

        let outcomes = join_all(slots.iter_mut().map(|slot| self.bring_up(slot, &start_ctx))).await;
        // Report the first failure in declaration order.
        outcomes.into_iter().collect()
    }

    async fn bring_up(&self, slot: &mut UnitSlot, ctx: &StartContext) -> Result<(), CoreError> {
        let name = slot.name().to_owned();
        self.emit(Some(&name), EventKind::UnitStarting);

        let started = {
            let _permit = self
                .ctx
                .build_permits
                .acquire()
                .await
                .map_err(|_| CoreError::Cancelled)?;
            slot.start(ctx, self.ctx.build_timeout).await
        };
        let res = match started {
            Ok(()) => {
                slot.wait_for_ready(&self.ctx.cancel, self.ctx.startup_timeout)
                    .await
            }
            Err(e) => Err(e),
        };

        match &res {
            Ok(()) => {
                info!(suite = %self.spec.name, unit = %name, "unit ready");
                self.emit(Some(&name), EventKind::UnitReady);
            }
            Err(CoreError::Cancelled) => {}
            Err(e) => {
                self.emit(
                    Some(&name),
                    EventKind::UnitFailed {
                        reason: e.to_string(),
                    },
                );
            }
        }
        res
    }

    async fn run_tests(&self, slots: &[UnitSlot]) -> Vec<TestOutcome> {
        let suite = self.spec.name.as_str();
        let mut outcomes = Vec::with_capacity(self.spec.tests.len());

        for spec in &self.spec.tests {
            if self.ctx.cancel.is_cancelled() {
                debug!(suite, "cancelled, skipping remaining tests");
                break;
            }
            let target = self.spec.resolve_target(spec).unwrap_or_default();
            self.emit(Some(&spec.name), EventKind::TestStarted);
            let started = Instant::now();

            let res = self.run_one(spec, target, slots).await;
            let outcome = match res {
                Ok(()) => TestOutcome::pass(&spec.name, &spec.kind, target, started.elapsed()),
                Err(f) => {
                    warn!(suite, test = %spec.name, target, "test failed: {f}");
                    TestOutcome::fail(
                        &spec.name,
                        &spec.kind,
                        target,
                        format!("[target {target}] {f}"),
                        started.elapsed(),
                    )
                }
            };
            self.emit(
                Some(&spec.name),
                EventKind::TestFinished {
                    outcome: outcome.clone(),
                },
            );
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn run_one(
        &self,
        spec: &dockyard_schema::TestSpec,
        target: &str,
        slots: &[UnitSlot],
    ) -> Result<(), TestFailure> {
        let mut test = self.ctx.registries.build_test(spec)?;
        let target_unit = slots
            .iter()
            .find(|s| s.name() == target)
            .map(UnitSlot::unit)
            .ok_or_else(|| TestFailure::new(format!("target unit '{target}' is not part of the suite")))?;
        {
            let ctx = TestContext {
                suite: &self.spec.name,
                target: target_unit,
                units: slots.iter().map(UnitSlot::unit).collect(),
            };
            test.initialize(&ctx)?;
        }
        tokio::select! {
            biased;
            () = self.ctx.cancel.cancelled() => Err(TestFailure::new("cancelled")),
            res = test.run(&self.ctx.cancel) => res,
        }
    }

    async fn teardown(&self, slots: &mut [UnitSlot], result: &mut SuiteResult) {
        let suite = self.spec.name.as_str();
        for slot in slots.iter_mut().rev() {
            let before = slot.state();
            let stopped = slot.stop().await;
            let name = slot.name().to_owned();
            if let Err(e) = stopped {
                self.emit(
                    Some(&name),
                    EventKind::UnitFailed {
                        reason: format!("stop failed: {e}"),
                    },
                );
            }
            if before != slot.state() {
                self.emit(Some(&name), EventKind::UnitStopped);
            }
        }

        let report = self.ctx.cleanup.cleanup_suite(suite).await;
        for failure in report.failures {
            self.emit(
                None,
                EventKind::CleanupFailed {
                    failure: failure.clone(),
                },
            );
            result.cleanup_failures.push(failure);
        }
    }
}
