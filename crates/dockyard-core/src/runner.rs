use crate::cleanup::CleanupRegistry;
use crate::config::RunnerConfig;
use crate::dry_run::check_suite;
use crate::events::{EventBus, EventKind};
use crate::registry::Registries;
use crate::results::{RunSummary, SuiteResult};
use crate::suite::{RunContext, SuiteRunner};
use crate::CoreError;
use dockyard_runtime::{new_run_id, ContainerRuntime, PortAllocator};
use dockyard_schema::{parse_suite_file, SuiteFile, SuiteSpec};
use futures::future::join_all;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Where a suite comes from: a discovered file or an in-memory document.
#[derive(Debug, Clone)]
pub enum SuiteSource {
    File(SuiteFile),
    Spec(SuiteSpec),
}

struct Planned {
    spec: SuiteSpec,
    path: Option<PathBuf>,
}

/// Top-level runner: validates every suite, runs the valid ones, and drives
/// the event bus to its terminal signal.
pub struct Runner {
    config: RunnerConfig,
    runtime: Arc<dyn ContainerRuntime>,
    registries: Arc<Registries>,
    cleanup: Arc<CleanupRegistry>,
    ports: Arc<PortAllocator>,
    cancel: CancellationToken,
    run_id: String,
}

impl Runner {
    pub fn new(
        config: RunnerConfig,
        runtime: Arc<dyn ContainerRuntime>,
        registries: Arc<Registries>,
        cancel: CancellationToken,
    ) -> Self {
        let cleanup = Arc::new(CleanupRegistry::new(runtime.clone()));
        Self {
            config,
            runtime,
            registries,
            cleanup,
            ports: Arc::new(PortAllocator::new()),
            cancel,
            run_id: new_run_id(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn cleanup_registry(&self) -> Arc<CleanupRegistry> {
        self.cleanup.clone()
    }

    /// Every suite is parsed and validated before any container work starts.
    /// Invalid suites are reported as configuration failures and skipped.
    fn plan(&self, sources: Vec<SuiteSource>) -> (Vec<Planned>, Vec<SuiteResult>) {
        let mut planned = Vec::new();
        let mut rejected = Vec::new();
        let mut seen = HashSet::new();

        for source in sources {
            let (spec, path) = match source {
                SuiteSource::Spec(spec) => (spec, None),
                SuiteSource::File(file) => match parse_suite_file(&file.path) {
                    Ok(spec) => (spec, Some(file.path)),
                    Err(e) => {
                        rejected.push(SuiteResult::config_failure(
                            &file.name,
                            Some(file.path),
                            CoreError::from(e).to_string(),
                        ));
                        continue;
                    }
                },
            };
            if let Err(e) = check_suite(&spec, &self.registries) {
                rejected.push(SuiteResult::config_failure(&spec.name, path, e.to_string()));
                continue;
            }
            if !seen.insert(spec.name.clone()) {
                let msg = format!("configuration error: duplicate suite name '{}'", spec.name);
                rejected.push(SuiteResult::config_failure(&spec.name, path, msg));
                continue;
            }
            planned.push(Planned { spec, path });
        }
        (planned, rejected)
    }

    pub async fn run(
        &self,
        sources: Vec<SuiteSource>,
        bus: EventBus,
    ) -> Result<RunSummary, CoreError> {
        let (events, dispatch) = bus.start(&self.run_id);
        let (planned, rejected) = self.plan(sources);
        for result in rejected {
            let name = result.name.clone();
            warn!(suite = %name, "{}", result.config_error.as_deref().unwrap_or_default());
            events.emit(&name, None, EventKind::SuiteFinished { result });
        }

        let ctx = RunContext {
            run_id: self.run_id.clone(),
            runtime: self.runtime.clone(),
            ports: self.ports.clone(),
            cleanup: self.cleanup.clone(),
            registries: self.registries.clone(),
            events: events.clone(),
            cancel: self.cancel.clone(),
            build_permits: Arc::new(Semaphore::new(self.config.build_permits())),
            retry: self.config.retry_policy(),
            build_timeout: self.config.build_timeout,
            startup_timeout: self.config.startup_timeout,
        };

        info!(
            run = %self.run_id,
            suites = planned.len(),
            parallel = self.config.parallel,
            "starting run"
        );
        if self.config.parallel {
            join_all(
                planned
                    .iter()
                    .map(|p| SuiteRunner::new(&ctx, &p.spec, p.path.clone()).run()),
            )
            .await;
        } else {
            for p in &planned {
                if self.cancel.is_cancelled() {
                    let mut result = SuiteResult::new(&p.spec.name);
                    result.path.clone_from(&p.path);
                    result.cancelled = true;
                    events.emit(&p.spec.name, None, EventKind::SuiteFinished { result });
                    continue;
                }
                SuiteRunner::new(&ctx, &p.spec, p.path.clone()).run().await;
            }
        }

        if self.cancel.is_cancelled() {
            events.emit("", None, EventKind::Cancelled);
        }
        // Anything still registered: failed removals, or units cut off mid-start.
        if !self.cleanup.is_empty() {
            let report = self.cleanup.cleanup_all().await;
            events.emit("", None, EventKind::CleanupFinished { report });
        }

        events.close();
        dispatch.join().await
    }
}
