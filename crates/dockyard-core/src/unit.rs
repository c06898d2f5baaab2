use crate::cleanup::CleanupRegistry;
use crate::lifecycle::{validate_transition, UnitState};
use crate::CoreError;
use async_trait::async_trait;
use dockyard_runtime::labels::LABEL_UNIT;
use dockyard_runtime::{managed_labels, resource_name, ContainerRuntime, PortAllocator};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Everything a unit needs to create its infrastructure in a suite network.
#[derive(Clone)]
pub struct StartContext {
    pub suite: String,
    pub run_id: String,
    pub attempt: u32,
    /// Id of the suite network the unit must attach to.
    pub network: String,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub ports: Arc<PortAllocator>,
    pub cleanup: Arc<CleanupRegistry>,
    pub cancel: CancellationToken,
}

impl StartContext {
    /// Labels for a resource owned by `unit`.
    pub fn labels(&self, unit: &str) -> BTreeMap<String, String> {
        let mut labels = managed_labels(&self.suite, &self.run_id);
        labels.insert(LABEL_UNIT.to_owned(), unit.to_owned());
        labels
    }

    /// Runtime name for a resource owned by `unit`, distinct per setup attempt.
    pub fn resource_name(&self, unit: &str) -> String {
        if self.attempt > 1 {
            resource_name(&self.suite, &format!("{unit}-a{}", self.attempt), &self.run_id)
        } else {
            resource_name(&self.suite, unit, &self.run_id)
        }
    }
}

/// A service instance participating in a suite.
///
/// Implementations register every resource they create with
/// `StartContext::cleanup` before returning from `start`, so the resource is
/// torn down even if the unit itself is never stopped.
#[async_trait]
pub trait Unit: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> &str;

    /// Overrides the runner's default readiness deadline.
    fn startup_timeout(&self) -> Option<Duration> {
        None
    }

    /// Create the underlying infrastructure. Returns once creation is
    /// accepted, not necessarily when the service is ready.
    async fn start(&mut self, ctx: &StartContext) -> Result<(), CoreError>;

    /// Block until the unit's readiness probe succeeds. The caller bounds this
    /// with the startup timeout.
    async fn wait_for_ready(&mut self, cancel: &CancellationToken) -> Result<(), CoreError>;

    /// Named connection property, such as `host`, `port` or `url`.
    fn get(&self, variable: &str) -> Result<String, CoreError>;

    /// Best-effort teardown. Must tolerate a unit that never became ready.
    async fn stop(&mut self) -> Result<(), CoreError>;
}

async fn bounded<T>(
    unit: &str,
    operation: &str,
    limit: Duration,
    cancel: &CancellationToken,
    fut: impl std::future::Future<Output = Result<T, CoreError>>,
) -> Result<T, CoreError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(CoreError::Cancelled),
        res = tokio::time::timeout(limit, fut) => res.unwrap_or_else(|_| {
            Err(CoreError::Timeout {
                unit: unit.to_owned(),
                operation: operation.to_owned(),
                after: limit,
            })
        }),
    }
}

/// Owns one unit and enforces the lifecycle state machine around it.
pub struct UnitSlot {
    unit: Box<dyn Unit>,
    state: UnitState,
}

impl UnitSlot {
    pub fn new(unit: Box<dyn Unit>) -> Self {
        Self {
            unit,
            state: UnitState::Uninitialized,
        }
    }

    pub fn name(&self) -> &str {
        self.unit.name()
    }

    pub fn state(&self) -> UnitState {
        self.state
    }

    pub fn unit(&self) -> &dyn Unit {
        self.unit.as_ref()
    }

    fn transition(&mut self, to: UnitState) -> Result<(), CoreError> {
        validate_transition(self.unit.name(), self.state, to)?;
        self.state = to;
        Ok(())
    }

    /// `Start`, bounded by the build timeout and the cancellation token.
    pub async fn start(
        &mut self,
        ctx: &StartContext,
        build_timeout: Duration,
    ) -> Result<(), CoreError> {
        self.transition(UnitState::Starting)?;
        let name = self.unit.name().to_owned();
        let res = bounded(&name, "start", build_timeout, &ctx.cancel, self.unit.start(ctx)).await;
        if res.is_err() {
            self.state = UnitState::Failed;
        }
        res
    }

    /// `WaitForReady`, bounded by the unit's own startup timeout or `default_timeout`.
    pub async fn wait_for_ready(
        &mut self,
        cancel: &CancellationToken,
        default_timeout: Duration,
    ) -> Result<(), CoreError> {
        if self.state != UnitState::Starting {
            return Err(CoreError::InvalidTransition {
                unit: self.unit.name().to_owned(),
                from: self.state,
                to: UnitState::Ready,
            });
        }
        let limit = self.unit.startup_timeout().unwrap_or(default_timeout);
        let name = self.unit.name().to_owned();
        let res = bounded(
            &name,
            "wait for ready",
            limit,
            cancel,
            self.unit.wait_for_ready(cancel),
        )
        .await;
        match res {
            Ok(()) => self.transition(UnitState::Ready),
            Err(e) => {
                self.state = UnitState::Failed;
                Err(e)
            }
        }
    }

    /// Stop the unit. Calling this on a stopped unit is a no-op, and a unit
    /// that never started is marked stopped without touching the adapter.
    pub async fn stop(&mut self) -> Result<(), CoreError> {
        match self.state {
            UnitState::Stopped => {
                debug!(unit = %self.unit.name(), "unit already stopped");
                Ok(())
            }
            UnitState::Uninitialized => self.transition(UnitState::Stopped),
            _ => {
                let res = self.unit.stop().await;
                if let Err(e) = &res {
                    warn!(unit = %self.unit.name(), "stop failed: {e}");
                }
                self.state = UnitState::Stopped;
                res
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockyard_runtime::MockRuntime;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Probe {
        stops: Arc<AtomicUsize>,
        ready_after: Option<Duration>,
    }

    #[async_trait]
    impl Unit for Probe {
        fn name(&self) -> &str {
            "probe"
        }
        fn kind(&self) -> &str {
            "probe"
        }
        async fn start(&mut self, _ctx: &StartContext) -> Result<(), CoreError> {
            Ok(())
        }
        async fn wait_for_ready(&mut self, cancel: &CancellationToken) -> Result<(), CoreError> {
            match self.ready_after {
                Some(d) => {
                    tokio::time::sleep(d).await;
                    Ok(())
                }
                None => {
                    cancel.cancelled().await;
                    Err(CoreError::Cancelled)
                }
            }
        }
        fn get(&self, variable: &str) -> Result<String, CoreError> {
            Err(CoreError::UnknownVariable {
                unit: "probe".into(),
                variable: variable.into(),
            })
        }
        async fn stop(&mut self) -> Result<(), CoreError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn ctx(cancel: CancellationToken) -> StartContext {
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(MockRuntime::new());
        StartContext {
            suite: "s".into(),
            run_id: "r".into(),
            attempt: 1,
            network: "n".into(),
            cleanup: Arc::new(CleanupRegistry::new(runtime.clone())),
            runtime,
            ports: Arc::new(PortAllocator::new()),
            cancel,
        }
    }

    fn slot(ready_after: Option<Duration>) -> (UnitSlot, Arc<AtomicUsize>) {
        let stops = Arc::new(AtomicUsize::new(0));
        let unit = Probe {
            stops: stops.clone(),
            ready_after,
        };
        (UnitSlot::new(Box::new(unit)), stops)
    }

    #[tokio::test]
    async fn stop_zero_one_or_two_times() {
        let (mut never, stops) = slot(Some(Duration::ZERO));
        never.stop().await.unwrap();
        assert_eq!(stops.load(Ordering::SeqCst), 0);
        assert_eq!(never.state(), UnitState::Stopped);

        let (mut ready, stops) = slot(Some(Duration::ZERO));
        let c = ctx(CancellationToken::new());
        ready.start(&c, Duration::from_secs(5)).await.unwrap();
        ready
            .wait_for_ready(&c.cancel, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(ready.state(), UnitState::Ready);
        ready.stop().await.unwrap();
        ready.stop().await.unwrap();
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn readiness_timeout_names_the_unit() {
        let (mut s, _) = slot(Some(Duration::from_secs(30)));
        let c = ctx(CancellationToken::new());
        s.start(&c, Duration::from_secs(5)).await.unwrap();
        let err = s
            .wait_for_ready(&c.cancel, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Timeout { .. }));
        assert!(err.to_string().contains("probe"));
        assert_eq!(s.state(), UnitState::Failed);
        s.stop().await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_interrupts_wait() {
        let (mut s, _) = slot(None);
        let cancel = CancellationToken::new();
        let c = ctx(cancel.clone());
        s.start(&c, Duration::from_secs(5)).await.unwrap();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let err = s
            .wait_for_ready(&cancel, Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Cancelled));
    }

    #[tokio::test]
    async fn wait_before_start_is_rejected() {
        let (mut s, _) = slot(Some(Duration::ZERO));
        let err = s
            .wait_for_ready(&CancellationToken::new(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
    }

    #[test]
    fn resource_names_vary_by_attempt() {
        let mut c = ctx(CancellationToken::new());
        assert_eq!(c.resource_name("db"), "dockyard-s-db-r");
        c.attempt = 2;
        assert_eq!(c.resource_name("db"), "dockyard-s-db-a2-r");
        assert_eq!(c.labels("db").get(LABEL_UNIT).map(String::as_str), Some("db"));
    }
}
