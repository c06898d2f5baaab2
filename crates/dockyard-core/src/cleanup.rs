use chrono::{DateTime, Utc};
use dockyard_runtime::{ContainerRuntime, ResourceKind};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// One deletion obligation for a container or network created during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupTarget {
    pub kind: ResourceKind,
    pub id: String,
    pub name: String,
    pub suite: String,
    /// For containers, the network id the container is attached to.
    pub network: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CleanupTarget {
    pub fn container(id: &str, name: &str, suite: &str, network: Option<&str>) -> Self {
        Self {
            kind: ResourceKind::Container,
            id: id.to_owned(),
            name: name.to_owned(),
            suite: suite.to_owned(),
            network: network.map(str::to_owned),
            created_at: Utc::now(),
        }
    }

    pub fn network(id: &str, name: &str, suite: &str) -> Self {
        Self {
            kind: ResourceKind::Network,
            id: id.to_owned(),
            name: name.to_owned(),
            suite: suite.to_owned(),
            network: None,
            created_at: Utc::now(),
        }
    }
}

/// A resource that could not be removed, with its identity and the cause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupFailure {
    pub kind: ResourceKind,
    pub id: String,
    pub name: String,
    pub reason: String,
}

impl fmt::Display for CleanupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({}): {}",
            self.kind,
            self.name,
            short_id(&self.id),
            self.reason
        )
    }
}

pub(crate) fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub removed_containers: usize,
    pub removed_networks: usize,
    pub failures: Vec<CleanupFailure>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn removed(&self) -> usize {
        self.removed_containers + self.removed_networks
    }

    pub fn merge(&mut self, other: Self) {
        self.removed_containers += other.removed_containers;
        self.removed_networks += other.removed_networks;
        self.failures.extend(other.failures);
    }
}

/// Process-wide ledger of resources to tear down.
///
/// Teardown always removes every selected container before any network, and a
/// network is not attempted while one of its containers is still registered.
/// Entries are dropped only once their removal is confirmed (or the runtime
/// reports the resource already gone), so a failed removal is retried by the
/// next cleanup call.
pub struct CleanupRegistry {
    runtime: Arc<dyn ContainerRuntime>,
    targets: Mutex<Vec<CleanupTarget>>,
}

impl CleanupRegistry {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            targets: Mutex::new(Vec::new()),
        }
    }

    fn targets(&self) -> MutexGuard<'_, Vec<CleanupTarget>> {
        self.targets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, target: CleanupTarget) {
        debug!(
            kind = %target.kind,
            id = short_id(&target.id),
            suite = %target.suite,
            "registered cleanup target"
        );
        let mut targets = self.targets();
        if !targets.iter().any(|t| t.id == target.id) {
            targets.push(target);
        }
    }

    /// Drop an entry whose resource the caller has already deleted.
    pub fn release(&self, id: &str) {
        self.targets().retain(|t| t.id != id);
    }

    pub fn tracks(&self, id: &str) -> bool {
        self.targets().iter().any(|t| t.id == id)
    }

    pub fn len(&self) -> usize {
        self.targets().len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets().is_empty()
    }

    pub fn snapshot(&self) -> Vec<CleanupTarget> {
        self.targets().clone()
    }

    /// Remove everything registered, across all suites.
    pub async fn cleanup_all(&self) -> CleanupReport {
        self.cleanup_where(|_| true).await
    }

    /// Remove everything registered by one suite.
    pub async fn cleanup_suite(&self, suite: &str) -> CleanupReport {
        self.cleanup_where(|t| t.suite == suite).await
    }

    async fn cleanup_where(&self, select: impl Fn(&CleanupTarget) -> bool) -> CleanupReport {
        let mut report = CleanupReport::default();
        let selected: Vec<CleanupTarget> =
            self.targets().iter().filter(|t| select(t)).cloned().collect();
        if selected.is_empty() {
            return report;
        }

        let mut removed: HashSet<String> = HashSet::new();
        // Networks that still hold a container we failed to remove.
        let mut blocked: HashSet<String> = HashSet::new();

        for target in selected.iter().filter(|t| t.kind == ResourceKind::Container) {
            match self.runtime.remove_container(&target.id).await {
                Ok(()) => {
                    report.removed_containers += 1;
                    removed.insert(target.id.clone());
                }
                Err(e) if e.is_not_found() => {
                    debug!(container = short_id(&target.id), "container already removed");
                    removed.insert(target.id.clone());
                }
                Err(e) => {
                    warn!(container = %target.name, "failed to remove container: {e}");
                    if let Some(net) = &target.network {
                        blocked.insert(net.clone());
                    }
                    report.failures.push(CleanupFailure {
                        kind: ResourceKind::Container,
                        id: target.id.clone(),
                        name: target.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        // Containers registered by other suites or outside the selection can
        // still reference a selected network.
        for other in self.targets().iter() {
            if other.kind == ResourceKind::Container && !removed.contains(&other.id) {
                if let Some(net) = &other.network {
                    blocked.insert(net.clone());
                }
            }
        }

        for target in selected.iter().filter(|t| t.kind == ResourceKind::Network) {
            if blocked.contains(&target.id) {
                warn!(network = %target.name, "skipping network removal, containers still attached");
                report.failures.push(CleanupFailure {
                    kind: ResourceKind::Network,
                    id: target.id.clone(),
                    name: target.name.clone(),
                    reason: "not attempted: attached containers could not be removed".to_owned(),
                });
                continue;
            }
            match self.runtime.remove_network(&target.id).await {
                Ok(()) => {
                    report.removed_networks += 1;
                    removed.insert(target.id.clone());
                }
                Err(e) if e.is_not_found() => {
                    debug!(network = short_id(&target.id), "network already removed");
                    removed.insert(target.id.clone());
                }
                Err(e) => {
                    warn!(network = %target.name, "failed to remove network: {e}");
                    report.failures.push(CleanupFailure {
                        kind: ResourceKind::Network,
                        id: target.id.clone(),
                        name: target.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        self.targets().retain(|t| !removed.contains(&t.id));
        info!(
            containers = report.removed_containers,
            networks = report.removed_networks,
            failed = report.failures.len(),
            "cleanup finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockyard_runtime::{managed_labels, ContainerSpec, MockRuntime, NetworkSpec};

    async fn setup(mock: &Arc<MockRuntime>, registry: &CleanupRegistry, suite: &str) -> String {
        let net = mock
            .create_network(&NetworkSpec {
                name: format!("{suite}-net"),
                labels: managed_labels(suite, "r"),
            })
            .await
            .unwrap();
        // Network registered first: ordering must not depend on registration order.
        registry.register(CleanupTarget::network(&net, &format!("{suite}-net"), suite));
        for i in 0..2 {
            let name = format!("{suite}-c{i}");
            let id = mock
                .create_container(&ContainerSpec {
                    name: name.clone(),
                    image: "alpine".into(),
                    network: Some(net.clone()),
                    ..Default::default()
                })
                .await
                .unwrap();
            registry.register(CleanupTarget::container(&id, &name, suite, Some(&net)));
        }
        net
    }

    #[tokio::test]
    async fn containers_removed_before_networks() {
        let mock = Arc::new(MockRuntime::new());
        let registry = CleanupRegistry::new(mock.clone());
        setup(&mock, &registry, "s").await;

        let report = registry.cleanup_all().await;
        assert!(report.is_clean(), "{:?}", report.failures);
        assert_eq!(report.removed_containers, 2);
        assert_eq!(report.removed_networks, 1);

        let kinds: Vec<_> = mock.attempts().into_iter().map(|(k, _)| k).collect();
        assert_eq!(
            kinds,
            vec![
                ResourceKind::Container,
                ResourceKind::Container,
                ResourceKind::Network
            ]
        );
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn cleanup_all_is_idempotent() {
        let mock = Arc::new(MockRuntime::new());
        let registry = CleanupRegistry::new(mock.clone());
        setup(&mock, &registry, "s").await;

        registry.cleanup_all().await;
        let attempts = mock.attempts().len();
        let second = registry.cleanup_all().await;
        assert_eq!(second.removed(), 0);
        assert!(second.is_clean());
        assert_eq!(mock.attempts().len(), attempts);
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_rest() {
        let mock = Arc::new(MockRuntime::new());
        let registry = CleanupRegistry::new(mock.clone());
        let net = setup(&mock, &registry, "s").await;
        mock.fail_removal("s-c0");

        let report = registry.cleanup_all().await;
        assert_eq!(report.removed_containers, 1);
        assert_eq!(report.removed_networks, 0);
        assert_eq!(report.failures.len(), 2);
        assert!(report.failures[0].to_string().contains("s-c0"));
        assert_eq!(report.failures[1].kind, ResourceKind::Network);

        // The network was never attempted and both entries stay registered.
        assert!(!mock.attempts().iter().any(|(_, id)| id == &net));
        assert_eq!(registry.len(), 2);

        mock.clear_failures();
        let retry = registry.cleanup_all().await;
        assert!(retry.is_clean());
        assert_eq!(retry.removed(), 2);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn cleanup_suite_leaves_other_suites() {
        let mock = Arc::new(MockRuntime::new());
        let registry = CleanupRegistry::new(mock.clone());
        setup(&mock, &registry, "a").await;
        setup(&mock, &registry, "b").await;

        let report = registry.cleanup_suite("a").await;
        assert_eq!(report.removed(), 3);
        assert_eq!(registry.len(), 3);
        assert!(registry.snapshot().iter().all(|t| t.suite == "b"));
    }

    #[tokio::test]
    async fn already_removed_resources_are_released() {
        let mock = Arc::new(MockRuntime::new());
        let registry = CleanupRegistry::new(mock.clone());
        registry.register(CleanupTarget::container("gone", "gone", "s", None));
        let report = registry.cleanup_all().await;
        assert!(report.is_clean());
        assert_eq!(report.removed(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn duplicate_registration_is_ignored() {
        let registry = CleanupRegistry::new(Arc::new(MockRuntime::new()));
        registry.register(CleanupTarget::network("n1", "net", "s"));
        registry.register(CleanupTarget::network("n1", "net", "s"));
        assert_eq!(registry.len(), 1);
        assert!(registry.tracks("n1"));
        registry.release("n1");
        assert!(!registry.tracks("n1"));
    }
}
