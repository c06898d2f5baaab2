use crate::cleanup::{short_id, CleanupFailure};
use crate::discover::Discovery;
use dockyard_runtime::{ContainerRuntime, ResourceKind, ResourceSummary};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindCounts {
    pub found: usize,
    pub removed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupResult {
    pub dry_run: bool,
    pub containers: KindCounts,
    pub networks: KindCounts,
    pub failures: Vec<CleanupFailure>,
    #[serde(rename = "duration_ms", serialize_with = "crate::results::serialize_ms")]
    pub duration: Duration,
}

impl CleanupResult {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Removes what a `ResourceDiscoverer` found, containers before networks.
pub struct CleanupOrchestrator {
    runtime: Arc<dyn ContainerRuntime>,
}

impl CleanupOrchestrator {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    pub async fn execute(&self, discovery: &Discovery, dry_run: bool) -> CleanupResult {
        self.execute_with_cancel(discovery, dry_run, || false).await
    }

    /// `should_stop` is checked before each removal; remaining resources are
    /// left in place and not counted as failed.
    pub async fn execute_with_cancel(
        &self,
        discovery: &Discovery,
        dry_run: bool,
        should_stop: impl Fn() -> bool,
    ) -> CleanupResult {
        let started = Instant::now();
        let mut result = CleanupResult {
            dry_run,
            containers: KindCounts {
                found: discovery.containers.len(),
                ..KindCounts::default()
            },
            networks: KindCounts {
                found: discovery.networks.len(),
                ..KindCounts::default()
            },
            ..CleanupResult::default()
        };

        if dry_run {
            for r in discovery.containers.iter().chain(&discovery.networks) {
                debug!(kind = %r.kind, name = %r.name, id = short_id(&r.id), "would remove");
            }
            result.duration = started.elapsed();
            return result;
        }

        let mut blocked: HashSet<&str> =
            discovery.attached_networks.iter().map(String::as_str).collect();
        for container in &discovery.containers {
            if should_stop() {
                break;
            }
            match self.remove(container).await {
                Ok(()) => result.containers.removed += 1,
                Err(failure) => {
                    blocked.extend(container.networks.iter().map(String::as_str));
                    result.containers.failed += 1;
                    result.failures.push(failure);
                }
            }
        }

        for network in &discovery.networks {
            if should_stop() {
                break;
            }
            if blocked.contains(network.id.as_str()) {
                result.networks.failed += 1;
                result.failures.push(CleanupFailure {
                    kind: ResourceKind::Network,
                    id: network.id.clone(),
                    name: network.name.clone(),
                    reason: "not attempted: containers are still attached".to_owned(),
                });
                continue;
            }
            match self.remove(network).await {
                Ok(()) => result.networks.removed += 1,
                Err(failure) => {
                    result.networks.failed += 1;
                    result.failures.push(failure);
                }
            }
        }

        result.duration = started.elapsed();
        info!(
            containers_removed = result.containers.removed,
            networks_removed = result.networks.removed,
            failed = result.failures.len(),
            "orphan cleanup finished"
        );
        result
    }

    async fn remove(&self, resource: &ResourceSummary) -> Result<(), CleanupFailure> {
        match self.runtime.remove(resource.kind, &resource.id).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(kind = %resource.kind, name = %resource.name, "already removed");
                Ok(())
            }
            Err(e) => {
                warn!(kind = %resource.kind, name = %resource.name, "removal failed: {e}");
                Err(CleanupFailure {
                    kind: resource.kind,
                    id: resource.id.clone(),
                    name: resource.name.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discover::{DiscoverOptions, ResourceDiscoverer};
    use chrono::Utc;
    use dockyard_runtime::{managed_labels, MockRuntime};

    fn seed(mock: &MockRuntime, containers: usize, networks: usize) {
        let old = Utc::now() - chrono::Duration::hours(1);
        let mut nets = Vec::new();
        for i in 0..networks {
            nets.push(mock.seed_network(&format!("net{i}"), managed_labels("s", "r"), old));
        }
        for i in 0..containers {
            let net = nets.get(i % networks.max(1)).map(String::as_str);
            mock.seed_container(&format!("c{i}"), managed_labels("s", "r"), net, old);
        }
    }

    async fn discover(mock: &Arc<MockRuntime>) -> Discovery {
        ResourceDiscoverer::new(mock.clone())
            .discover(&DiscoverOptions::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn dry_run_reports_and_keeps_everything() {
        let mock = Arc::new(MockRuntime::new());
        seed(&mock, 3, 2);
        let found = discover(&mock).await;
        let result = CleanupOrchestrator::new(mock.clone()).execute(&found, true).await;

        assert!(result.dry_run);
        assert_eq!(result.containers.found, 3);
        assert_eq!(result.networks.found, 2);
        assert_eq!(result.containers.removed + result.networks.removed, 0);
        assert_eq!(mock.container_count(), 3);
        assert_eq!(mock.network_count(), 2);
        assert!(mock.attempts().is_empty());
    }

    #[tokio::test]
    async fn removes_containers_then_networks() {
        let mock = Arc::new(MockRuntime::new());
        seed(&mock, 3, 2);
        let found = discover(&mock).await;
        let result = CleanupOrchestrator::new(mock.clone()).execute(&found, false).await;

        assert!(result.is_clean(), "{:?}", result.failures);
        assert_eq!(result.containers.removed, 3);
        assert_eq!(result.networks.removed, 2);
        let kinds: Vec<_> = mock.attempts().into_iter().map(|(k, _)| k).collect();
        let first_net = kinds.iter().position(|k| *k == ResourceKind::Network).unwrap();
        assert!(kinds[first_net..].iter().all(|k| *k == ResourceKind::Network));
    }

    #[tokio::test]
    async fn failures_are_counted_and_named() {
        let mock = Arc::new(MockRuntime::new());
        seed(&mock, 2, 1);
        mock.fail_removal("c0");
        let found = discover(&mock).await;
        let result = CleanupOrchestrator::new(mock.clone()).execute(&found, false).await;

        assert_eq!(result.containers.removed, 1);
        assert_eq!(result.containers.failed, 1);
        assert_eq!(result.networks.failed, 1);
        assert!(result.failures.iter().any(|f| f.name == "c0"));
        for counts in [result.containers, result.networks] {
            assert!(counts.removed + counts.failed <= counts.found);
        }
    }

    #[tokio::test]
    async fn network_held_by_young_container_is_not_attempted() {
        let mock = Arc::new(MockRuntime::new());
        let now = Utc::now();
        let net = mock.seed_network("n", managed_labels("s", "r"), now - chrono::Duration::hours(2));
        let young = now - chrono::Duration::minutes(1);
        mock.seed_container("c", managed_labels("s", "r"), Some(&net), young);
        let found = ResourceDiscoverer::new(mock.clone())
            .discover_at(
                &DiscoverOptions {
                    older_than: Duration::from_secs(3600),
                    ..DiscoverOptions::default()
                },
                now,
            )
            .await
            .unwrap();
        assert!(found.containers.is_empty());
        assert_eq!(found.networks.len(), 1);

        let result = CleanupOrchestrator::new(mock.clone()).execute(&found, false).await;
        assert!(mock.attempts().is_empty(), "{:?}", mock.attempts());
        assert_eq!(result.networks.removed, 0);
        assert_eq!(result.networks.failed, 1);
        assert!(result.failures[0].reason.starts_with("not attempted"));
        assert_eq!(mock.network_count(), 1);
    }

    #[tokio::test]
    async fn networks_scope_respects_unlisted_containers() {
        let mock = Arc::new(MockRuntime::new());
        seed(&mock, 1, 2);
        let found = ResourceDiscoverer::new(mock.clone())
            .discover(&DiscoverOptions {
                scope: crate::discover::ResourceScope::Networks,
                ..DiscoverOptions::default()
            })
            .await
            .unwrap();
        let result = CleanupOrchestrator::new(mock.clone()).execute(&found, false).await;
        assert_eq!(result.networks.found, 2);
        assert_eq!(result.networks.removed, 1);
        assert_eq!(result.networks.failed, 1);
        assert_eq!(mock.container_count(), 1);
        assert_eq!(mock.network_count(), 1);
    }

    #[tokio::test]
    async fn stop_request_leaves_the_rest() {
        let mock = Arc::new(MockRuntime::new());
        seed(&mock, 2, 0);
        let found = discover(&mock).await;
        let result = CleanupOrchestrator::new(mock.clone())
            .execute_with_cancel(&found, false, || true)
            .await;
        assert_eq!(result.containers.removed, 0);
        assert_eq!(result.containers.failed, 0);
        assert_eq!(mock.container_count(), 2);
    }
}
