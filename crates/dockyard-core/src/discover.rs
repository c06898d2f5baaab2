use crate::cleanup::CleanupRegistry;
use crate::CoreError;
use chrono::{DateTime, Utc};
use dockyard_runtime::{managed_filter, ContainerRuntime, ResourceSummary};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceScope {
    Containers,
    Networks,
    #[default]
    All,
}

impl ResourceScope {
    pub fn containers(self) -> bool {
        matches!(self, Self::Containers | Self::All)
    }

    pub fn networks(self) -> bool {
        matches!(self, Self::Networks | Self::All)
    }
}

impl FromStr for ResourceScope {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "containers" => Ok(Self::Containers),
            "networks" => Ok(Self::Networks),
            "all" => Ok(Self::All),
            other => Err(CoreError::Config(format!(
                "unknown resource scope '{other}' (expected: networks, containers, all)"
            ))),
        }
    }
}

impl fmt::Display for ResourceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Containers => "containers",
            Self::Networks => "networks",
            Self::All => "all",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoverOptions {
    pub scope: ResourceScope,
    /// Minimum age for an untracked resource to count as orphaned.
    pub older_than: Duration,
    /// Skip the age check: every untracked resource is orphaned.
    pub include_all: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Discovery {
    pub containers: Vec<ResourceSummary>,
    pub networks: Vec<ResourceSummary>,
    /// Resources skipped because a live cleanup registry still owns them.
    pub tracked: usize,
    /// Resources skipped for being younger than the age threshold.
    pub too_young: usize,
    /// Networks still joined by a managed container outside `containers`.
    #[serde(skip)]
    pub attached_networks: BTreeSet<String>,
}

impl Discovery {
    pub fn is_empty(&self) -> bool {
        self.containers.is_empty() && self.networks.is_empty()
    }

    pub fn total(&self) -> usize {
        self.containers.len() + self.networks.len()
    }
}

/// Scans the runtime for resources carrying the managed label.
pub struct ResourceDiscoverer {
    runtime: Arc<dyn ContainerRuntime>,
    registry: Option<Arc<CleanupRegistry>>,
}

impl ResourceDiscoverer {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            registry: None,
        }
    }

    /// Resources tracked by `registry` are never reported as orphans.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<CleanupRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub async fn discover(&self, opts: &DiscoverOptions) -> Result<Discovery, CoreError> {
        self.discover_at(opts, Utc::now()).await
    }

    pub async fn discover_at(
        &self,
        opts: &DiscoverOptions,
        now: DateTime<Utc>,
    ) -> Result<Discovery, CoreError> {
        let filter = managed_filter();
        let mut discovery = Discovery::default();

        // Containers are listed for every scope so networks they still join
        // are never handed to the orchestrator as removable.
        let listed = self.runtime.list_containers(&filter).await?;
        let (mut tracked, mut too_young) = (0, 0);
        let orphans = self.classify(listed.clone(), opts, now, &mut tracked, &mut too_young);
        let kept: Vec<&ResourceSummary> = if opts.scope.containers() {
            discovery.tracked += tracked;
            discovery.too_young += too_young;
            listed.iter().filter(|c| !orphans.iter().any(|o| o.id == c.id)).collect()
        } else {
            listed.iter().collect()
        };
        discovery.attached_networks = kept
            .into_iter()
            .flat_map(|c| c.networks.iter().cloned())
            .collect();
        if opts.scope.containers() {
            discovery.containers = orphans;
        }
        if opts.scope.networks() {
            let listed = self.runtime.list_networks(&filter).await?;
            discovery.networks = self.classify(
                listed,
                opts,
                now,
                &mut discovery.tracked,
                &mut discovery.too_young,
            );
        }

        debug!(
            containers = discovery.containers.len(),
            networks = discovery.networks.len(),
            tracked = discovery.tracked,
            too_young = discovery.too_young,
            attached = discovery.attached_networks.len(),
            "discovery finished"
        );
        Ok(discovery)
    }

    fn classify(
        &self,
        listed: Vec<ResourceSummary>,
        opts: &DiscoverOptions,
        now: DateTime<Utc>,
        tracked: &mut usize,
        too_young: &mut usize,
    ) -> Vec<ResourceSummary> {
        let mut orphans = Vec::new();
        for resource in listed {
            if self.registry.as_ref().is_some_and(|r| r.tracks(&resource.id)) {
                *tracked += 1;
            } else if opts.include_all || resource.age(now) >= opts.older_than {
                orphans.push(resource);
            } else {
                *too_young += 1;
            }
        }
        orphans.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        orphans
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleanup::CleanupTarget;
    use dockyard_runtime::{managed_labels, MockRuntime};
    use std::collections::BTreeMap;

    fn aged(mock: &MockRuntime, now: DateTime<Utc>) {
        let old = now - chrono::Duration::hours(2);
        let fresh = now - chrono::Duration::minutes(5);
        let net = mock.seed_network("old-net", managed_labels("s", "r1"), old);
        mock.seed_container("old-c", managed_labels("s", "r1"), Some(&net), old);
        mock.seed_container("fresh-c", managed_labels("s", "r2"), None, fresh);
        mock.seed_container("foreign", BTreeMap::new(), None, old);
    }

    #[tokio::test]
    async fn age_threshold_rule() {
        let now = Utc::now();
        let mock = Arc::new(MockRuntime::new());
        aged(&mock, now);
        let discoverer = ResourceDiscoverer::new(mock.clone());

        let opts = DiscoverOptions {
            older_than: Duration::from_secs(3600),
            ..DiscoverOptions::default()
        };
        let found = discoverer.discover_at(&opts, now).await.unwrap();
        assert_eq!(found.containers.len(), 1);
        assert_eq!(found.containers[0].name, "old-c");
        assert_eq!(found.networks.len(), 1);
        assert_eq!(found.too_young, 1);

        let all = DiscoverOptions {
            include_all: true,
            ..opts
        };
        let found = discoverer.discover_at(&all, now).await.unwrap();
        assert_eq!(found.containers.len(), 2);
    }

    #[tokio::test]
    async fn unmanaged_resources_are_never_listed() {
        let now = Utc::now();
        let mock = Arc::new(MockRuntime::new());
        aged(&mock, now);
        let found = ResourceDiscoverer::new(mock)
            .discover_at(&DiscoverOptions::default(), now)
            .await
            .unwrap();
        assert!(found.containers.iter().all(|c| c.name != "foreign"));
    }

    #[tokio::test]
    async fn tracked_resources_are_excluded_even_when_old() {
        let now = Utc::now();
        let mock = Arc::new(MockRuntime::new());
        let id = mock.seed_network("live", managed_labels("s", "r"), now - chrono::Duration::days(1));
        let registry = Arc::new(CleanupRegistry::new(mock.clone()));
        registry.register(CleanupTarget::network(&id, "live", "s"));

        let found = ResourceDiscoverer::new(mock)
            .with_registry(registry)
            .discover_at(
                &DiscoverOptions {
                    include_all: true,
                    ..DiscoverOptions::default()
                },
                now,
            )
            .await
            .unwrap();
        assert!(found.networks.is_empty());
        assert_eq!(found.tracked, 1);
    }

    #[tokio::test]
    async fn scope_limits_listing() {
        let now = Utc::now();
        let mock = Arc::new(MockRuntime::new());
        aged(&mock, now);
        let found = ResourceDiscoverer::new(mock)
            .discover_at(
                &DiscoverOptions {
                    scope: ResourceScope::Networks,
                    include_all: true,
                    ..DiscoverOptions::default()
                },
                now,
            )
            .await
            .unwrap();
        assert!(found.containers.is_empty());
        assert_eq!(found.networks.len(), 1);
        assert!(found.attached_networks.contains(&found.networks[0].id));
        assert_eq!(found.too_young, 0);
    }

    #[tokio::test]
    async fn young_container_marks_its_network_attached() {
        let now = Utc::now();
        let mock = Arc::new(MockRuntime::new());
        aged(&mock, now);
        let net = mock.seed_network(
            "busy-net",
            managed_labels("s", "r3"),
            now - chrono::Duration::hours(3),
        );
        mock.seed_container(
            "busy-c",
            managed_labels("s", "r3"),
            Some(&net),
            now - chrono::Duration::minutes(1),
        );

        let found = ResourceDiscoverer::new(mock)
            .discover_at(
                &DiscoverOptions {
                    older_than: Duration::from_secs(3600),
                    ..DiscoverOptions::default()
                },
                now,
            )
            .await
            .unwrap();
        assert!(found.containers.iter().all(|c| c.name != "busy-c"));
        assert!(found.networks.iter().any(|n| n.id == net));
        assert!(found.attached_networks.contains(&net));
        // old-c is an orphan itself, so old-net is not held.
        let old_net = found.networks.iter().find(|n| n.name == "old-net").unwrap();
        assert!(!found.attached_networks.contains(&old_net.id));
    }

    #[test]
    fn scope_parsing() {
        assert_eq!("all".parse::<ResourceScope>().unwrap(), ResourceScope::All);
        assert!("volumes".parse::<ResourceScope>().is_err());
        assert!(ResourceScope::All.containers() && ResourceScope::All.networks());
        assert!(!ResourceScope::Networks.containers());
    }
}
