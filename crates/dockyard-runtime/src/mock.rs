use crate::backend::{
    ContainerRuntime, ContainerSpec, ContainerStatus, HealthState, NetworkSpec, ResourceKind,
    ResourceSummary,
};
use crate::RuntimeError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone)]
struct MockNetwork {
    name: String,
    labels: BTreeMap<String, String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct MockContainer {
    name: String,
    labels: BTreeMap<String, String>,
    network: Option<String>,
    running: bool,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MockState {
    networks: BTreeMap<String, MockNetwork>,
    containers: BTreeMap<String, MockContainer>,
    images: HashSet<String>,
    attempts: Vec<(ResourceKind, String)>,
    removals: Vec<(ResourceKind, String)>,
    fail_create: HashSet<String>,
    fail_removal: HashSet<String>,
    never_ready: HashSet<String>,
    counter: u64,
}

/// In-memory runtime used by tests and `DOCKYARD_RUNTIME=mock` runs.
///
/// Mirrors the Docker behaviours the orchestration core depends on: removing
/// a network that still has containers attached fails, and removing an
/// unknown resource fails with `NotFound`.
#[derive(Default)]
pub struct MockRuntime {
    state: Mutex<MockState>,
    removal_delay: Duration,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every removal sleeps this long before touching state.
    #[must_use]
    pub fn with_removal_delay(mut self, delay: Duration) -> Self {
        self.removal_delay = delay;
        self
    }

    async fn removal_latency(&self) {
        if !self.removal_delay.is_zero() {
            tokio::time::sleep(self.removal_delay).await;
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MockState>, RuntimeError> {
        self.state.lock().map_err(|e| RuntimeError::Unavailable {
            name: "mock".to_owned(),
            reason: format!("mutex poisoned: {e}"),
        })
    }

    fn next_id(state: &mut MockState, kind: ResourceKind, name: &str) -> String {
        state.counter += 1;
        blake3::hash(format!("mock-{kind}:{name}:{}", state.counter).as_bytes())
            .to_hex()
            .to_string()
    }

    /// Container creation for this name fails.
    pub fn fail_create(&self, container_name: &str) {
        if let Ok(mut s) = self.state.lock() {
            s.fail_create.insert(container_name.to_owned());
        }
    }

    /// Removal of the resource with this id or name fails until cleared.
    pub fn fail_removal(&self, id_or_name: &str) {
        if let Ok(mut s) = self.state.lock() {
            s.fail_removal.insert(id_or_name.to_owned());
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut s) = self.state.lock() {
            s.fail_create.clear();
            s.fail_removal.clear();
            s.never_ready.clear();
        }
    }

    /// Containers with this name report a health check stuck in `starting`.
    pub fn never_ready(&self, container_name: &str) {
        if let Ok(mut s) = self.state.lock() {
            s.never_ready.insert(container_name.to_owned());
        }
    }

    /// Insert a network as if a previous run had created it.
    pub fn seed_network(
        &self,
        name: &str,
        labels: BTreeMap<String, String>,
        created_at: DateTime<Utc>,
    ) -> String {
        let Ok(mut s) = self.state.lock() else {
            return String::new();
        };
        let id = Self::next_id(&mut s, ResourceKind::Network, name);
        s.networks.insert(
            id.clone(),
            MockNetwork {
                name: name.to_owned(),
                labels,
                created_at,
            },
        );
        id
    }

    pub fn seed_container(
        &self,
        name: &str,
        labels: BTreeMap<String, String>,
        network: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> String {
        let Ok(mut s) = self.state.lock() else {
            return String::new();
        };
        let id = Self::next_id(&mut s, ResourceKind::Container, name);
        s.containers.insert(
            id.clone(),
            MockContainer {
                name: name.to_owned(),
                labels,
                network: network.map(str::to_owned),
                running: true,
                created_at,
            },
        );
        id
    }

    pub fn exists(&self, id: &str) -> bool {
        self.state
            .lock()
            .is_ok_and(|s| s.containers.contains_key(id) || s.networks.contains_key(id))
    }

    pub fn container_count(&self) -> usize {
        self.state.lock().map_or(0, |s| s.containers.len())
    }

    pub fn network_count(&self) -> usize {
        self.state.lock().map_or(0, |s| s.networks.len())
    }

    /// Every removal attempted, successful or not, in call order.
    pub fn attempts(&self) -> Vec<(ResourceKind, String)> {
        self.state
            .lock()
            .map(|s| s.attempts.clone())
            .unwrap_or_default()
    }

    /// Successful removals in call order.
    pub fn removals(&self) -> Vec<(ResourceKind, String)> {
        self.state
            .lock()
            .map(|s| s.removals.clone())
            .unwrap_or_default()
    }

    pub fn pulled_images(&self) -> Vec<String> {
        let mut images: Vec<_> = self
            .state
            .lock()
            .map(|s| s.images.iter().cloned().collect())
            .unwrap_or_default();
        images.sort();
        images
    }
}

fn labels_match(have: &BTreeMap<String, String>, want: &BTreeMap<String, String>) -> bool {
    want.iter().all(|(k, v)| have.get(k) == Some(v))
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    fn name(&self) -> &str {
        "mock"
    }

    async fn ping(&self) -> Result<(), RuntimeError> {
        self.lock().map(|_| ())
    }

    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError> {
        self.lock()?.images.insert(image.to_owned());
        Ok(())
    }

    async fn create_network(&self, spec: &NetworkSpec) -> Result<String, RuntimeError> {
        let mut s = self.lock()?;
        if s.networks.values().any(|n| n.name == spec.name) {
            return Err(RuntimeError::CreateFailed {
                kind: ResourceKind::Network,
                name: spec.name.clone(),
                reason: "network with name already exists".to_owned(),
            });
        }
        let id = Self::next_id(&mut s, ResourceKind::Network, &spec.name);
        s.networks.insert(
            id.clone(),
            MockNetwork {
                name: spec.name.clone(),
                labels: spec.labels.clone(),
                created_at: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn remove_network(&self, id: &str) -> Result<(), RuntimeError> {
        self.removal_latency().await;
        let mut s = self.lock()?;
        s.attempts.push((ResourceKind::Network, id.to_owned()));
        let Some(network) = s.networks.get(id) else {
            return Err(RuntimeError::NotFound {
                kind: ResourceKind::Network,
                id: id.to_owned(),
            });
        };
        if s.fail_removal.contains(id) || s.fail_removal.contains(&network.name) {
            return Err(RuntimeError::RemoveFailed {
                kind: ResourceKind::Network,
                id: id.to_owned(),
                reason: "injected failure".to_owned(),
            });
        }
        let attached = s
            .containers
            .values()
            .filter(|c| c.network.as_deref() == Some(id))
            .count();
        if attached > 0 {
            return Err(RuntimeError::InUse {
                id: id.to_owned(),
                reason: format!("{attached} container(s) still attached"),
            });
        }
        s.networks.remove(id);
        s.removals.push((ResourceKind::Network, id.to_owned()));
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let mut s = self.lock()?;
        if s.fail_create.contains(&spec.name) {
            return Err(RuntimeError::CreateFailed {
                kind: ResourceKind::Container,
                name: spec.name.clone(),
                reason: "injected failure".to_owned(),
            });
        }
        if let Some(network) = &spec.network {
            if !s.networks.contains_key(network) {
                return Err(RuntimeError::NotFound {
                    kind: ResourceKind::Network,
                    id: network.clone(),
                });
            }
        }
        let id = Self::next_id(&mut s, ResourceKind::Container, &spec.name);
        s.containers.insert(
            id.clone(),
            MockContainer {
                name: spec.name.clone(),
                labels: spec.labels.clone(),
                network: spec.network.clone(),
                running: false,
                created_at: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut s = self.lock()?;
        let container = s
            .containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound {
                kind: ResourceKind::Container,
                id: id.to_owned(),
            })?;
        container.running = true;
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerStatus, RuntimeError> {
        let s = self.lock()?;
        let container = s.containers.get(id).ok_or_else(|| RuntimeError::NotFound {
            kind: ResourceKind::Container,
            id: id.to_owned(),
        })?;
        let health = if s.never_ready.contains(&container.name) {
            HealthState::Starting
        } else {
            HealthState::None
        };
        Ok(ContainerStatus {
            id: id.to_owned(),
            running: container.running,
            exited: false,
            exit_code: None,
            health,
        })
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.removal_latency().await;
        let mut s = self.lock()?;
        s.attempts.push((ResourceKind::Container, id.to_owned()));
        let Some(container) = s.containers.get(id) else {
            return Err(RuntimeError::NotFound {
                kind: ResourceKind::Container,
                id: id.to_owned(),
            });
        };
        if s.fail_removal.contains(id) || s.fail_removal.contains(&container.name) {
            return Err(RuntimeError::RemoveFailed {
                kind: ResourceKind::Container,
                id: id.to_owned(),
                reason: "injected failure".to_owned(),
            });
        }
        s.containers.remove(id);
        s.removals.push((ResourceKind::Container, id.to_owned()));
        Ok(())
    }

    async fn list_containers(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<ResourceSummary>, RuntimeError> {
        let s = self.lock()?;
        Ok(s.containers
            .iter()
            .filter(|(_, c)| labels_match(&c.labels, labels))
            .map(|(id, c)| ResourceSummary {
                kind: ResourceKind::Container,
                id: id.clone(),
                name: c.name.clone(),
                labels: c.labels.clone(),
                created_at: c.created_at,
                networks: c.network.iter().cloned().collect(),
            })
            .collect())
    }

    async fn list_networks(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<ResourceSummary>, RuntimeError> {
        let s = self.lock()?;
        Ok(s.networks
            .iter()
            .filter(|(_, n)| labels_match(&n.labels, labels))
            .map(|(id, n)| ResourceSummary {
                kind: ResourceKind::Network,
                id: id.clone(),
                name: n.name.clone(),
                labels: n.labels.clone(),
                created_at: n.created_at,
                networks: Vec::new(),
            })
            .collect())
    }
}
