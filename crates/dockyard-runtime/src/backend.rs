use crate::RuntimeError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Container,
    Network,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Container => f.write_str("container"),
            Self::Network => f.write_str("network"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    pub container_port: u16,
    pub host_port: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub command: Option<Vec<String>>,
    pub ports: Vec<PortBinding>,
    /// Network id returned by `create_network`.
    pub network: Option<String>,
    /// DNS alias inside the network, usually the unit name.
    pub alias: Option<String>,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// The image declares no health check.
    None,
    Starting,
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub id: String,
    pub running: bool,
    pub exited: bool,
    pub exit_code: Option<i64>,
    pub health: HealthState,
}

/// A container or network as reported by the runtime when listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSummary {
    pub kind: ResourceKind,
    pub id: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    /// For containers, the ids of the networks they are attached to.
    pub networks: Vec<String>,
}

impl ResourceSummary {
    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.created_at).to_std().unwrap_or_default()
    }
}

/// The container runtime the orchestration core drives.
///
/// Removal of a resource that no longer exists must fail with
/// `RuntimeError::NotFound` so callers can treat it as already done.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    fn name(&self) -> &str;

    async fn ping(&self) -> Result<(), RuntimeError>;

    /// Make sure the image is present locally, pulling it if needed.
    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError>;

    /// Returns the new network id.
    async fn create_network(&self, spec: &NetworkSpec) -> Result<String, RuntimeError>;

    async fn remove_network(&self, id: &str) -> Result<(), RuntimeError>;

    /// Returns the new container id. The container is created, not started.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerStatus, RuntimeError>;

    /// Force-remove the container and its anonymous volumes.
    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// List containers (running or not) carrying every given label.
    async fn list_containers(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<ResourceSummary>, RuntimeError>;

    async fn list_networks(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<ResourceSummary>, RuntimeError>;

    async fn remove(&self, kind: ResourceKind, id: &str) -> Result<(), RuntimeError> {
        match kind {
            ResourceKind::Container => self.remove_container(id).await,
            ResourceKind::Network => self.remove_network(id).await,
        }
    }
}

/// Milliseconds the `mock` runtime waits on every removal.
pub const MOCK_REMOVAL_DELAY_ENV: &str = "DOCKYARD_MOCK_REMOVAL_DELAY_MS";

/// Connect to the named runtime. `docker` honours `DOCKER_HOST` and
/// negotiates the API version with the daemon.
pub async fn connect_runtime(name: &str) -> Result<Arc<dyn ContainerRuntime>, RuntimeError> {
    match name {
        "docker" => Ok(Arc::new(crate::docker::DockerRuntime::connect().await?)),
        "mock" => {
            let delay = std::env::var(MOCK_REMOVAL_DELAY_ENV)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(std::time::Duration::from_millis)
                .unwrap_or_default();
            Ok(Arc::new(
                crate::mock::MockRuntime::new().with_removal_delay(delay),
            ))
        }
        other => Err(RuntimeError::UnknownRuntime(other.to_owned())),
    }
}
