//! Docker backend over the Engine API (bollard).

use crate::backend::{
    ContainerRuntime, ContainerSpec, ContainerStatus, HealthState, NetworkSpec, ResourceKind,
    ResourceSummary,
};
use crate::RuntimeError;
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    NetworkingConfig, RemoveContainerOptions, StartContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerStateStatusEnum, EndpointSettings, HealthStatusEnum, HostConfig};
use bollard::network::{CreateNetworkOptions, ListNetworksOptions};
use bollard::Docker;
use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub async fn connect() -> Result<Self, RuntimeError> {
        let unavailable = |e: DockerError| RuntimeError::Unavailable {
            name: "docker".to_owned(),
            reason: e.to_string(),
        };
        let docker = Docker::connect_with_local_defaults().map_err(unavailable)?;
        let docker = docker.negotiate_version().await.map_err(unavailable)?;
        debug!("connected to docker, API {}", docker.client_version());
        Ok(Self { docker })
    }
}

fn classify(kind: ResourceKind, id: &str, err: DockerError) -> RuntimeError {
    match err {
        DockerError::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::NotFound {
            kind,
            id: id.to_owned(),
        },
        DockerError::DockerResponseServerError { message, .. }
            if message.contains("active endpoints") =>
        {
            RuntimeError::InUse {
                id: id.to_owned(),
                reason: message,
            }
        }
        other => RuntimeError::Docker(other),
    }
}

/// `postgres` -> (`postgres`, `latest`); `host:5000/app:1.2` -> (`host:5000/app`, `1.2`).
fn split_image(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }
    let last_slash = image.rfind('/').map_or(0, |i| i + 1);
    match image[last_slash..].rfind(':') {
        Some(i) => (&image[..last_slash + i], &image[last_slash + i + 1..]),
        None => (image, "latest"),
    }
}

fn label_filters(labels: &BTreeMap<String, String>) -> HashMap<String, Vec<String>> {
    if labels.is_empty() {
        return HashMap::new();
    }
    HashMap::from([(
        "label".to_owned(),
        labels.iter().map(|(k, v)| format!("{k}={v}")).collect(),
    )])
}

fn to_btree(labels: Option<HashMap<String, String>>) -> BTreeMap<String, String> {
    labels.unwrap_or_default().into_iter().collect()
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &str {
        "docker"
    }

    async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| RuntimeError::Unavailable {
                name: "docker".to_owned(),
                reason: e.to_string(),
            })
    }

    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image = %image, "image present locally");
            return Ok(());
        }

        info!(image = %image, "pulling image");
        let (from_image, tag) = split_image(image);
        let options = CreateImageOptions {
            from_image,
            tag,
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            match progress {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(image = %image, status = %status, "pull progress");
                    }
                }
                Err(e) => {
                    return Err(RuntimeError::ImagePull {
                        image: image.to_owned(),
                        reason: e.to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    async fn create_network(&self, spec: &NetworkSpec) -> Result<String, RuntimeError> {
        let options = CreateNetworkOptions {
            name: spec.name.clone(),
            driver: "bridge".to_owned(),
            check_duplicate: true,
            labels: spec.labels.clone().into_iter().collect(),
            ..Default::default()
        };
        let response = self.docker.create_network(options).await?;
        if response.id.is_empty() {
            return Err(RuntimeError::CreateFailed {
                kind: ResourceKind::Network,
                name: spec.name.clone(),
                reason: "no ID returned".to_owned(),
            });
        }
        info!(network = %spec.name, id = %response.id, "created network");
        Ok(response.id)
    }

    async fn remove_network(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .remove_network(id)
            .await
            .map_err(|e| classify(ResourceKind::Network, id, e))?;
        info!(network = %id, "removed network");
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
            .ports
            .iter()
            .map(|p| (format!("{}/tcp", p.container_port), HashMap::new()))
            .collect();

        let port_bindings: HashMap<String, Option<Vec<bollard::models::PortBinding>>> = spec
            .ports
            .iter()
            .map(|p| {
                let binding = bollard::models::PortBinding {
                    host_ip: Some("127.0.0.1".to_owned()),
                    host_port: Some(p.host_port.to_string()),
                };
                (format!("{}/tcp", p.container_port), Some(vec![binding]))
            })
            .collect();

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            network_mode: spec.network.clone(),
            ..Default::default()
        };

        let networking_config = spec.network.as_ref().map(|network| NetworkingConfig {
            endpoints_config: HashMap::from([(
                network.clone(),
                EndpointSettings {
                    aliases: spec.alias.clone().map(|a| vec![a]),
                    ..Default::default()
                },
            )]),
        });

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect()),
            cmd: spec.command.clone(),
            labels: Some(spec.labels.clone().into_iter().collect()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            networking_config,
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| RuntimeError::CreateFailed {
                kind: ResourceKind::Container,
                name: spec.name.clone(),
                reason: e.to_string(),
            })?;
        info!(container = %spec.name, id = %response.id, "created container");
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| classify(ResourceKind::Container, id, e))?;
        debug!(container = %id, "started container");
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerStatus, RuntimeError> {
        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| classify(ResourceKind::Container, id, e))?;

        let state = inspect.state.unwrap_or_default();
        let health = match state.health.and_then(|h| h.status) {
            Some(HealthStatusEnum::STARTING) => HealthState::Starting,
            Some(HealthStatusEnum::HEALTHY) => HealthState::Healthy,
            Some(HealthStatusEnum::UNHEALTHY) => HealthState::Unhealthy,
            _ => HealthState::None,
        };
        let exited = matches!(
            state.status,
            Some(ContainerStateStatusEnum::EXITED | ContainerStateStatusEnum::DEAD)
        );

        Ok(ContainerStatus {
            id: id.to_owned(),
            running: state.running.unwrap_or(false),
            exited,
            exit_code: state.exit_code,
            health,
        })
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| classify(ResourceKind::Container, id, e))?;
        info!(container = %id, "removed container");
        Ok(())
    }

    async fn list_containers(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<ResourceSummary>, RuntimeError> {
        let options = ListContainersOptions::<String> {
            all: true,
            filters: label_filters(labels),
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(options)).await?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                let name = c
                    .names
                    .and_then(|n| n.into_iter().next())
                    .map_or_else(|| id.clone(), |n| n.trim_start_matches('/').to_owned());
                let created_at = c
                    .created
                    .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
                    .unwrap_or_else(Utc::now);
                let networks = c
                    .network_settings
                    .and_then(|ns| ns.networks)
                    .map(|nets| nets.into_values().filter_map(|ep| ep.network_id).collect())
                    .unwrap_or_default();
                Some(ResourceSummary {
                    kind: ResourceKind::Container,
                    id,
                    name,
                    labels: to_btree(c.labels),
                    created_at,
                    networks,
                })
            })
            .collect())
    }

    async fn list_networks(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<ResourceSummary>, RuntimeError> {
        let options = ListNetworksOptions::<String> {
            filters: label_filters(labels),
        };
        let networks = self.docker.list_networks(Some(options)).await?;

        Ok(networks
            .into_iter()
            .filter_map(|n| {
                let id = n.id?;
                let created_at = n
                    .created
                    .as_deref()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map_or_else(Utc::now, |d| d.with_timezone(&Utc));
                Some(ResourceSummary {
                    kind: ResourceKind::Network,
                    name: n.name.unwrap_or_else(|| id.clone()),
                    id,
                    labels: to_btree(n.labels),
                    created_at,
                    networks: Vec::new(),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_image_defaults_tag() {
        assert_eq!(split_image("postgres"), ("postgres", "latest"));
        assert_eq!(split_image("postgres:16"), ("postgres", "16"));
        assert_eq!(
            split_image("registry.local:5000/team/app"),
            ("registry.local:5000/team/app", "latest")
        );
        assert_eq!(
            split_image("registry.local:5000/team/app:1.2"),
            ("registry.local:5000/team/app", "1.2")
        );
    }

    #[test]
    fn split_image_keeps_digest() {
        let img = "alpine@sha256:abcd";
        assert_eq!(split_image(img), (img, ""));
    }

    #[test]
    fn label_filters_format() {
        let labels = BTreeMap::from([("a".to_owned(), "1".to_owned())]);
        let filters = label_filters(&labels);
        assert_eq!(filters["label"], vec!["a=1".to_owned()]);
        assert!(label_filters(&BTreeMap::new()).is_empty());
    }

    #[test]
    fn not_found_is_classified() {
        let err = DockerError::DockerResponseServerError {
            status_code: 404,
            message: "no such container".to_owned(),
        };
        assert!(classify(ResourceKind::Container, "abc", err).is_not_found());
    }

    #[test]
    fn active_endpoints_is_classified() {
        let err = DockerError::DockerResponseServerError {
            status_code: 403,
            message: "error while removing network: network n has active endpoints".to_owned(),
        };
        assert!(matches!(
            classify(ResourceKind::Network, "n", err),
            RuntimeError::InUse { .. }
        ));
    }
}
