use async_trait::async_trait;
use dockyard_core::{
    sleep_or_cancel, CancellationToken, CleanupTarget, CoreError, StartContext, Unit,
};
use dockyard_runtime::{ContainerSpec, HealthState, PortBinding};
use dockyard_schema::{parse_duration, UnitSpec};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info};

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);
const LOCALHOST: &str = "127.0.0.1";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadyMode {
    /// A TCP connection to the first published port succeeds.
    #[default]
    Tcp,
    /// The container is running (and healthy, if it declares a health check).
    Running,
}

/// Fields of a `container` unit entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerFields {
    pub image: String,
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub command: Option<Vec<String>>,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub ready: Option<ReadyMode>,
    #[serde(default)]
    pub startup_timeout: Option<String>,
}

struct Running {
    id: String,
    ports: Vec<PortBinding>,
    ctx: StartContext,
}

/// A unit backed by a single container. The database and storage kinds are
/// presets over this type.
pub struct ContainerUnit {
    name: String,
    kind: &'static str,
    fields: ContainerFields,
    ready: ReadyMode,
    startup_timeout: Option<Duration>,
    /// Kind-specific variables; `{host}` and `{port}` are substituted on read.
    extra: BTreeMap<String, String>,
    running: Option<Running>,
}

impl ContainerUnit {
    pub fn new(
        name: &str,
        kind: &'static str,
        fields: ContainerFields,
        extra: BTreeMap<String, String>,
    ) -> Result<Self, CoreError> {
        if fields.image.trim().is_empty() {
            return Err(CoreError::Config(format!("unit '{name}': image must not be empty")));
        }
        let ready = match fields.ready {
            Some(ReadyMode::Tcp) if fields.ports.is_empty() => {
                return Err(CoreError::Config(format!(
                    "unit '{name}': ready = \"tcp\" needs at least one port"
                )));
            }
            Some(mode) => mode,
            None if fields.ports.is_empty() => ReadyMode::Running,
            None => ReadyMode::Tcp,
        };
        let startup_timeout = fields
            .startup_timeout
            .as_deref()
            .map(parse_duration)
            .transpose()?;
        Ok(Self {
            name: name.to_owned(),
            kind,
            fields,
            ready,
            startup_timeout,
            extra,
            running: None,
        })
    }

    pub fn from_spec(spec: &UnitSpec) -> Result<Self, CoreError> {
        Self::new(&spec.name, "container", spec.decode()?, BTreeMap::new())
    }

    pub fn image(&self) -> &str {
        &self.fields.image
    }

    pub fn ready_mode(&self) -> ReadyMode {
        self.ready
    }

    fn alias(&self) -> &str {
        self.fields.alias.as_deref().unwrap_or(&self.name)
    }

    fn running(&self) -> Result<&Running, CoreError> {
        self.running
            .as_ref()
            .ok_or_else(|| CoreError::setup(&self.name, "read variable", "unit is not started"))
    }

    fn host_port(&self, container_port: Option<u16>) -> Result<u16, CoreError> {
        let running = self.running()?;
        let binding = match container_port {
            Some(p) => running.ports.iter().find(|b| b.container_port == p),
            None => running.ports.first(),
        };
        binding.map(|b| b.host_port).ok_or_else(|| CoreError::UnknownVariable {
            unit: self.name.clone(),
            variable: container_port.map_or_else(|| "port".to_owned(), |p| format!("port.{p}")),
        })
    }

    async fn probe(&self, running: &Running) -> Result<bool, CoreError> {
        let status = running
            .ctx
            .runtime
            .inspect_container(&running.id)
            .await
            .map_err(|e| CoreError::setup(&self.name, "inspect container", e))?;

        if status.exited && !status.running {
            let code = status
                .exit_code
                .map_or_else(|| "unknown".to_owned(), |c| c.to_string());
            return Err(CoreError::setup(
                &self.name,
                "wait for ready",
                format!("container exited with code {code}"),
            ));
        }
        match status.health {
            HealthState::Unhealthy => {
                return Err(CoreError::setup(
                    &self.name,
                    "wait for ready",
                    "container health check reports unhealthy",
                ))
            }
            HealthState::Starting => return Ok(false),
            HealthState::Healthy | HealthState::None => {}
        }
        if !status.running {
            return Ok(false);
        }

        match self.ready {
            ReadyMode::Running => Ok(true),
            ReadyMode::Tcp => {
                let Some(port) = running.ports.first().map(|b| b.host_port) else {
                    return Ok(true);
                };
                let connect = TcpStream::connect((LOCALHOST, port));
                Ok(matches!(
                    tokio::time::timeout(PROBE_TIMEOUT, connect).await,
                    Ok(Ok(_))
                ))
            }
        }
    }
}

#[async_trait]
impl Unit for ContainerUnit {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        self.kind
    }

    fn startup_timeout(&self) -> Option<Duration> {
        self.startup_timeout
    }

    async fn start(&mut self, ctx: &StartContext) -> Result<(), CoreError> {
        let name = self.name.clone();
        ctx.runtime
            .ensure_image(&self.fields.image)
            .await
            .map_err(|e| CoreError::setup(&name, "pull image", e))?;

        let mut ports = Vec::with_capacity(self.fields.ports.len());
        for &container_port in &self.fields.ports {
            match ctx.ports.allocate() {
                Ok(host_port) => ports.push(PortBinding {
                    container_port,
                    host_port,
                }),
                Err(e) => {
                    for b in &ports {
                        ctx.ports.release(b.host_port);
                    }
                    return Err(CoreError::setup(&name, "allocate host port", e));
                }
            }
        }

        let container_name = ctx.resource_name(&name);
        let spec = ContainerSpec {
            name: container_name.clone(),
            image: self.fields.image.clone(),
            env: self.fields.env.clone(),
            command: self.fields.command.clone(),
            ports: ports.clone(),
            network: Some(ctx.network.clone()),
            alias: Some(self.alias().to_owned()),
            labels: ctx.labels(&name),
        };
        let id = match ctx.runtime.create_container(&spec).await {
            Ok(id) => id,
            Err(e) => {
                for b in &ports {
                    ctx.ports.release(b.host_port);
                }
                return Err(CoreError::setup(&name, "create container", e));
            }
        };
        ctx.cleanup.register(CleanupTarget::container(
            &id,
            &container_name,
            &ctx.suite,
            Some(&ctx.network),
        ));
        self.running = Some(Running {
            id: id.clone(),
            ports,
            ctx: ctx.clone(),
        });

        ctx.runtime
            .start_container(&id)
            .await
            .map_err(|e| CoreError::setup(&name, "start container", e))?;
        info!(unit = %name, image = %self.fields.image, container = %container_name, "container started");
        Ok(())
    }

    async fn wait_for_ready(&mut self, cancel: &CancellationToken) -> Result<(), CoreError> {
        let running = self.running()?;
        loop {
            if self.probe(running).await? {
                debug!(unit = %self.name, "readiness probe succeeded");
                return Ok(());
            }
            sleep_or_cancel(POLL_INTERVAL, cancel).await?;
        }
    }

    fn get(&self, variable: &str) -> Result<String, CoreError> {
        match variable {
            "host" => Ok(LOCALHOST.to_owned()),
            "port" => self.host_port(None).map(|p| p.to_string()),
            "container_id" => self.running().map(|r| r.id.clone()),
            "alias" => Ok(self.alias().to_owned()),
            "image" => Ok(self.fields.image.clone()),
            "url" => self
                .host_port(None)
                .map(|p| format!("http://{LOCALHOST}:{p}")),
            other => {
                if let Some(port) = other.strip_prefix("port.") {
                    let port = port.parse::<u16>().map_err(|_| CoreError::UnknownVariable {
                        unit: self.name.clone(),
                        variable: other.to_owned(),
                    })?;
                    return self.host_port(Some(port)).map(|p| p.to_string());
                }
                let template = self.extra.get(other).ok_or_else(|| CoreError::UnknownVariable {
                    unit: self.name.clone(),
                    variable: other.to_owned(),
                })?;
                let mut value = template.replace("{host}", LOCALHOST);
                if value.contains("{port}") {
                    value = value.replace("{port}", &self.host_port(None)?.to_string());
                }
                Ok(value)
            }
        }
    }

    async fn stop(&mut self) -> Result<(), CoreError> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        for b in &running.ports {
            running.ctx.ports.release(b.host_port);
        }
        match running.ctx.runtime.remove_container(&running.id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(CoreError::setup(&self.name, "remove container", e)),
        }
        running.ctx.cleanup.release(&running.id);
        debug!(unit = %self.name, "container removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockyard_core::CleanupRegistry;
    use dockyard_runtime::{ContainerRuntime, MockRuntime, NetworkSpec, PortAllocator};
    use dockyard_schema::parse_suite_str;
    use std::sync::Arc;

    fn unit(doc: &str) -> Result<ContainerUnit, CoreError> {
        let suite = parse_suite_str(doc, "s").unwrap();
        ContainerUnit::from_spec(&suite.units[0])
    }

    async fn ctx(mock: &Arc<MockRuntime>) -> StartContext {
        let network = mock
            .create_network(&NetworkSpec {
                name: "net".into(),
                labels: BTreeMap::new(),
            })
            .await
            .unwrap();
        StartContext {
            suite: "s".into(),
            run_id: "r".into(),
            attempt: 1,
            network,
            runtime: mock.clone(),
            ports: Arc::new(PortAllocator::new()),
            cleanup: Arc::new(CleanupRegistry::new(mock.clone())),
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn ready_mode_defaults_follow_ports() {
        let with_port = unit("[[units]]\nname = \"a\"\nkind = \"container\"\nimage = \"x\"\nports = [80]\n").unwrap();
        assert_eq!(with_port.ready_mode(), ReadyMode::Tcp);
        let without = unit("[[units]]\nname = \"a\"\nkind = \"container\"\nimage = \"x\"\n").unwrap();
        assert_eq!(without.ready_mode(), ReadyMode::Running);
    }

    #[test]
    fn rejects_bad_fields() {
        assert!(unit("[[units]]\nname = \"a\"\nkind = \"container\"\n").is_err());
        assert!(unit("[[units]]\nname = \"a\"\nkind = \"container\"\nimage = \"x\"\nready = \"tcp\"\n").is_err());
        assert!(unit("[[units]]\nname = \"a\"\nkind = \"container\"\nimage = \"x\"\nbogus = 1\n").is_err());
        assert!(unit("[[units]]\nname = \"a\"\nkind = \"container\"\nimage = \"x\"\nstartup_timeout = \"later\"\n").is_err());
    }

    #[tokio::test]
    async fn lifecycle_against_mock_runtime() {
        let mock = Arc::new(MockRuntime::new());
        let c = ctx(&mock).await;
        let mut u = unit(
            "[[units]]\nname = \"app\"\nkind = \"container\"\nimage = \"alpine:3.20\"\nports = [8080, 9090]\nready = \"running\"\nstartup_timeout = \"5s\"\n",
        )
        .unwrap();
        assert_eq!(u.startup_timeout(), Some(Duration::from_secs(5)));
        assert!(u.get("port").is_err());

        u.start(&c).await.unwrap();
        assert_eq!(mock.container_count(), 1);
        assert_eq!(c.cleanup.len(), 1);
        u.wait_for_ready(&c.cancel).await.unwrap();

        let port: u16 = u.get("port").unwrap().parse().unwrap();
        assert_eq!(u.get("port.8080").unwrap(), port.to_string());
        assert_ne!(u.get("port.9090").unwrap(), port.to_string());
        assert_eq!(u.get("url").unwrap(), format!("http://127.0.0.1:{port}"));
        assert_eq!(u.get("alias").unwrap(), "app");
        assert!(matches!(
            u.get("password"),
            Err(CoreError::UnknownVariable { .. })
        ));
        assert!(u.get("port.1").is_err());

        u.stop().await.unwrap();
        u.stop().await.unwrap();
        assert_eq!(mock.container_count(), 0);
        assert!(c.cleanup.is_empty());
        assert_eq!(c.ports.reserved_count(), 0);
    }

    #[tokio::test]
    async fn create_failure_is_a_setup_error_naming_the_unit() {
        let mock = Arc::new(MockRuntime::new());
        let c = ctx(&mock).await;
        mock.fail_create("dockyard-s-web-r");
        let mut u = unit("[[units]]\nname = \"web\"\nkind = \"container\"\nimage = \"nginx\"\nports = [80]\n").unwrap();
        let err = u.start(&c).await.unwrap_err();
        assert!(err.is_setup());
        let msg = err.to_string();
        assert!(msg.contains("web") && msg.contains("create container"), "{msg}");
        assert_eq!(c.ports.reserved_count(), 0);
        u.stop().await.unwrap();
    }
}
