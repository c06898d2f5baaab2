use crate::retry::RetryPolicy;
use crate::CoreError;
use dockyard_schema::parse_duration;
use serde::{Deserialize, Deserializer};
use std::path::Path;
use std::time::Duration;

pub const CONFIG_FILE: &str = "dockyard.toml";

fn duration<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    let raw = String::deserialize(d)?;
    parse_duration(&raw).map_err(serde::de::Error::custom)
}

/// The `[runner]` table of `dockyard.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerConfig {
    pub parallel: bool,
    pub max_setup_attempts: u32,
    #[serde(deserialize_with = "duration")]
    pub setup_retry_delay: Duration,
    /// Bounds `WaitForReady` unless a unit overrides it.
    #[serde(deserialize_with = "duration")]
    pub startup_timeout: Duration,
    /// Bounds `Start`: image pull plus container creation.
    #[serde(deserialize_with = "duration")]
    pub build_timeout: Duration,
    pub build_concurrency: Option<usize>,
    pub runtime: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            parallel: false,
            max_setup_attempts: 3,
            setup_retry_delay: Duration::from_secs(2),
            startup_timeout: Duration::from_secs(60),
            build_timeout: Duration::from_secs(300),
            build_concurrency: None,
            runtime: "docker".to_owned(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    runner: RunnerConfig,
}

impl RunnerConfig {
    pub fn from_toml(input: &str) -> Result<Self, CoreError> {
        let file: ConfigFile = toml::from_str(input)
            .map_err(|e| CoreError::Config(format!("{CONFIG_FILE}: {}", e.message())))?;
        let config = file.runner;
        if config.max_setup_attempts == 0 {
            return Err(CoreError::Config(format!(
                "{CONFIG_FILE}: max_setup_attempts must be at least 1"
            )));
        }
        if config.build_concurrency == Some(0) {
            return Err(CoreError::Config(format!(
                "{CONFIG_FILE}: build_concurrency must be at least 1"
            )));
        }
        Ok(config)
    }

    /// Read `dockyard.toml` from `base_dir`, or use defaults when it is absent.
    pub fn load(base_dir: &Path) -> Result<Self, CoreError> {
        let path = base_dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml(&content)
    }

    /// Apply a `DOCKYARD_RUNTIME`-style override.
    pub fn apply_runtime_override(&mut self, runtime: Option<&str>) {
        if let Some(name) = runtime.map(str::trim).filter(|s| !s.is_empty()) {
            name.clone_into(&mut self.runtime);
        }
    }

    pub fn build_permits(&self) -> usize {
        self.build_concurrency.unwrap_or_else(|| {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_setup_attempts,
            delay: self.setup_retry_delay,
        }
    }
}
