pub mod cleanup;
pub mod completions;
pub mod dry_run;
pub mod list_suites;
pub mod run;
pub mod scaffold;
pub mod version;

use dockyard_core::{Registries, RunnerConfig};
use dockyard_runtime::{connect_runtime, ContainerRuntime};
use dockyard_schema::{discover_suites, SuiteFile, SuiteFilter};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;

/// Overrides `runtime` from `dockyard.toml`.
pub const RUNTIME_ENV: &str = "DOCKYARD_RUNTIME";

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn tokio_runtime() -> Result<tokio::runtime::Runtime, String> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("failed to start async runtime: {e}"))
}

pub fn load_config(base_dir: &Path) -> Result<RunnerConfig, String> {
    let mut config = RunnerConfig::load(base_dir).map_err(|e| e.to_string())?;
    config.apply_runtime_override(std::env::var(RUNTIME_ENV).ok().as_deref());
    Ok(config)
}

pub async fn connect(config: &RunnerConfig) -> Result<Arc<dyn ContainerRuntime>, String> {
    connect_runtime(&config.runtime)
        .await
        .map_err(|e| format!("runtime error: {e}"))
}

pub fn builtin_registries() -> Registries {
    let mut registries = Registries::new();
    dockyard_adapters::register_builtin(&mut registries);
    registries
}

/// Suites below `base_dir` whose name passes `filter`.
pub fn select_suites(base_dir: &Path, filter: &SuiteFilter) -> Result<Vec<SuiteFile>, String> {
    if !base_dir.is_dir() {
        return Err(format!("base directory {} does not exist", base_dir.display()));
    }
    let suites = discover_suites(base_dir).map_err(|e| e.to_string())?;
    Ok(suites.into_iter().filter(|s| filter.matches(&s.name)).collect())
}

pub fn display_path(base_dir: &Path, path: &Path) -> String {
    path.strip_prefix(base_dir)
        .unwrap_or(path)
        .display()
        .to_string()
}

pub fn write_atomic(dest: &Path, content: &str) -> std::io::Result<()> {
    let dir = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| e.error)?;
    Ok(())
}
