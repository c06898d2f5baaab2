use super::{builtin_registries, connect, load_config, select_suites, tokio_runtime};
use crate::report::{ConsoleReporter, HtmlReporter, JsonReporter};
use dockyard_core::{CancellationToken, EventBus, Runner, SuiteSource};
use dockyard_schema::SuiteFilter;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub struct RunOptions<'a> {
    pub base_dir: &'a Path,
    pub suite: Option<&'a str>,
    pub parallel: bool,
    pub html: Option<&'a Path>,
    pub json: Option<&'a Path>,
    pub verbose: bool,
}

pub fn run(opts: &RunOptions<'_>, cancel: CancellationToken) -> Result<u8, String> {
    let mut config = load_config(opts.base_dir)?;
    if opts.parallel {
        config.parallel = true;
    }

    let filter = SuiteFilter::parse(opts.suite.unwrap_or_default());
    let suites = select_suites(opts.base_dir, &filter)?;
    if suites.is_empty() {
        return Err(if filter.is_empty() {
            format!("no suites found under {}", opts.base_dir.display())
        } else {
            format!(
                "no suites under {} match '{}'",
                opts.base_dir.display(),
                opts.suite.unwrap_or_default()
            )
        });
    }
    debug!(count = suites.len(), runtime = %config.runtime, "selected suites");

    let mut bus = EventBus::new();
    bus.subscribe(Box::new(ConsoleReporter::new(opts.verbose)));
    if let Some(path) = opts.json {
        bus.subscribe(Box::new(JsonReporter::new(path)));
    }
    if let Some(path) = opts.html {
        bus.subscribe(Box::new(HtmlReporter::new(path)));
    }

    let registries = Arc::new(builtin_registries());
    let rt = tokio_runtime()?;
    rt.block_on(async move {
        let runtime = connect(&config).await?;
        let runner = Runner::new(config, runtime, registries, cancel);
        let sources = suites.into_iter().map(SuiteSource::File).collect();
        let summary = runner.run(sources, bus).await.map_err(|e| e.to_string())?;
        for err in &summary.report_errors {
            eprintln!("error: report: {err}");
        }
        Ok::<u8, String>(summary.exit_code())
    })
}
