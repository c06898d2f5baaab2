use super::{connect, json_pretty, load_config, spin_fail, spin_ok, spinner, tokio_runtime, EXIT_FAILURE, EXIT_SUCCESS};
use chrono::Utc;
use console::Style;
use dialoguer::Confirm;
use dockyard_core::{
    CancellationToken, CleanupOrchestrator, CleanupResult, DiscoverOptions, Discovery,
    KindCounts, ResourceDiscoverer, ResourceScope,
};
use dockyard_runtime::ResourceSummary;
use dockyard_schema::{format_duration, parse_duration};
use std::io::{stderr, stdin, IsTerminal};
use std::path::Path;

pub struct CleanupOptions<'a> {
    pub scope: ResourceScope,
    pub dry_run: bool,
    pub force: bool,
    pub include_all: bool,
    pub older_than: Option<&'a str>,
    pub verbose: bool,
    pub json: bool,
}

fn discover_options(opts: &CleanupOptions<'_>) -> Result<DiscoverOptions, String> {
    let older_than = opts
        .older_than
        .map(parse_duration)
        .transpose()
        .map_err(|e| format!("--older-than: {e}"))?
        .unwrap_or_default();
    Ok(DiscoverOptions {
        scope: opts.scope,
        older_than,
        include_all: opts.include_all,
    })
}

fn print_resources(label: &str, resources: &[ResourceSummary]) {
    let now = Utc::now();
    for r in resources {
        println!(
            "  {label:<9} {:<40} {:<12} age {}",
            r.name,
            r.id.get(..12).unwrap_or(&r.id),
            format_duration(r.age(now))
        );
    }
}

fn counts_line(label: &str, counts: KindCounts, dry_run: bool) -> String {
    if dry_run {
        format!("{label}: {} found, {} would be removed", counts.found, counts.found)
    } else {
        format!(
            "{label}: {} found, {} removed, {} failed",
            counts.found, counts.removed, counts.failed
        )
    }
}

pub fn print_result(result: &CleanupResult) {
    println!("{}", counts_line("containers", result.containers, result.dry_run));
    println!("{}", counts_line("networks", result.networks, result.dry_run));
    for f in &result.failures {
        println!("  {} could not remove {f}", Style::new().red().bold().apply_to("✗"));
    }
    println!("took {}", format_duration(result.duration));
}

fn confirm(discovery: &Discovery) -> Result<bool, String> {
    if !(stdin().is_terminal() && stderr().is_terminal()) {
        return Err("refusing to remove resources without confirmation (pass --force)".to_owned());
    }
    Confirm::new()
        .with_prompt(format!("remove {} resource(s)?", discovery.total()))
        .default(false)
        .interact()
        .map_err(|e| format!("prompt failed: {e}"))
}

/// Find resources left behind by earlier runs and remove them.
pub fn run(opts: &CleanupOptions<'_>, cancel: &CancellationToken) -> Result<u8, String> {
    let discover = discover_options(opts)?;
    let config = load_config(Path::new("."))?;
    let rt = tokio_runtime()?;

    let runtime = rt.block_on(connect(&config))?;
    let pb = spinner(&format!("scanning for orphaned {}...", opts.scope));
    let discovery = match rt.block_on(ResourceDiscoverer::new(runtime.clone()).discover(&discover)) {
        Ok(d) => {
            spin_ok(&pb, &format!("found {} orphaned resource(s)", d.total()));
            d
        }
        Err(e) => {
            spin_fail(&pb, "scan failed");
            return Err(e.to_string());
        }
    };

    if discovery.is_empty() {
        if opts.json {
            println!("{}", json_pretty(&CleanupResult {
                dry_run: opts.dry_run,
                ..CleanupResult::default()
            })?);
        } else {
            println!("no orphaned dockyard resources found");
            if discovery.too_young > 0 {
                println!("{} resource(s) younger than --older-than were kept", discovery.too_young);
            }
        }
        return Ok(EXIT_SUCCESS);
    }

    if !opts.json && (opts.dry_run || opts.verbose) {
        print_resources("container", &discovery.containers);
        print_resources("network", &discovery.networks);
    }

    if !opts.dry_run && !opts.force && !confirm(&discovery)? {
        println!("aborted, nothing removed");
        return Ok(EXIT_SUCCESS);
    }

    let orchestrator = CleanupOrchestrator::new(runtime);
    let result = rt.block_on(orchestrator.execute_with_cancel(&discovery, opts.dry_run, || {
        cancel.is_cancelled()
    }));

    if opts.json {
        println!("{}", json_pretty(&result)?);
    } else {
        print_result(&result);
    }
    if cancel.is_cancelled() {
        eprintln!("cleanup interrupted; some resources may remain");
        return Ok(EXIT_FAILURE);
    }
    Ok(if result.is_clean() { EXIT_SUCCESS } else { EXIT_FAILURE })
}
