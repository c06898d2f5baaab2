use super::{builtin_registries, display_path, json_pretty, select_suites, EXIT_FAILURE, EXIT_SUCCESS};
use console::Style;
use dockyard_core::{dry_run_suite, DryRunReport};
use dockyard_schema::SuiteFilter;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Serialize)]
struct Checked {
    path: PathBuf,
    report: Option<DryRunReport>,
    error: Option<String>,
}

/// Validate one file, or every suite under `base_dir`, without starting
/// anything.
pub fn run(file: Option<&Path>, base_dir: &Path, verbose: bool, json: bool) -> Result<u8, String> {
    let paths: Vec<PathBuf> = match file {
        Some(f) => {
            if !f.is_file() {
                return Err(format!("suite file {} does not exist", f.display()));
            }
            vec![f.to_path_buf()]
        }
        None => select_suites(base_dir, &SuiteFilter::default())?
            .into_iter()
            .map(|s| s.path)
            .collect(),
    };
    if paths.is_empty() {
        return Err(format!("no suites found under {}", base_dir.display()));
    }

    let registries = builtin_registries();
    let checked: Vec<Checked> = paths
        .into_iter()
        .map(|path| match dry_run_suite(&path, &registries) {
            Ok(report) => Checked {
                path,
                report: Some(report),
                error: None,
            },
            Err(e) => Checked {
                path,
                report: None,
                error: Some(e.to_string()),
            },
        })
        .collect();
    let failed = checked.iter().filter(|c| c.error.is_some()).count();

    if json {
        println!("{}", json_pretty(&checked)?);
    } else {
        for c in &checked {
            let shown = display_path(base_dir, &c.path);
            match (&c.report, &c.error) {
                (Some(r), _) => {
                    println!(
                        "{} {} ({shown}): {} unit(s), {} test(s)",
                        Style::new().green().apply_to("✓"),
                        r.suite,
                        r.units.len(),
                        r.tests.len()
                    );
                    if verbose {
                        for (name, kind) in &r.units {
                            println!("    unit {name} [{kind}]");
                        }
                        for (name, target) in &r.tests {
                            println!("    test {name} -> {target}");
                        }
                    }
                }
                (None, err) => println!(
                    "{} {shown}: {}",
                    Style::new().red().bold().apply_to("✗"),
                    err.as_deref().unwrap_or_default()
                ),
            }
        }
        if failed > 0 {
            println!("{failed} of {} suite(s) invalid", checked.len());
        }
    }
    Ok(if failed == 0 { EXIT_SUCCESS } else { EXIT_FAILURE })
}
