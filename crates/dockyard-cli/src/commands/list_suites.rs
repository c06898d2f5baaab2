use super::{display_path, json_pretty, select_suites, EXIT_SUCCESS};
use dockyard_schema::SuiteFilter;
use std::path::Path;

pub fn run(base_dir: &Path, json: bool) -> Result<u8, String> {
    let suites = select_suites(base_dir, &SuiteFilter::default())?;
    if json {
        println!("{}", json_pretty(&suites)?);
    } else if suites.is_empty() {
        println!("no suites found under {}", base_dir.display());
    } else {
        let width = suites.iter().map(|s| s.name.len()).max().unwrap_or(0).max(4);
        println!("{:<width$}  PATH", "NAME");
        for s in &suites {
            println!("{:<width$}  {}", s.name, display_path(base_dir, &s.path));
        }
    }
    Ok(EXIT_SUCCESS)
}
