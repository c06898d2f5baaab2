use crate::registry::Registries;
use crate::CoreError;
use dockyard_schema::{parse_suite_file, SuiteSpec};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DryRunReport {
    pub suite: String,
    /// `(name, kind)` per unit, in declaration order.
    pub units: Vec<(String, String)>,
    /// `(test, resolved target)` per test, in declaration order.
    pub tests: Vec<(String, String)>,
}

/// Validate a suite and construct every unit and test through the registries,
/// without contacting the container runtime.
pub fn check_suite(spec: &SuiteSpec, registries: &Registries) -> Result<DryRunReport, CoreError> {
    spec.validate()?;

    let mut units = Vec::with_capacity(spec.units.len());
    for u in &spec.units {
        registries
            .build_unit(u)
            .map_err(|e| CoreError::Config(format!("suite '{}': unit '{}': {e}", spec.name, u.name)))?;
        units.push((u.name.clone(), u.kind.clone()));
    }

    let mut tests = Vec::with_capacity(spec.tests.len());
    for t in &spec.tests {
        registries
            .build_test(t)
            .map_err(|e| CoreError::Config(format!("suite '{}': test '{}': {e}", spec.name, t.name)))?;
        let target = spec.resolve_target(t).unwrap_or_default().to_owned();
        tests.push((t.name.clone(), target));
    }

    Ok(DryRunReport {
        suite: spec.name.clone(),
        units,
        tests,
    })
}

pub fn dry_run_suite(path: &Path, registries: &Registries) -> Result<DryRunReport, CoreError> {
    let spec = parse_suite_file(path)?;
    check_suite(&spec, registries)
}
