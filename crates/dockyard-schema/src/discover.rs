use crate::suite::{suite_name_from_path, SuiteError};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const SUITE_FILE_SUFFIX: &str = ".suite.toml";

/// A suite document found on disk. Only the file name is inspected at
/// discovery time; parsing happens later so one broken file does not hide
/// the others from `list-suites`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuiteFile {
    pub name: String,
    pub path: PathBuf,
}

pub fn is_suite_file(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|n| n.to_string_lossy().ends_with(SUITE_FILE_SUFFIX))
}

/// Recursively find `*.suite.toml` files below `base_dir`, sorted by name
/// then path. Hidden directories and `target/` are skipped.
pub fn discover_suites(base_dir: &Path) -> Result<Vec<SuiteFile>, SuiteError> {
    let mut found = Vec::new();
    walk(base_dir, &mut found)?;
    found.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.path.cmp(&b.path)));
    Ok(found)
}

fn walk(dir: &Path, found: &mut Vec<SuiteFile>) -> Result<(), SuiteError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') || name == "target" {
                continue;
            }
            walk(&path, found)?;
        } else if file_type.is_file() && is_suite_file(&path) {
            found.push(SuiteFile {
                name: suite_name_from_path(&path),
                path,
            });
        }
    }
    Ok(())
}
