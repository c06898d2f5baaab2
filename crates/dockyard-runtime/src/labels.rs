use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

pub const NAME_PREFIX: &str = "dockyard";
pub const LABEL_MANAGED: &str = "dev.dockyard.managed";
pub const LABEL_SUITE: &str = "dev.dockyard.suite";
pub const LABEL_RUN: &str = "dev.dockyard.run";
pub const LABEL_UNIT: &str = "dev.dockyard.unit";

static RUN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Short identifier distinguishing resources of one process run from another.
pub fn new_run_id() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let seq = RUN_COUNTER.fetch_add(1, Ordering::Relaxed);
    let seed = format!("{}:{nanos}:{seq}", std::process::id());
    blake3::hash(seed.as_bytes()).to_hex()[..10].to_owned()
}

/// The label set every Dockyard-created resource carries.
pub fn managed_labels(suite: &str, run_id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_MANAGED.to_owned(), "true".to_owned()),
        (LABEL_SUITE.to_owned(), suite.to_owned()),
        (LABEL_RUN.to_owned(), run_id.to_owned()),
    ])
}

/// Label filter matching every resource created by any Dockyard run.
pub fn managed_filter() -> BTreeMap<String, String> {
    BTreeMap::from([(LABEL_MANAGED.to_owned(), "true".to_owned())])
}

fn sanitize(part: &str) -> String {
    let mut out: String = part
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();
    while out.contains("--") {
        out = out.replace("--", "-");
    }
    out.trim_matches('-').to_owned()
}

/// `dockyard-<suite>-<part>-<run>`, restricted to Docker's allowed name characters.
pub fn resource_name(suite: &str, part: &str, run_id: &str) -> String {
    let mut pieces = vec![NAME_PREFIX.to_owned(), sanitize(suite)];
    let part = sanitize(part);
    if !part.is_empty() {
        pieces.push(part);
    }
    pieces.push(sanitize(run_id));
    pieces.retain(|p| !p.is_empty());
    pieces.join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_ids_are_distinct() {
        let a = new_run_id();
        let b = new_run_id();
        assert_eq!(a.len(), 10);
        assert_ne!(a, b);
    }

    #[test]
    fn names_are_docker_safe() {
        assert_eq!(
            resource_name("Users API", "db/primary", "abc123"),
            "dockyard-users-api-db-primary-abc123"
        );
        assert_eq!(resource_name("s", "", "r"), "dockyard-s-r");
    }

    #[test]
    fn managed_labels_include_filter() {
        let labels = managed_labels("suite", "run");
        for (k, v) in managed_filter() {
            assert_eq!(labels.get(&k), Some(&v));
        }
        assert_eq!(labels.get(LABEL_SUITE).map(String::as_str), Some("suite"));
    }
}
