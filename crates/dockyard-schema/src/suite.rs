use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::discover::SUITE_FILE_SUFFIX;

#[derive(Debug, Error)]
pub enum SuiteError {
    #[error("failed to read suite file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse suite: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("suite name must not be empty")]
    EmptyName,
    #[error("suite '{0}' declares no units")]
    NoUnits(String),
    #[error("suite '{suite}': unit name must not be empty")]
    EmptyUnitName { suite: String },
    #[error("suite '{suite}': duplicate unit name '{unit}'")]
    DuplicateUnit { suite: String, unit: String },
    #[error("suite '{suite}': test name must not be empty")]
    EmptyTestName { suite: String },
    #[error("suite '{suite}': duplicate test name '{test}'")]
    DuplicateTest { suite: String, test: String },
    #[error("suite '{suite}': kind must not be empty for '{entry}'")]
    EmptyKind { suite: String, entry: String },
    #[error("suite '{suite}': default target '{target}' is not a declared unit")]
    UnknownDefaultTarget { suite: String, target: String },
    #[error("suite '{suite}': test '{test}' targets '{target}', which is not a declared unit")]
    UnknownTarget {
        suite: String,
        test: String,
        target: String,
    },
    #[error("suite '{suite}': test '{test}' has no target and the suite declares no default")]
    MissingTarget { suite: String, test: String },
    #[error("invalid fields for '{entry}': {reason}")]
    InvalidFields { entry: String, reason: String },
    #[error("invalid duration '{0}' (expected e.g. 30s, 5m, 1h30m, 7d)")]
    InvalidDuration(String),
    #[error("unknown template '{key}' (expected: {valid})")]
    UnknownTemplate { key: String, valid: String },
    #[error("invalid suite name '{0}': use letters, digits, '-', '_' or '.'")]
    InvalidName(String),
}

/// One suite document: units sharing a network plus the tests run against them.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SuiteSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub units: Vec<UnitSpec>,
    #[serde(default)]
    pub tests: Vec<TestSpec>,
}

/// A unit entry. Only `name` and `kind` are interpreted here; every other
/// key is kept in `fields` for the kind's constructor.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct UnitSpec {
    pub name: String,
    pub kind: String,
    #[serde(flatten)]
    pub fields: toml::Table,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TestSpec {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(flatten)]
    pub fields: toml::Table,
}

fn decode_fields<T: DeserializeOwned>(entry: &str, fields: &toml::Table) -> Result<T, SuiteError> {
    toml::Value::Table(fields.clone())
        .try_into()
        .map_err(|e: toml::de::Error| SuiteError::InvalidFields {
            entry: entry.to_owned(),
            reason: e.message().to_owned(),
        })
}

impl UnitSpec {
    /// Decode the kind-specific fields into an adapter's own type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, SuiteError> {
        decode_fields(&self.name, &self.fields)
    }
}

impl TestSpec {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, SuiteError> {
        decode_fields(&self.name, &self.fields)
    }
}

impl SuiteSpec {
    /// Run every configuration check that can be done without touching the
    /// container runtime.
    pub fn validate(&self) -> Result<(), SuiteError> {
        if self.name.trim().is_empty() {
            return Err(SuiteError::EmptyName);
        }
        if self.units.is_empty() {
            return Err(SuiteError::NoUnits(self.name.clone()));
        }

        let mut unit_names: HashSet<&str> = HashSet::new();
        for unit in &self.units {
            if unit.name.trim().is_empty() {
                return Err(SuiteError::EmptyUnitName {
                    suite: self.name.clone(),
                });
            }
            if unit.kind.trim().is_empty() {
                return Err(SuiteError::EmptyKind {
                    suite: self.name.clone(),
                    entry: unit.name.clone(),
                });
            }
            if !unit_names.insert(unit.name.as_str()) {
                return Err(SuiteError::DuplicateUnit {
                    suite: self.name.clone(),
                    unit: unit.name.clone(),
                });
            }
        }

        // A dangling default is only tolerated when no test relies on it.
        if let Some(default) = &self.target {
            let needed = self.tests.iter().any(|t| t.target.is_none());
            if needed && !unit_names.contains(default.as_str()) {
                return Err(SuiteError::UnknownDefaultTarget {
                    suite: self.name.clone(),
                    target: default.clone(),
                });
            }
        }

        let mut test_names: HashSet<&str> = HashSet::new();
        for test in &self.tests {
            if test.name.trim().is_empty() {
                return Err(SuiteError::EmptyTestName {
                    suite: self.name.clone(),
                });
            }
            if test.kind.trim().is_empty() {
                return Err(SuiteError::EmptyKind {
                    suite: self.name.clone(),
                    entry: test.name.clone(),
                });
            }
            if !test_names.insert(test.name.as_str()) {
                return Err(SuiteError::DuplicateTest {
                    suite: self.name.clone(),
                    test: test.name.clone(),
                });
            }
            match self.resolve_target(test) {
                None => {
                    return Err(SuiteError::MissingTarget {
                        suite: self.name.clone(),
                        test: test.name.clone(),
                    })
                }
                Some(target) if !unit_names.contains(target) => {
                    return Err(SuiteError::UnknownTarget {
                        suite: self.name.clone(),
                        test: test.name.clone(),
                        target: target.to_owned(),
                    })
                }
                Some(_) => {}
            }
        }

        Ok(())
    }

    /// The unit a test runs against: its own override, else the suite default.
    pub fn resolve_target<'a>(&'a self, test: &'a TestSpec) -> Option<&'a str> {
        test.target.as_deref().or(self.target.as_deref())
    }

    pub fn unit(&self, name: &str) -> Option<&UnitSpec> {
        self.units.iter().find(|u| u.name == name)
    }
}

/// Parse a suite document. `fallback_name` is used when the document has no
/// top-level `name`.
pub fn parse_suite_str(input: &str, fallback_name: &str) -> Result<SuiteSpec, SuiteError> {
    let mut spec: SuiteSpec = toml::from_str(input)?;
    if spec.name.trim().is_empty() {
        fallback_name.clone_into(&mut spec.name);
    }
    Ok(spec)
}

pub fn parse_suite_file(path: impl AsRef<Path>) -> Result<SuiteSpec, SuiteError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    parse_suite_str(&content, &suite_name_from_path(path))
}

/// `users-api.suite.toml` -> `users-api`.
pub fn suite_name_from_path(path: &Path) -> String {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if let Some(stripped) = file_name.strip_suffix(SUITE_FILE_SUFFIX) {
        return stripped.to_owned();
    }
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
name = "users-api"
target = "api"

[[units]]
name = "db"
kind = "postgres"
database = "users"

[[units]]
name = "api"
kind = "container"
image = "example/users:latest"
ports = [8080]

[[tests]]
name = "health"
kind = "http"
path = "/health"

[[tests]]
name = "db reachable"
kind = "sql"
target = "db"
query = "select 1"
"#;

    #[test]
    fn parses_full_suite() {
        let suite = parse_suite_str(FULL, "fallback").expect("should parse");
        assert_eq!(suite.name, "users-api");
        assert_eq!(suite.units.len(), 2);
        assert_eq!(suite.tests.len(), 2);
        assert_eq!(suite.units[0].kind, "postgres");
        assert_eq!(
            suite.units[0].fields.get("database").and_then(|v| v.as_str()),
            Some("users")
        );
        assert!(!suite.units[1].fields.contains_key("name"));
        suite.validate().unwrap();
    }

    #[test]
    fn per_test_target_wins_over_default() {
        let suite = parse_suite_str(FULL, "fallback").unwrap();
        assert_eq!(suite.resolve_target(&suite.tests[0]), Some("api"));
        assert_eq!(suite.resolve_target(&suite.tests[1]), Some("db"));
    }

    #[test]
    fn fallback_name_used_when_missing() {
        let input = r#"
[[units]]
name = "db"
kind = "postgres"
"#;
        let suite = parse_suite_str(input, "from-file").unwrap();
        assert_eq!(suite.name, "from-file");
    }

    #[test]
    fn rejects_unknown_top_level_fields() {
        let input = r#"
name = "x"
colour = "blue"
"#;
        assert!(parse_suite_str(input, "x").is_err());
    }

    #[test]
    fn rejects_duplicate_unit_names() {
        let input = r#"
name = "dup"
[[units]]
name = "db"
kind = "postgres"
[[units]]
name = "db"
kind = "mongo"
"#;
        let err = parse_suite_str(input, "dup").unwrap().validate().unwrap_err();
        assert!(matches!(err, SuiteError::DuplicateUnit { ref unit, .. } if unit == "db"));
    }

    #[test]
    fn rejects_duplicate_test_names() {
        let input = r#"
name = "dup"
target = "db"
[[units]]
name = "db"
kind = "postgres"
[[tests]]
name = "t"
kind = "sql"
[[tests]]
name = "t"
kind = "sql"
"#;
        let err = parse_suite_str(input, "dup").unwrap().validate().unwrap_err();
        assert!(matches!(err, SuiteError::DuplicateTest { .. }));
    }

    #[test]
    fn rejects_unresolved_test_target() {
        let input = r#"
name = "bad"
[[units]]
name = "db"
kind = "postgres"
[[tests]]
name = "t"
kind = "sql"
target = "cache"
"#;
        let err = parse_suite_str(input, "bad").unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("'cache'"));
    }

    #[test]
    fn rejects_test_without_any_target() {
        let input = r#"
name = "bad"
[[units]]
name = "db"
kind = "postgres"
[[tests]]
name = "t"
kind = "sql"
"#;
        let err = parse_suite_str(input, "bad").unwrap().validate().unwrap_err();
        assert!(matches!(err, SuiteError::MissingTarget { .. }));
    }

    #[test]
    fn dangling_default_allowed_when_every_test_has_target() {
        let input = r#"
name = "ok"
target = "gone"
[[units]]
name = "db"
kind = "postgres"
[[tests]]
name = "t"
kind = "sql"
target = "db"
"#;
        parse_suite_str(input, "ok").unwrap().validate().unwrap();
    }

    #[test]
    fn dangling_default_rejected_when_used() {
        let input = r#"
name = "bad"
target = "gone"
[[units]]
name = "db"
kind = "postgres"
[[tests]]
name = "t"
kind = "sql"
"#;
        let err = parse_suite_str(input, "bad").unwrap().validate().unwrap_err();
        assert!(matches!(err, SuiteError::UnknownDefaultTarget { .. }));
    }

    #[test]
    fn rejects_suite_without_units() {
        let err = parse_suite_str("name = \"empty\"", "empty")
            .unwrap()
            .validate()
            .unwrap_err();
        assert!(matches!(err, SuiteError::NoUnits(_)));
    }

    #[test]
    fn rejects_empty_kind() {
        let input = r#"
name = "bad"
[[units]]
name = "db"
kind = ""
"#;
        let err = parse_suite_str(input, "bad").unwrap().validate().unwrap_err();
        assert!(matches!(err, SuiteError::EmptyKind { .. }));
    }

    #[test]
    fn decode_kind_fields() {
        #[derive(Deserialize)]
        struct Fields {
            image: String,
            ports: Vec<u16>,
        }
        let suite = parse_suite_str(FULL, "x").unwrap();
        let fields: Fields = suite.unit("api").unwrap().decode().unwrap();
        assert_eq!(fields.image, "example/users:latest");
        assert_eq!(fields.ports, vec![8080]);
    }

    #[test]
    fn decode_reports_entry_name() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Fields {
            required: String,
        }
        let suite = parse_suite_str(FULL, "x").unwrap();
        let err = suite.unit("db").unwrap().decode::<Fields>().unwrap_err();
        assert!(matches!(err, SuiteError::InvalidFields { ref entry, .. } if entry == "db"));
    }

    #[test]
    fn suite_name_from_suffixed_path() {
        assert_eq!(
            suite_name_from_path(Path::new("/x/users-api.suite.toml")),
            "users-api"
        );
        assert_eq!(suite_name_from_path(Path::new("/x/other.toml")), "other");
    }

    #[test]
    fn parse_file_uses_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orders.suite.toml");
        fs::write(&path, "[[units]]\nname = \"db\"\nkind = \"postgres\"\n").unwrap();
        let suite = parse_suite_file(&path).unwrap();
        assert_eq!(suite.name, "orders");
    }
}
