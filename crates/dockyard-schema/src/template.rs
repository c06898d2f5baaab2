use crate::suite::SuiteError;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Template {
    pub key: &'static str,
    pub description: &'static str,
    /// Name of the unit the snippet declares; the first selected template's
    /// unit becomes the suite default target.
    pub unit: &'static str,
    pub units: &'static str,
    pub tests: &'static str,
}

pub const TEMPLATES: &[Template] = &[
    Template {
        key: "http",
        description: "Application container with an HTTP health check",
        unit: "api",
        units: r#"[[units]]
name = "api"
kind = "container"
image = "ghcr.io/example/api:latest"
ports = [8080]
ready = "tcp"
"#,
        tests: r#"[[tests]]
name = "api health"
kind = "http"
target = "api"
method = "GET"
path = "/health"
expect_status = 200
"#,
    },
    Template {
        key: "container",
        description: "Generic container started from an image",
        unit: "app",
        units: r#"[[units]]
name = "app"
kind = "container"
image = "alpine:3.20"
command = ["sleep", "infinity"]
ready = "running"
"#,
        tests: "",
    },
    Template {
        key: "postgres",
        description: "PostgreSQL database",
        unit: "db",
        units: r#"[[units]]
name = "db"
kind = "postgres"
database = "app"
"#,
        tests: "",
    },
    Template {
        key: "mongo",
        description: "MongoDB database",
        unit: "mongo",
        units: r#"[[units]]
name = "mongo"
kind = "mongo"
"#,
        tests: "",
    },
    Template {
        key: "minio",
        description: "S3-compatible object storage",
        unit: "storage",
        units: r#"[[units]]
name = "storage"
kind = "minio"
bucket = "fixtures"
"#,
        tests: "",
    },
];

pub fn template_keys() -> Vec<&'static str> {
    TEMPLATES.iter().map(|t| t.key).collect()
}

pub fn get_template(key: &str) -> Option<&'static Template> {
    TEMPLATES.iter().find(|t| t.key == key)
}

fn validate_suite_name(name: &str) -> Result<(), SuiteError> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(SuiteError::InvalidName(name.to_owned()))
    }
}

/// Build a starter suite document named `name` from the given template keys.
/// With no keys the `http` template is used.
pub fn render_scaffold(name: &str, keys: &[&str]) -> Result<String, SuiteError> {
    validate_suite_name(name)?;

    let keys: Vec<&str> = if keys.is_empty() { vec!["http"] } else { keys.to_vec() };
    let mut selected: Vec<&Template> = Vec::new();
    for key in keys {
        let tpl = get_template(key).ok_or_else(|| SuiteError::UnknownTemplate {
            key: key.to_owned(),
            valid: template_keys().join(", "),
        })?;
        if !selected.iter().any(|t| t.key == tpl.key) {
            selected.push(tpl);
        }
    }

    let mut out = format!("name = \"{name}\"\ntarget = \"{}\"\n", selected[0].unit);
    for tpl in &selected {
        out.push('\n');
        out.push_str(tpl.units);
    }
    for tpl in selected.iter().filter(|t| !t.tests.is_empty()) {
        out.push('\n');
        out.push_str(tpl.tests);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suite::parse_suite_str;

    #[test]
    fn every_template_renders_a_valid_suite() {
        for key in template_keys() {
            let doc = render_scaffold("sample", &[key]).unwrap();
            let suite = parse_suite_str(&doc, "sample").unwrap();
            suite.validate().unwrap_or_else(|e| panic!("{key}: {e}"));
        }
    }

    #[test]
    fn combined_templates_keep_first_as_default_target() {
        let doc = render_scaffold("combo", &["postgres", "http"]).unwrap();
        let suite = parse_suite_str(&doc, "combo").unwrap();
        suite.validate().unwrap();
        assert_eq!(suite.target.as_deref(), Some("db"));
        assert_eq!(suite.units.len(), 2);
        assert_eq!(suite.tests.len(), 1);
    }

    #[test]
    fn duplicate_keys_are_collapsed() {
        let doc = render_scaffold("dup", &["mongo", "mongo"]).unwrap();
        let suite = parse_suite_str(&doc, "dup").unwrap();
        assert_eq!(suite.units.len(), 1);
    }

    #[test]
    fn unknown_key_lists_valid_keys() {
        let err = render_scaffold("x", &["redis"]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("redis"));
        assert!(msg.contains("postgres"));
    }

    #[test]
    fn rejects_bad_suite_names() {
        assert!(render_scaffold("has space", &[]).is_err());
        assert!(render_scaffold("", &[]).is_err());
        assert!(render_scaffold("ok_name-1.2", &[]).is_ok());
    }
}
