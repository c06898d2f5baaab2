use super::{json_pretty, write_atomic, EXIT_SUCCESS};
use dialoguer::Confirm;
use dockyard_schema::{render_scaffold, SUITE_FILE_SUFFIX};
use std::io::{stderr, stdin, IsTerminal};
use std::path::Path;

fn ensure_can_write(dest: &Path, force: bool, is_tty: bool) -> Result<(), String> {
    if !dest.exists() || force {
        return Ok(());
    }
    let refuse = || format!("refusing to overwrite existing {} (pass --force)", dest.display());
    if !is_tty {
        return Err(refuse());
    }
    let overwrite = Confirm::new()
        .with_prompt(format!("overwrite {}?", dest.display()))
        .default(false)
        .interact()
        .map_err(|e| format!("prompt failed: {e}"))?;
    if overwrite {
        Ok(())
    } else {
        Err(refuse())
    }
}

/// Write `<out_dir>/<name>.suite.toml` from the selected templates.
pub fn run(name: &str, templates: &[String], out_dir: &Path, force: bool, json: bool) -> Result<u8, String> {
    let keys: Vec<&str> = templates.iter().map(String::as_str).collect();
    let doc = render_scaffold(name, &keys).map_err(|e| e.to_string())?;

    if !out_dir.is_dir() {
        return Err(format!("output directory {} does not exist", out_dir.display()));
    }
    let dest = out_dir.join(format!("{name}{SUITE_FILE_SUFFIX}"));
    let is_tty = stdin().is_terminal() && stderr().is_terminal();
    ensure_can_write(&dest, force, is_tty)?;
    write_atomic(&dest, &doc).map_err(|e| format!("failed to write {}: {e}", dest.display()))?;

    if json {
        let used = if keys.is_empty() { vec!["http"] } else { keys };
        let payload = serde_json::json!({
            "status": "written",
            "path": dest,
            "name": name,
            "templates": used,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("wrote {}", dest.display());
    }
    Ok(EXIT_SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockyard_schema::parse_suite_file;

    #[test]
    fn writes_parsable_suite() {
        let dir = tempfile::tempdir().unwrap();
        let tmpl = vec!["postgres".to_owned(), "http".to_owned()];
        run("users", &tmpl, dir.path(), false, false).unwrap();
        let suite = parse_suite_file(dir.path().join("users.suite.toml")).unwrap();
        suite.validate().unwrap();
        assert_eq!(suite.name, "users");
        assert_eq!(suite.units.len(), 2);
    }

    #[test]
    fn refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("users.suite.toml");
        std::fs::write(&dest, "keep me").unwrap();
        let err = ensure_can_write(&dest, false, false).unwrap_err();
        assert!(err.contains("--force"));
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "keep me");

        run("users", &[], dir.path(), true, false).unwrap();
        assert_ne!(std::fs::read_to_string(&dest).unwrap(), "keep me");
    }

    #[test]
    fn unknown_template_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = run("x", &["redis".to_owned()], dir.path(), false, false).unwrap_err();
        assert!(err.contains("redis"));
        assert!(!dir.path().join("x.suite.toml").exists());
    }
}
