use crate::commands::write_atomic;
use dockyard_core::{CoreError, Event, EventConsumer, RunSummary, SuiteResult};
use dockyard_schema::format_duration;
use std::fmt::Write;
use std::path::PathBuf;

const STYLE: &str = "body{font-family:sans-serif;margin:2em}\
table{border-collapse:collapse;margin-bottom:1.5em}\
td,th{border:1px solid #ccc;padding:4px 8px;text-align:left}\
.pass{color:#186a3b}.fail{color:#b03a2e}.muted{color:#777}";

/// Writes a single self-contained HTML page once the run ends.
pub struct HtmlReporter {
    path: PathBuf,
}

impl HtmlReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn verdict(passed: bool) -> &'static str {
    if passed {
        "<span class=\"pass\">passed</span>"
    } else {
        "<span class=\"fail\">failed</span>"
    }
}

fn render_suite(out: &mut String, suite: &SuiteResult) {
    let _ = writeln!(
        out,
        "<h2>{} {}</h2>",
        escape(&suite.name),
        verdict(suite.passed())
    );
    if let Some(path) = &suite.path {
        let _ = writeln!(out, "<p class=\"muted\">{}</p>", escape(&path.display().to_string()));
    }
    if let Some(err) = suite.config_error.as_deref().or(suite.setup_error.as_deref()) {
        let _ = writeln!(out, "<p class=\"fail\">{}</p>", escape(err));
    }
    if suite.cancelled {
        let _ = writeln!(out, "<p class=\"fail\">cancelled</p>");
    }
    if !suite.tests.is_empty() {
        out.push_str("<table><tr><th>Test</th><th>Kind</th><th>Target</th><th>Result</th><th>Time</th><th>Message</th></tr>\n");
        for t in &suite.tests {
            let _ = writeln!(
                out,
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                escape(&t.name),
                escape(&t.kind),
                escape(&t.target),
                verdict(t.passed),
                format_duration(t.duration),
                escape(t.message.as_deref().unwrap_or_default())
            );
        }
        out.push_str("</table>\n");
    }
    for f in &suite.cleanup_failures {
        let _ = writeln!(out, "<p class=\"fail\">could not remove {}</p>", escape(&f.to_string()));
    }
}

pub fn render(summary: &RunSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Dockyard run {}</title><style>{STYLE}</style></head><body>",
        escape(&summary.run_id)
    );
    let _ = writeln!(
        out,
        "<h1>Dockyard run {} {}</h1>\n<p>{} suite(s), {} test(s), {} failed, {}</p>",
        escape(&summary.run_id),
        verdict(summary.passed()),
        summary.suites.len(),
        summary.total_tests(),
        summary.failed_tests(),
        format_duration(summary.duration)
    );
    if summary.cancelled {
        out.push_str("<p class=\"fail\">The run was cancelled.</p>\n");
    }
    for suite in &summary.suites {
        render_suite(&mut out, suite);
    }
    if let Some(report) = &summary.final_cleanup {
        for f in &report.failures {
            let _ = writeln!(out, "<p class=\"fail\">could not remove {}</p>", escape(&f.to_string()));
        }
    }
    out.push_str("</body></html>\n");
    out
}

impl EventConsumer for HtmlReporter {
    fn name(&self) -> &str {
        "html"
    }

    fn on_event(&mut self, _event: &Event) {}

    fn finish(&mut self, summary: &RunSummary) -> Result<(), CoreError> {
        write_atomic(&self.path, &render(summary))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockyard_core::TestOutcome;
    use std::time::Duration;

    #[test]
    fn escapes_markup() {
        assert_eq!(escape("<a href=\"x\">&</a>"), "&lt;a href=&quot;x&quot;&gt;&amp;&lt;/a&gt;");
    }

    #[test]
    fn renders_suites_and_failures() {
        let mut suite = SuiteResult::new("users");
        suite.tests.push(TestOutcome::fail(
            "create <user>",
            "http",
            "api",
            "expected status 201, got 500".to_owned(),
            Duration::from_millis(3),
        ));
        let summary = RunSummary {
            run_id: "abc".to_owned(),
            suites: vec![suite],
            ..RunSummary::default()
        };
        let page = render(&summary);
        assert!(page.starts_with("<!DOCTYPE html>"));
        assert!(page.contains("create &lt;user&gt;"));
        assert!(page.contains("got 500"));
        assert!(page.contains("class=\"fail\""));
    }

    #[test]
    fn finish_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.html");
        HtmlReporter::new(&path).finish(&RunSummary::default()).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("</html>"));
    }
}
