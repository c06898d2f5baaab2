use crate::commands::write_atomic;
use dockyard_core::{CoreError, Event, EventConsumer, RunSummary};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Serialize)]
struct JsonReport<'a> {
    summary: &'a RunSummary,
    passed: bool,
    events: &'a [Event],
}

/// Buffers every event and writes `{summary, passed, events}` to a file once
/// the run ends.
pub struct JsonReporter {
    path: PathBuf,
    events: Vec<Event>,
}

impl JsonReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            events: Vec::new(),
        }
    }
}

impl EventConsumer for JsonReporter {
    fn name(&self) -> &str {
        "json"
    }

    fn on_event(&mut self, event: &Event) {
        self.events.push(event.clone());
    }

    fn finish(&mut self, summary: &RunSummary) -> Result<(), CoreError> {
        let report = JsonReport {
            summary,
            passed: summary.passed(),
            events: &self.events,
        };
        let body = serde_json::to_string_pretty(&report).map_err(std::io::Error::from)?;
        write_atomic(&self.path, &body)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockyard_core::{EventKind, SuiteResult};

    #[test]
    fn writes_summary_and_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let mut reporter = JsonReporter::new(&path);
        reporter.on_event(&Event::new("users", None, EventKind::SuiteStarted));
        reporter.on_event(&Event::new("users", Some("db"), EventKind::UnitReady));
        let summary = RunSummary {
            run_id: "r1".to_owned(),
            suites: vec![SuiteResult::new("users")],
            ..RunSummary::default()
        };
        reporter.finish(&summary).unwrap();

        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["passed"], true);
        assert_eq!(doc["summary"]["run_id"], "r1");
        assert_eq!(doc["events"].as_array().unwrap().len(), 2);
        assert_eq!(doc["events"][0]["type"], "suite_started");
        assert_eq!(doc["events"][1]["source"], "db");
    }

    #[test]
    fn unwritable_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut reporter = JsonReporter::new(dir.path().join("missing").join("report.json"));
        assert!(reporter.finish(&RunSummary::default()).is_err());
    }
}
