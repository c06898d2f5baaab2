use console::Style;
use dockyard_core::{CoreError, Event, EventConsumer, EventKind, RunSummary};
use dockyard_schema::format_duration;

/// Human-readable progress on stdout. Unit lifecycle lines are shown only
/// when verbose.
pub struct ConsoleReporter {
    verbose: bool,
}

impl ConsoleReporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

fn ok(s: &str) -> String {
    Style::new().green().apply_to(s).to_string()
}

fn bad(s: &str) -> String {
    Style::new().red().bold().apply_to(s).to_string()
}

fn dim(s: &str) -> String {
    Style::new().dim().apply_to(s).to_string()
}

pub fn format_event(event: &Event, verbose: bool) -> Option<String> {
    let line = match &event.kind {
        EventKind::SuiteStarted => format!("▶ suite {}", event.suite),
        EventKind::UnitStarting | EventKind::UnitReady | EventKind::UnitStopped => {
            if !verbose {
                return None;
            }
            format!("  {}", dim(&event.message))
        }
        EventKind::UnitFailed { .. } => format!("  {} {}", bad("✗"), event.message),
        EventKind::SetupRetry { .. } => format!("  {} {}", Style::new().yellow().apply_to("↻"), event.message),
        EventKind::TestStarted => {
            if !verbose {
                return None;
            }
            format!("  {}", dim(&event.message))
        }
        EventKind::TestFinished { outcome } => {
            let took = format_duration(outcome.duration);
            match &outcome.message {
                Some(m) if !outcome.passed => format!("  {} {} ({took}): {m}", bad("✗"), outcome.name),
                _ => format!("  {} {} ({took})", ok("✓"), outcome.name),
            }
        }
        EventKind::CleanupFailed { failure } => {
            format!("  {} could not remove {failure}", Style::new().yellow().apply_to("!"))
        }
        EventKind::SuiteFinished { result } => {
            if let Some(err) = &result.config_error {
                format!("{} suite {}: {err}", bad("✗"), result.name)
            } else if result.cancelled {
                format!("{} suite {} cancelled", bad("✗"), result.name)
            } else if let Some(err) = &result.setup_error {
                format!("{} suite {}: setup failed: {err}", bad("✗"), result.name)
            } else {
                let mark = if result.passed() { ok("✓") } else { bad("✗") };
                format!(
                    "{mark} suite {}: {}/{} tests passed ({})",
                    result.name,
                    result.passed_tests(),
                    result.tests.len(),
                    format_duration(result.duration)
                )
            }
        }
        EventKind::CleanupFinished { report } => {
            if report.is_clean() && !verbose {
                return None;
            }
            event.message.clone()
        }
        EventKind::Cancelled => bad("run cancelled"),
    };
    Some(line)
}

pub fn format_summary(summary: &RunSummary) -> String {
    let failed_suites = summary.suites.iter().filter(|s| !s.passed()).count();
    let mut out = format!(
        "\n{} suite(s), {} failed; {} test(s), {} failed; {}",
        summary.suites.len(),
        failed_suites,
        summary.total_tests(),
        summary.failed_tests(),
        format_duration(summary.duration)
    );
    let leaked: Vec<_> = summary.cleanup_failures().collect();
    if !leaked.is_empty() {
        out.push_str(&format!("\n{} resource(s) could not be removed:", leaked.len()));
        for f in leaked {
            out.push_str(&format!("\n  {f}"));
        }
        out.push_str("\nrun `dockyard cleanup` to remove them");
    }
    let verdict = if summary.passed() { ok("PASSED") } else { bad("FAILED") };
    out.push_str(&format!("\n{verdict}"));
    out
}

impl EventConsumer for ConsoleReporter {
    fn name(&self) -> &str {
        "console"
    }

    fn on_event(&mut self, event: &Event) {
        if let Some(line) = format_event(event, self.verbose) {
            println!("{line}");
        }
    }

    fn finish(&mut self, summary: &RunSummary) -> Result<(), CoreError> {
        println!("{}", format_summary(summary));
        Ok(())
    }
}
