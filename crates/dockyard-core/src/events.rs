use crate::case::TestOutcome;
use crate::cleanup::{CleanupFailure, CleanupReport};
use crate::results::{RunSummary, SuiteResult};
use crate::CoreError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const DEFAULT_SLICE_BUDGET: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    SuiteStarted,
    UnitStarting,
    UnitReady,
    UnitFailed { reason: String },
    UnitStopped,
    SetupRetry { attempt: u32, max_attempts: u32, reason: String },
    TestStarted,
    TestFinished { outcome: TestOutcome },
    CleanupFailed { failure: CleanupFailure },
    SuiteFinished { result: SuiteResult },
    /// Process-wide teardown after the last suite.
    CleanupFinished { report: CleanupReport },
    Cancelled,
}

/// An immutable record of one lifecycle transition or outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub suite: String,
    /// The emitting unit or test, if any.
    pub source: Option<String>,
    pub message: String,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    pub fn new(suite: &str, source: Option<&str>, kind: EventKind) -> Self {
        let message = describe(suite, source, &kind);
        Self {
            timestamp: Utc::now(),
            suite: suite.to_owned(),
            source: source.map(str::to_owned),
            message,
            kind,
        }
    }
}

fn describe(suite: &str, source: Option<&str>, kind: &EventKind) -> String {
    let src = source.unwrap_or(suite);
    match kind {
        EventKind::SuiteStarted => format!("suite {suite} started"),
        EventKind::UnitStarting => format!("starting unit {src}"),
        EventKind::UnitReady => format!("unit {src} is ready"),
        EventKind::UnitFailed { reason } => format!("unit {src} failed: {reason}"),
        EventKind::UnitStopped => format!("unit {src} stopped"),
        EventKind::SetupRetry {
            attempt,
            max_attempts,
            reason,
        } => format!("setup attempt {attempt}/{max_attempts} failed, retrying: {reason}"),
        EventKind::TestStarted => format!("running test {src}"),
        EventKind::TestFinished { outcome } => match &outcome.message {
            Some(m) if !outcome.passed => format!("test {} failed: {m}", outcome.name),
            _ => format!("test {} passed", outcome.name),
        },
        EventKind::CleanupFailed { failure } => format!("could not remove {failure}"),
        EventKind::SuiteFinished { result } => {
            if result.passed() {
                format!("suite {suite} passed")
            } else {
                format!("suite {suite} failed")
            }
        }
        EventKind::CleanupFinished { report } => format!(
            "final cleanup removed {} resource(s), {} failure(s)",
            report.removed(),
            report.failures.len()
        ),
        EventKind::Cancelled => "run cancelled".to_owned(),
    }
}

/// A report processor fed by the dispatch loop.
///
/// `on_event` runs on the dispatch thread; an implementation that takes
/// longer than the bus slice budget is reported in the log.
pub trait EventConsumer: Send {
    fn name(&self) -> &str;

    fn on_event(&mut self, event: &Event);

    /// Terminal signal, delivered once after the bus is closed and drained.
    fn finish(&mut self, _summary: &RunSummary) -> Result<(), CoreError> {
        Ok(())
    }
}

enum Envelope {
    Event(Box<Event>),
    Close,
}

/// Ordered list of consumers, started into a single dispatch loop.
pub struct EventBus {
    consumers: Vec<Box<dyn EventConsumer>>,
    slice_budget: Duration,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            consumers: Vec::new(),
            slice_budget: DEFAULT_SLICE_BUDGET,
        }
    }

    #[must_use]
    pub fn with_slice_budget(mut self, budget: Duration) -> Self {
        self.slice_budget = budget;
        self
    }

    /// Consumers receive events in subscription order.
    pub fn subscribe(&mut self, consumer: Box<dyn EventConsumer>) {
        self.consumers.push(consumer);
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    /// Spawn the dispatch loop. Must be called inside a tokio runtime.
    pub fn start(self, run_id: &str) -> (EventSender, DispatchHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let run_id = run_id.to_owned();
        let handle = tokio::task::spawn_blocking(move || {
            dispatch(rx, self.consumers, self.slice_budget, run_id)
        });
        let sender = EventSender {
            tx,
            closed: Arc::new(AtomicBool::new(false)),
        };
        (sender, DispatchHandle { handle })
    }
}

fn dispatch(
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    mut consumers: Vec<Box<dyn EventConsumer>>,
    budget: Duration,
    run_id: String,
) -> RunSummary {
    let started = Instant::now();
    let mut summary = RunSummary {
        run_id,
        ..RunSummary::default()
    };

    while let Some(envelope) = rx.blocking_recv() {
        let Envelope::Event(event) = envelope else {
            break;
        };
        for consumer in &mut consumers {
            let t = Instant::now();
            consumer.on_event(&event);
            let elapsed = t.elapsed();
            if elapsed > budget {
                warn!(
                    consumer = consumer.name(),
                    elapsed_ms = elapsed.as_millis(),
                    "report consumer exceeded its processing slice"
                );
            }
        }
        accumulate(&mut summary, *event);
    }

    summary.duration = started.elapsed();
    let mut errors = Vec::new();
    for consumer in &mut consumers {
        if let Err(e) = consumer.finish(&summary) {
            warn!(consumer = consumer.name(), "report consumer failed: {e}");
            errors.push(format!("{}: {e}", consumer.name()));
        }
    }
    summary.report_errors = errors;
    debug!(suites = summary.suites.len(), "event bus drained");
    summary
}

fn accumulate(summary: &mut RunSummary, event: Event) {
    match event.kind {
        EventKind::SuiteFinished { result } => summary.suites.push(result),
        EventKind::CleanupFinished { report } => match &mut summary.final_cleanup {
            Some(existing) => existing.merge(report),
            None => summary.final_cleanup = Some(report),
        },
        EventKind::Cancelled => summary.cancelled = true,
        _ => {}
    }
}

/// Producer side of the bus. Cheap to clone; never blocks.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Envelope>,
    closed: Arc<AtomicBool>,
}

impl EventSender {
    /// Events published after `close` are dropped.
    pub fn publish(&self, event: Event) {
        if self.closed.load(Ordering::SeqCst) {
            debug!(message = %event.message, "event published after close, dropped");
            return;
        }
        let _ = self.tx.send(Envelope::Event(Box::new(event)));
    }

    pub fn emit(&self, suite: &str, source: Option<&str>, kind: EventKind) {
        self.publish(Event::new(suite, source, kind));
    }

    /// Close the queue. Events already queued are still delivered.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.tx.send(Envelope::Close);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct DispatchHandle {
    handle: JoinHandle<RunSummary>,
}

impl DispatchHandle {
    /// Wait for the loop to drain and every consumer's `finish` to return.
    pub async fn join(self) -> Result<RunSummary, CoreError> {
        self.handle
            .await
            .map_err(|e| CoreError::EventBus(format!("dispatch loop failed: {e}")))
    }
}

/// Keeps every event it receives; shares them through an `Arc` so tests and
/// callers can inspect the stream after the run.
#[derive(Clone, Default)]
pub struct RecordingConsumer {
    events: Arc<Mutex<Vec<Event>>>,
    finished: Arc<AtomicBool>,
}

impl RecordingConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

impl EventConsumer for RecordingConsumer {
    fn name(&self) -> &str {
        "recorder"
    }

    fn on_event(&mut self, event: &Event) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }

    fn finish(&mut self, _summary: &RunSummary) -> Result<(), CoreError> {
        self.finished.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ordered {
        id: usize,
        log: Arc<Mutex<Vec<(usize, String)>>>,
    }

    impl EventConsumer for Ordered {
        fn name(&self) -> &str {
            "ordered"
        }
        fn on_event(&mut self, event: &Event) {
            self.log.lock().unwrap().push((self.id, event.message.clone()));
        }
    }

    struct Failing;

    impl EventConsumer for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn on_event(&mut self, _event: &Event) {}
        fn finish(&mut self, _summary: &RunSummary) -> Result<(), CoreError> {
            Err(CoreError::Io(std::io::Error::other("disk full")))
        }
    }

    #[tokio::test]
    async fn fans_out_in_subscription_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        bus.subscribe(Box::new(Ordered { id: 0, log: log.clone() }));
        bus.subscribe(Box::new(Ordered { id: 1, log: log.clone() }));
        let (tx, handle) = bus.start("run");

        tx.emit("s", None, EventKind::SuiteStarted);
        tx.emit("s", Some("db"), EventKind::UnitStarting);
        tx.close();
        handle.join().await.unwrap();

        let log = log.lock().unwrap().clone();
        let ids: Vec<_> = log.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![0, 1, 0, 1]);
        assert_eq!(log[2].1, "starting unit db");
    }

    #[tokio::test]
    async fn accumulates_results_and_signals_finish() {
        let recorder = RecordingConsumer::new();
        let mut bus = EventBus::new();
        bus.subscribe(Box::new(recorder.clone()));
        let (tx, handle) = bus.start("run");

        tx.emit(
            "s",
            None,
            EventKind::SuiteFinished {
                result: SuiteResult::new("s"),
            },
        );
        tx.close();
        tx.emit("s", None, EventKind::SuiteStarted);
        let summary = handle.join().await.unwrap();

        assert_eq!(summary.run_id, "run");
        assert_eq!(summary.suites.len(), 1);
        assert!(recorder.finished());
        assert_eq!(recorder.events().len(), 1);
    }

    #[tokio::test]
    async fn consumer_finish_errors_are_reported() {
        let mut bus = EventBus::new();
        bus.subscribe(Box::new(Failing));
        let (tx, handle) = bus.start("run");
        tx.close();
        let summary = handle.join().await.unwrap();
        assert_eq!(summary.report_errors.len(), 1);
        assert!(summary.report_errors[0].contains("disk full"));
        assert_eq!(summary.exit_code(), 1);
    }

    #[tokio::test]
    async fn dropping_every_sender_ends_the_loop() {
        let (tx, handle) = EventBus::new().start("run");
        tx.emit("s", None, EventKind::Cancelled);
        drop(tx);
        let summary = handle.join().await.unwrap();
        assert!(summary.cancelled);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = Event::new("s", Some("db"), EventKind::UnitReady);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "unit_ready");
        assert_eq!(json["source"], "db");
    }
}
