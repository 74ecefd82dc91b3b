//! Execution lifecycle events
//!
//! Executors publish ordered start/end events for every unit they run.
//! Events from one stream arrive in the order they were emitted; events
//! from different streams interleave freely.

#![allow(dead_code)]

use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::models::{ItemResult, ScenarioResult, SpecResult, SuiteResult};

/// Lifecycle point an event marks
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    SuiteStart,
    SuiteEnd,
    SpecStart,
    SpecEnd,
    ScenarioStart,
    ScenarioEnd,
    ConceptStart,
    ConceptEnd,
    StepStart,
    StepEnd,
}

impl Topic {
    pub fn is_end(&self) -> bool {
        matches!(
            self,
            Topic::SuiteEnd | Topic::SpecEnd | Topic::ScenarioEnd | Topic::ConceptEnd | Topic::StepEnd
        )
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Topic::SuiteStart => "suite-start",
            Topic::SuiteEnd => "suite-end",
            Topic::SpecStart => "spec-start",
            Topic::SpecEnd => "spec-end",
            Topic::ScenarioStart => "scenario-start",
            Topic::ScenarioEnd => "scenario-end",
            Topic::ConceptStart => "concept-start",
            Topic::ConceptEnd => "concept-end",
            Topic::StepStart => "step-start",
            Topic::StepEnd => "step-end",
        };
        write!(f, "{name}")
    }
}

/// Result fragment attached to end events
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventResult {
    Suite(Box<SuiteResult>),
    Spec(Box<SpecResult>),
    Scenario(Box<ScenarioResult>),
    Item(Box<ItemResult>),
}

/// One lifecycle event
#[derive(Clone, Debug, Serialize)]
pub struct ExecutionEvent {
    pub topic: Topic,
    pub stream: usize,
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_index: Option<usize>,
    pub line_no: usize,
    /// Heading or step text
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<EventResult>,
}

impl ExecutionEvent {
    pub fn new(topic: Topic, stream: usize) -> Self {
        Self {
            topic,
            stream,
            file_name: String::new(),
            row_index: None,
            line_no: 0,
            title: String::new(),
            result: None,
        }
    }

    pub fn at(mut self, file_name: impl Into<String>, line_no: usize) -> Self {
        self.file_name = file_name.into();
        self.line_no = line_no;
        self
    }

    pub fn with_row(mut self, row_index: Option<usize>) -> Self {
        self.row_index = row_index;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_result(mut self, result: EventResult) -> Self {
        self.result = Some(result);
        self
    }
}

/// Sending half shared by every executor of a run
///
/// A disabled bus drops events; sends never fail the run.
#[derive(Clone, Debug, Default)]
pub struct EventBus {
    tx: Option<UnboundedSender<ExecutionEvent>>,
}

impl EventBus {
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Bus plus the receiver a reporter drains
    pub fn channel() -> (Self, UnboundedReceiver<ExecutionEvent>) {
        let (tx, rx) = unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn emit(&self, event: ExecutionEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                debug!("Event receiver dropped; event discarded");
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }
}

/// Render events as log lines until every sender is gone
///
/// Returns the number of events seen.
pub fn spawn_log_reporter(mut rx: UnboundedReceiver<ExecutionEvent>) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut seen = 0;
        while let Some(event) = rx.recv().await {
            seen += 1;
            log_event(&event);
        }
        seen
    })
}

fn log_event(event: &ExecutionEvent) {
    let row = event
        .row_index
        .map(|r| format!(" (row {})", r + 1))
        .unwrap_or_default();

    match (&event.topic, &event.result) {
        (Topic::SuiteEnd, Some(EventResult::Suite(suite))) => info!(
            "Suite finished: {} specs, {} failed, {} skipped in {}ms",
            suite.specs_count(),
            suite.specs_failed_count,
            suite.specs_skipped_count,
            suite.execution_time
        ),
        (Topic::SpecEnd, Some(EventResult::Spec(spec))) => {
            if spec.failed {
                warn!("[stream {}] {}{}", event.stream, spec, row);
            } else {
                info!("[stream {}] {}{}", event.stream, spec, row);
            }
        }
        (Topic::ScenarioEnd, Some(EventResult::Scenario(scenario))) => {
            debug!("[stream {}] {} {}", event.stream, event.file_name, scenario)
        }
        (Topic::StepEnd | Topic::ConceptEnd, Some(EventResult::Item(item))) => debug!(
            "[stream {}] {} {}:{} {}",
            event.stream,
            item.status().symbol(),
            event.file_name,
            event.line_no,
            event.title
        ),
        _ => debug!(
            "[stream {}] {} {}{} {}",
            event.stream, event.topic, event.file_name, row, event.title
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bus_preserves_order() {
        let (bus, mut rx) = EventBus::channel();
        bus.emit(ExecutionEvent::new(Topic::SpecStart, 1).at("a.spec", 1));
        bus.emit(ExecutionEvent::new(Topic::ScenarioStart, 1).at("a.spec", 4));
        bus.emit(ExecutionEvent::new(Topic::SpecEnd, 1).at("a.spec", 1));
        drop(bus);

        let mut topics = Vec::new();
        while let Some(event) = rx.recv().await {
            topics.push(event.topic);
        }
        assert_eq!(
            topics,
            vec![Topic::SpecStart, Topic::ScenarioStart, Topic::SpecEnd]
        );
    }

    #[tokio::test]
    async fn test_log_reporter_counts_events() {
        let (bus, rx) = EventBus::channel();
        let reporter = spawn_log_reporter(rx);
        bus.emit(ExecutionEvent::new(Topic::SuiteStart, 1));
        bus.emit(
            ExecutionEvent::new(Topic::SuiteEnd, 1)
                .with_result(EventResult::Suite(Box::new(SuiteResult::new("demo")))),
        );
        drop(bus);

        assert_eq!(reporter.await.unwrap(), 2);
    }

    #[test]
    fn test_disabled_bus_drops_silently() {
        let bus = EventBus::disabled();
        assert!(!bus.is_enabled());
        bus.emit(ExecutionEvent::new(Topic::StepStart, 2));
    }
}
