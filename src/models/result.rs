//! Execution result models
//!
//! Step, concept and scenario results plus the status state machine shared
//! by every level of the result tree.

#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use std::fmt;

use super::spec::{ArgKind, Table};

/// Execution state of a spec, scenario, concept or step
///
/// Legal moves are `Pending -> Executing | Skipped` and
/// `Executing -> Passed | Failed`. Terminal states never change again.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    #[default]
    Pending,
    Executing,
    Passed,
    Failed,
    Skipped,
}

impl ExecutionStatus {
    pub fn can_transition_to(self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Pending, Executing) | (Pending, Skipped) | (Executing, Passed) | (Executing, Failed)
        )
    }

    /// Move to `next` if the transition is legal; returns whether it moved
    pub fn advance(&mut self, next: ExecutionStatus) -> bool {
        if self.can_transition_to(next) {
            *self = next;
            true
        } else {
            false
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Passed | ExecutionStatus::Failed | ExecutionStatus::Skipped
        )
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "·",
            ExecutionStatus::Executing => "…",
            ExecutionStatus::Passed => "✓",
            ExecutionStatus::Failed => "✗",
            ExecutionStatus::Skipped => "○",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Pending => write!(f, "PENDING"),
            ExecutionStatus::Executing => write!(f, "EXECUTING"),
            ExecutionStatus::Passed => write!(f, "PASS"),
            ExecutionStatus::Failed => write!(f, "FAIL"),
            ExecutionStatus::Skipped => write!(f, "SKIP"),
        }
    }
}

/// Failure reported by a before/after hook
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookFailure {
    pub error_message: String,
    #[serde(default)]
    pub stack_trace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    /// Spec data-table row the hook ran for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_row_index: Option<usize>,
}

impl HookFailure {
    pub fn new(error_message: impl Into<String>) -> Self {
        Self {
            error_message: error_message.into(),
            ..Default::default()
        }
    }

    pub fn with_row_index(mut self, row: Option<usize>) -> Self {
        self.table_row_index = row;
        self
    }
}

/// Capability shared by step, scenario, spec and suite results
pub trait ExecResult {
    fn pre_hook_failures(&self) -> &[HookFailure];
    fn post_hook_failures(&self) -> &[HookFailure];
    fn add_pre_hook_failure(&mut self, failure: HookFailure);
    fn add_post_hook_failure(&mut self, failure: HookFailure);
    fn set_failure(&mut self);
    fn failed(&self) -> bool;
    fn execution_time(&self) -> u64;
    fn add_execution_time(&mut self, millis: u64);
}

macro_rules! impl_exec_result {
    ($ty:ty) => {
        impl ExecResult for $ty {
            fn pre_hook_failures(&self) -> &[HookFailure] {
                &self.pre_hook_failures
            }

            fn post_hook_failures(&self) -> &[HookFailure] {
                &self.post_hook_failures
            }

            fn add_pre_hook_failure(&mut self, failure: HookFailure) {
                self.pre_hook_failures.push(failure);
            }

            fn add_post_hook_failure(&mut self, failure: HookFailure) {
                self.post_hook_failures.push(failure);
            }

            fn set_failure(&mut self) {
                self.failed = true;
            }

            fn failed(&self) -> bool {
                self.failed
            }

            fn execution_time(&self) -> u64 {
                self.execution_time
            }

            fn add_execution_time(&mut self, millis: u64) {
                self.execution_time += millis;
            }
        }
    };
}

pub(crate) use impl_exec_result;

/// Resolved step parameter as sent to a runner
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    #[serde(default)]
    pub name: String,
    pub kind: ArgKind,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<Table>,
}

impl Parameter {
    pub fn text(name: impl Into<String>, kind: ArgKind, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            value: value.into(),
            table: None,
        }
    }

    pub fn table(name: impl Into<String>, kind: ArgKind, table: Table) -> Self {
        Self {
            name: name.into(),
            kind,
            value: String::new(),
            table: Some(table),
        }
    }
}

/// Result of one leaf step
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Step text with parameters substituted
    pub text: String,
    /// Step value with `{}` placeholders
    pub parsed_text: String,
    pub line_no: usize,
    pub parameters: Vec<Parameter>,
    pub status: ExecutionStatus,
    pub failed: bool,
    pub recoverable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    pub execution_time: u64,
    #[serde(default)]
    pub pre_hook_failures: Vec<HookFailure>,
    #[serde(default)]
    pub post_hook_failures: Vec<HookFailure>,
    #[serde(default)]
    pub messages: Vec<String>,
}

impl StepResult {
    pub fn new(
        parsed_text: impl Into<String>,
        text: impl Into<String>,
        line_no: usize,
        parameters: Vec<Parameter>,
    ) -> Self {
        Self {
            text: text.into(),
            parsed_text: parsed_text.into(),
            line_no,
            parameters,
            ..Default::default()
        }
    }

    /// Mark the step skipped without contacting a runner
    pub fn skip(&mut self, reason: impl Into<String>) {
        if self.status.advance(ExecutionStatus::Skipped) {
            self.skip_reason = Some(reason.into());
        }
    }

    pub fn start(&mut self) -> bool {
        self.status.advance(ExecutionStatus::Executing)
    }

    pub fn finish(&mut self) {
        let next = if self.failed {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Passed
        };
        self.status.advance(next);
    }

    pub fn is_skipped(&self) -> bool {
        self.status == ExecutionStatus::Skipped
    }
}

impl_exec_result!(StepResult);

/// Result of a concept invocation
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConceptResult {
    pub text: String,
    pub parsed_text: String,
    pub line_no: usize,
    pub parameters: Vec<Parameter>,
    pub status: ExecutionStatus,
    pub failed: bool,
    pub recoverable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    pub execution_time: u64,
    pub items: Vec<ItemResult>,
}

impl ConceptResult {
    pub fn new(
        parsed_text: impl Into<String>,
        text: impl Into<String>,
        line_no: usize,
        parameters: Vec<Parameter>,
    ) -> Self {
        Self {
            text: text.into(),
            parsed_text: parsed_text.into(),
            line_no,
            parameters,
            recoverable: true,
            ..Default::default()
        }
    }

    /// Recompute status, failure and time from the children in document order
    ///
    /// Time is accumulated up to and including the first non-recoverable
    /// failure. The reported failure is that one, or the first recoverable
    /// failure when every failure was recoverable.
    pub fn update_exec_result(&mut self) {
        if self.status == ExecutionStatus::Pending
            && !self.items.is_empty()
            && self.items.iter().all(ItemResult::is_skipped)
        {
            self.status.advance(ExecutionStatus::Skipped);
            return;
        }

        let mut elapsed = 0;
        let mut first_failure: Option<&ItemResult> = None;
        let mut fatal = false;

        for item in &self.items {
            elapsed += item.execution_time();
            if !item.failed() {
                continue;
            }
            if !item.recoverable() {
                first_failure = Some(item);
                fatal = true;
                break;
            }
            first_failure.get_or_insert(item);
        }

        self.execution_time = elapsed;
        self.failed = first_failure.is_some();
        self.recoverable = !fatal;
        if let Some(item) = first_failure {
            let (message, trace) = item.failure_details();
            self.error_message = message;
            self.stack_trace = trace;
        }

        self.status.advance(ExecutionStatus::Executing);
        self.status.advance(if self.failed {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Passed
        });
    }

    /// Leaf steps under this concept, nested concepts included
    pub fn step_count(&self) -> usize {
        self.items.iter().map(ItemResult::step_count).sum()
    }
}

/// Entry in a scenario: a leaf step or an expanded concept
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemResult {
    Step(StepResult),
    Concept(ConceptResult),
}

impl ItemResult {
    pub fn status(&self) -> ExecutionStatus {
        match self {
            ItemResult::Step(s) => s.status,
            ItemResult::Concept(c) => c.status,
        }
    }

    pub fn failed(&self) -> bool {
        match self {
            ItemResult::Step(s) => s.failed,
            ItemResult::Concept(c) => c.failed,
        }
    }

    pub fn recoverable(&self) -> bool {
        match self {
            ItemResult::Step(s) => s.recoverable,
            ItemResult::Concept(c) => c.recoverable,
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.status() == ExecutionStatus::Skipped
    }

    pub fn execution_time(&self) -> u64 {
        match self {
            ItemResult::Step(s) => s.execution_time,
            ItemResult::Concept(c) => c.execution_time,
        }
    }

    pub fn line_no(&self) -> usize {
        match self {
            ItemResult::Step(s) => s.line_no,
            ItemResult::Concept(c) => c.line_no,
        }
    }

    pub fn step_count(&self) -> usize {
        match self {
            ItemResult::Step(_) => 1,
            ItemResult::Concept(c) => c.step_count(),
        }
    }

    fn failure_details(&self) -> (Option<String>, Option<String>) {
        match self {
            ItemResult::Step(s) => (s.error_message.clone(), s.stack_trace.clone()),
            ItemResult::Concept(c) => (c.error_message.clone(), c.stack_trace.clone()),
        }
    }

    /// Mark this item and every nested leaf skipped
    pub fn skip(&mut self, reason: &str) {
        match self {
            ItemResult::Step(s) => s.skip(reason),
            ItemResult::Concept(c) => {
                for item in &mut c.items {
                    item.skip(reason);
                }
                c.status.advance(ExecutionStatus::Skipped);
            }
        }
    }
}

/// Result of one scenario instance
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub heading: String,
    pub line_no: usize,
    #[serde(default)]
    pub tags: Vec<String>,
    pub status: ExecutionStatus,
    pub failed: bool,
    #[serde(default)]
    pub contexts: Vec<ItemResult>,
    #[serde(default)]
    pub items: Vec<ItemResult>,
    #[serde(default)]
    pub teardowns: Vec<ItemResult>,
    #[serde(default)]
    pub pre_hook_failures: Vec<HookFailure>,
    #[serde(default)]
    pub post_hook_failures: Vec<HookFailure>,
    #[serde(default)]
    pub skip_errors: Vec<String>,
    pub execution_time: u64,
    /// Spec data-table row this instance ran for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_row: Option<usize>,
    /// Scenario data-table row this instance ran for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_row: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_table_row: Option<Vec<String>>,
    #[serde(default)]
    pub retries_count: u32,
}

/// Marker carried by skip reasons caused by the row filter
pub const ROW_FILTER_FLAG: &str = "--table-rows";

impl ScenarioResult {
    pub fn new(heading: impl Into<String>, line_no: usize) -> Self {
        Self {
            heading: heading.into(),
            line_no,
            ..Default::default()
        }
    }

    pub fn with_rows(mut self, spec_row: Option<usize>, scenario_row: Option<usize>) -> Self {
        self.spec_row = spec_row;
        self.scenario_row = scenario_row;
        self
    }

    pub fn start(&mut self) -> bool {
        self.status.advance(ExecutionStatus::Executing)
    }

    /// Skip the scenario and every item already attached to it
    pub fn skip<I, S>(&mut self, reasons: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if !self.status.advance(ExecutionStatus::Skipped) {
            return;
        }
        self.skip_errors.extend(reasons.into_iter().map(Into::into));
        let reason = self.skip_errors.first().cloned().unwrap_or_default();
        for item in self
            .contexts
            .iter_mut()
            .chain(self.items.iter_mut())
            .chain(self.teardowns.iter_mut())
        {
            item.skip(&reason);
        }
    }

    /// Close the scenario, folding item times into its own
    pub fn finish(&mut self) {
        self.execution_time += self
            .contexts
            .iter()
            .chain(self.items.iter())
            .chain(self.teardowns.iter())
            .map(ItemResult::execution_time)
            .sum::<u64>();
        self.status.advance(if self.failed {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Passed
        });
    }

    pub fn is_skipped(&self) -> bool {
        self.status == ExecutionStatus::Skipped
    }

    pub fn is_table_driven(&self) -> bool {
        self.spec_row.is_some() || self.scenario_row.is_some()
    }

    /// Skipped because its row was excluded by the row filter
    pub fn is_row_filtered(&self) -> bool {
        self.is_skipped() && self.skip_errors.iter().any(|e| e.contains(ROW_FILTER_FLAG))
    }

    pub fn step_count(&self) -> usize {
        self.items.iter().map(ItemResult::step_count).sum()
    }
}

impl_exec_result!(ScenarioResult);

impl fmt::Display for ScenarioResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}ms]",
            self.status.symbol(),
            self.heading,
            self.execution_time
        )?;
        if let Some(row) = self.scenario_row.or(self.spec_row) {
            write!(f, " (row {})", row + 1)?;
        }
        if let Some(reason) = self.skip_errors.first() {
            write!(f, " - {reason}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(line_no: usize, failed: bool, recoverable: bool, millis: u64) -> ItemResult {
        let mut result = StepResult::new("step", "step", line_no, Vec::new());
        result.start();
        result.failed = failed;
        result.recoverable = recoverable;
        result.execution_time = millis;
        if failed {
            result.error_message = Some(format!("failed at {line_no}"));
        }
        result.finish();
        ItemResult::Step(result)
    }

    #[test]
    fn test_status_transitions() {
        let mut status = ExecutionStatus::Pending;
        assert!(!status.advance(ExecutionStatus::Passed));
        assert!(status.advance(ExecutionStatus::Executing));
        assert!(status.advance(ExecutionStatus::Failed));
        assert!(!status.advance(ExecutionStatus::Executing));
        assert_eq!(status, ExecutionStatus::Failed);
        assert!(status.is_terminal());
    }

    #[test]
    fn test_skipped_is_terminal() {
        let mut status = ExecutionStatus::Pending;
        assert!(status.advance(ExecutionStatus::Skipped));
        assert!(!status.advance(ExecutionStatus::Executing));
    }

    #[test]
    fn test_concept_stops_time_at_fatal_failure() {
        let mut concept = ConceptResult::new("c", "c", 1, Vec::new());
        concept.items = vec![
            step(2, false, false, 10),
            step(3, true, false, 20),
        ];
        concept.update_exec_result();

        assert!(concept.failed);
        assert!(!concept.recoverable);
        assert_eq!(concept.execution_time, 30);
        assert_eq!(concept.error_message.as_deref(), Some("failed at 3"));
        assert_eq!(concept.status, ExecutionStatus::Failed);
    }

    #[test]
    fn test_concept_recoverable_failures_keep_first() {
        let mut concept = ConceptResult::new("c", "c", 1, Vec::new());
        concept.items = vec![
            step(2, true, true, 5),
            step(3, false, false, 5),
            step(4, true, true, 5),
        ];
        concept.update_exec_result();

        assert!(concept.failed);
        assert!(concept.recoverable);
        assert_eq!(concept.execution_time, 15);
        assert_eq!(concept.error_message.as_deref(), Some("failed at 2"));
    }

    #[test]
    fn test_concept_reports_first_fatal_after_recoverable() {
        let mut concept = ConceptResult::new("c", "c", 1, Vec::new());
        concept.items = vec![step(2, true, true, 1), step(3, true, false, 1)];
        concept.update_exec_result();

        assert!(!concept.recoverable);
        assert_eq!(concept.error_message.as_deref(), Some("failed at 3"));
    }

    #[test]
    fn test_scenario_skip_cascades_to_items() {
        let mut scenario = ScenarioResult::new("Login", 4);
        scenario
            .items
            .push(ItemResult::Step(StepResult::new("a", "a", 5, Vec::new())));
        scenario.skip(["Doesn't satisfy --table-rows flag condition"]);

        assert!(scenario.is_skipped());
        assert!(scenario.is_row_filtered());
        assert!(scenario.items[0].is_skipped());
    }

    #[test]
    fn test_scenario_finish_accumulates_time() {
        let mut scenario = ScenarioResult::new("Checkout", 10);
        scenario.start();
        scenario.items.push(step(11, false, false, 40));
        scenario.add_execution_time(5);
        scenario.finish();

        assert_eq!(scenario.execution_time, 45);
        assert_eq!(scenario.status, ExecutionStatus::Passed);
    }
}
