//! Runner protocol messages
//!
//! Every request uses the same response shape, `ExecutionResult`; only the
//! request payload differs between levels.

#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{HookFailure, Parameter};

/// Spec identity carried by spec-level requests
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecInfo {
    pub file_name: String,
    pub heading: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_index: Option<usize>,
}

/// Scenario identity carried by scenario-level requests
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioInfo {
    pub file_name: String,
    pub heading: String,
    pub line_no: usize,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_row: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_row: Option<usize>,
}

/// Step identity and resolved parameters
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StepInfo {
    pub file_name: String,
    pub parsed_text: String,
    pub actual_text: String,
    pub line_no: usize,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

/// Request payload
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageKind {
    SuiteDataStoreInit,
    ExecutionStarting,
    ExecutionEnding,
    SpecDataStoreInit(SpecInfo),
    SpecExecutionStarting(SpecInfo),
    SpecExecutionEnding(SpecInfo),
    ScenarioDataStoreInit(ScenarioInfo),
    ScenarioExecutionStarting(ScenarioInfo),
    ScenarioExecutionEnding(ScenarioInfo),
    StepExecutionStarting(StepInfo),
    StepExecutionEnding(StepInfo),
    ExecuteStep(StepInfo),
    KillProcess,
}

impl MessageKind {
    pub fn name(&self) -> &'static str {
        match self {
            MessageKind::SuiteDataStoreInit => "suite_data_store_init",
            MessageKind::ExecutionStarting => "execution_starting",
            MessageKind::ExecutionEnding => "execution_ending",
            MessageKind::SpecDataStoreInit(_) => "spec_data_store_init",
            MessageKind::SpecExecutionStarting(_) => "spec_execution_starting",
            MessageKind::SpecExecutionEnding(_) => "spec_execution_ending",
            MessageKind::ScenarioDataStoreInit(_) => "scenario_data_store_init",
            MessageKind::ScenarioExecutionStarting(_) => "scenario_execution_starting",
            MessageKind::ScenarioExecutionEnding(_) => "scenario_execution_ending",
            MessageKind::StepExecutionStarting(_) => "step_execution_starting",
            MessageKind::StepExecutionEnding(_) => "step_execution_ending",
            MessageKind::ExecuteStep(_) => "execute_step",
            MessageKind::KillProcess => "kill_process",
        }
    }

    /// Before/after hook requests
    pub fn is_hook(&self) -> bool {
        matches!(
            self,
            MessageKind::ExecutionStarting
                | MessageKind::ExecutionEnding
                | MessageKind::SpecExecutionStarting(_)
                | MessageKind::SpecExecutionEnding(_)
                | MessageKind::ScenarioExecutionStarting(_)
                | MessageKind::ScenarioExecutionEnding(_)
                | MessageKind::StepExecutionStarting(_)
                | MessageKind::StepExecutionEnding(_)
        )
    }
}

/// Request sent to a runner, tagged with the stream that issued it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub stream: usize,
    #[serde(flatten)]
    pub kind: MessageKind,
}

impl Message {
    pub fn new(stream: usize, kind: MessageKind) -> Self {
        Self { stream, kind }
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[stream {}] {}", self.stream, self.kind.name())
    }
}

/// Response to every protocol request
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionResult {
    pub failed: bool,
    pub execution_time: u64,
    pub error_message: String,
    pub stack_trace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    pub recoverable: bool,
    pub messages: Vec<String>,
}

impl ExecutionResult {
    pub fn passed(execution_time: u64) -> Self {
        Self {
            execution_time,
            ..Default::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            failed: true,
            error_message: message.into(),
            ..Default::default()
        }
    }

    pub fn recoverable(mut self) -> Self {
        self.recoverable = true;
        self
    }

    pub fn with_stack_trace(mut self, trace: impl Into<String>) -> Self {
        self.stack_trace = trace.into();
        self
    }

    pub fn with_time(mut self, execution_time: u64) -> Self {
        self.execution_time = execution_time;
        self
    }

    /// Hook failure payload for this result
    pub fn hook_failure(&self, row: Option<usize>) -> HookFailure {
        HookFailure {
            error_message: self.error_message.clone(),
            stack_trace: self.stack_trace.clone(),
            screenshot: self.screenshot.clone(),
            table_row_index: row,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_wire_shape() {
        let message = Message::new(
            2,
            MessageKind::SpecExecutionStarting(SpecInfo {
                file_name: "a.spec".to_string(),
                heading: "A".to_string(),
                tags: Vec::new(),
                row_index: Some(1),
            }),
        );
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "spec_execution_starting");
        assert_eq!(json["stream"], 2);
        assert_eq!(json["row_index"], 1);

        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn test_unit_message_shape() {
        let json = serde_json::to_string(&Message::new(1, MessageKind::ExecutionStarting)).unwrap();
        assert!(json.contains("\"type\":\"execution_starting\""));
    }

    #[test]
    fn test_result_defaults_from_partial_json() {
        let result: ExecutionResult =
            serde_json::from_str(r#"{"failed": true, "error_message": "boom"}"#).unwrap();
        assert!(result.failed);
        assert!(!result.recoverable);
        assert_eq!(result.execution_time, 0);
    }

    #[test]
    fn test_hook_kinds() {
        assert!(MessageKind::ExecutionEnding.is_hook());
        assert!(!MessageKind::SuiteDataStoreInit.is_hook());
        assert!(!MessageKind::ExecuteStep(StepInfo::default()).is_hook());
    }
}
