//! Pre-execution errors
//!
//! Parse and validation failures found before any runner is contacted.
//! A recorded entry makes the matching spec, scenario or step skip instead
//! of execute.

#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Where a build error was detected
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildErrorKind {
    Parse,
    Validation,
}

/// Unit a build error is attached to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorScope {
    Spec,
    Scenario,
    Step,
}

/// Single pre-execution error
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildError {
    pub kind: BuildErrorKind,
    pub scope: ErrorScope,
    pub file_name: String,
    #[serde(default)]
    pub line_no: usize,
    pub message: String,
}

impl BuildError {
    pub fn parse(file_name: impl Into<String>, line_no: usize, message: impl Into<String>) -> Self {
        Self {
            kind: BuildErrorKind::Parse,
            scope: ErrorScope::Spec,
            file_name: file_name.into(),
            line_no,
            message: message.into(),
        }
    }

    pub fn validation(
        scope: ErrorScope,
        file_name: impl Into<String>,
        line_no: usize,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind: BuildErrorKind::Validation,
            scope,
            file_name: file_name.into(),
            line_no,
            message: message.into(),
        }
    }
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} {}", self.file_name, self.line_no, self.message)
    }
}

type LineKey = (String, usize);

/// Build errors keyed by spec file, scenario and step location
#[derive(Clone, Debug, Default)]
pub struct BuildErrors {
    spec_errors: HashMap<String, Vec<BuildError>>,
    scenario_errors: HashMap<LineKey, Vec<BuildError>>,
    step_errors: HashMap<LineKey, BuildError>,
}

impl BuildErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error under its scope
    pub fn add(&mut self, error: BuildError) {
        match error.scope {
            ErrorScope::Spec => self
                .spec_errors
                .entry(error.file_name.clone())
                .or_default()
                .push(error),
            ErrorScope::Scenario => self
                .scenario_errors
                .entry((error.file_name.clone(), error.line_no))
                .or_default()
                .push(error),
            ErrorScope::Step => {
                self.step_errors
                    .entry((error.file_name.clone(), error.line_no))
                    .or_insert(error);
            }
        }
    }

    pub fn spec_errors(&self, file_name: &str) -> &[BuildError] {
        self.spec_errors
            .get(file_name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn scenario_errors(&self, file_name: &str, line_no: usize) -> &[BuildError] {
        self.scenario_errors
            .get(&(file_name.to_string(), line_no))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn step_error(&self, file_name: &str, line_no: usize) -> Option<&BuildError> {
        self.step_errors.get(&(file_name.to_string(), line_no))
    }

    pub fn has_spec_errors(&self, file_name: &str) -> bool {
        !self.spec_errors(file_name).is_empty()
    }

    /// Whether the spec failed to parse, as opposed to validation failures
    pub fn has_parse_errors(&self, file_name: &str) -> bool {
        self.spec_errors(file_name)
            .iter()
            .any(|e| e.kind == BuildErrorKind::Parse)
    }

    pub fn is_empty(&self) -> bool {
        self.spec_errors.is_empty() && self.scenario_errors.is_empty() && self.step_errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.spec_errors.values().map(Vec::len).sum::<usize>()
            + self.scenario_errors.values().map(Vec::len).sum::<usize>()
            + self.step_errors.len()
    }
}

impl FromIterator<BuildError> for BuildErrors {
    fn from_iter<I: IntoIterator<Item = BuildError>>(iter: I) -> Self {
        let mut errors = BuildErrors::new();
        for error in iter {
            errors.add(error);
        }
        errors
    }
}
