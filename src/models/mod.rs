//! Data models for specification execution
//!
//! Parsed specification trees, pre-execution errors and the result tree
//! produced by a run.

mod build_errors;
mod result;
mod spec;
mod spec_result;

pub use build_errors::{BuildError, BuildErrorKind, BuildErrors, ErrorScope};
pub use result::{
    ConceptResult, ExecResult, ExecutionStatus, HookFailure, ItemResult, Parameter,
    ScenarioResult, StepResult, ROW_FILTER_FLAG,
};
pub use spec::{ArgKind, Scenario, Specification, Step, StepArg, Table, TableCell};
pub use spec_result::{SpecResult, SuiteResult};
