//! Spec and suite level results

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::result::{impl_exec_result, ExecResult, ExecutionStatus, HookFailure, ScenarioResult};

/// Result of one specification, or of one data-table row of it
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecResult {
    pub file_name: String,
    pub heading: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub status: ExecutionStatus,
    pub failed: bool,
    pub skipped: bool,
    pub is_table_driven: bool,
    /// Headers of the spec data table
    #[serde(default)]
    pub table_headers: Vec<String>,
    /// Spec data-table rows this result covers, keyed by row index
    #[serde(default)]
    pub table_rows: BTreeMap<usize, Vec<String>>,
    #[serde(default)]
    pub scenarios: Vec<ScenarioResult>,
    #[serde(default)]
    pub pre_hook_failures: Vec<HookFailure>,
    #[serde(default)]
    pub post_hook_failures: Vec<HookFailure>,
    #[serde(default)]
    pub skip_reasons: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    pub scenario_count: usize,
    pub scenario_failed_count: usize,
    pub scenario_skipped_count: usize,
    #[serde(default)]
    pub failed_data_table_rows: Vec<usize>,
    pub execution_time: u64,
}

impl SpecResult {
    pub fn new(file_name: impl Into<String>, heading: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            heading: heading.into(),
            ..Default::default()
        }
    }

    pub fn start(&mut self) -> bool {
        self.status.advance(ExecutionStatus::Executing)
    }

    /// Skip the spec with the given reasons
    pub fn skip<I, S>(&mut self, reasons: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skipped = true;
        self.skip_reasons.extend(reasons.into_iter().map(Into::into));
        self.status.advance(ExecutionStatus::Skipped);
    }

    pub fn add_scenario(&mut self, scenario: ScenarioResult) {
        self.scenarios.push(scenario);
    }

    pub fn add_table_row(&mut self, index: usize, values: Vec<String>) {
        self.table_rows.entry(index).or_insert(values);
    }

    /// Recount scenarios and derive spec status from the scenario list
    ///
    /// Scenarios excluded by the row filter stay in the list but are not
    /// counted at all.
    pub fn recompute_statistics(&mut self) {
        let mut count = 0;
        let mut failed = 0;
        let mut skipped = 0;
        let mut failed_rows = Vec::new();

        for scenario in &self.scenarios {
            if scenario.is_row_filtered() {
                continue;
            }
            count += 1;
            match scenario.status {
                ExecutionStatus::Failed => {
                    failed += 1;
                    if let Some(row) = scenario.spec_row {
                        if !failed_rows.contains(&row) {
                            failed_rows.push(row);
                        }
                    }
                }
                ExecutionStatus::Skipped => skipped += 1,
                _ => {}
            }
        }

        failed_rows.sort_unstable();
        self.scenario_count = count;
        self.scenario_failed_count = failed;
        self.scenario_skipped_count = skipped;
        self.failed_data_table_rows = failed_rows;
        if failed > 0 {
            self.failed = true;
        }
    }

    /// Close the spec after its scenarios ran
    ///
    /// A spec whose scenarios were all skipped is reported as skipped. If it
    /// never started, its status moves to `Skipped` as well.
    pub fn finish(&mut self) {
        self.recompute_statistics();
        if !self.failed
            && !self.scenarios.is_empty()
            && self.scenarios.iter().all(ScenarioResult::is_skipped)
        {
            self.skipped = true;
        }
        if self.skipped && !self.failed && self.status == ExecutionStatus::Pending {
            self.status.advance(ExecutionStatus::Skipped);
            return;
        }
        self.status.advance(ExecutionStatus::Executing);
        self.status.advance(if self.failed {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Passed
        });
    }

    pub fn passed_scenarios(&self) -> usize {
        self.scenario_count - self.scenario_failed_count - self.scenario_skipped_count
    }
}

impl_exec_result!(SpecResult);

impl fmt::Display for SpecResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.failed {
            ExecutionStatus::Failed
        } else if self.skipped {
            ExecutionStatus::Skipped
        } else {
            ExecutionStatus::Passed
        };
        write!(
            f,
            "{} {} ({}) scenarios {}/{} passed [{}ms]",
            status.symbol(),
            self.heading,
            self.file_name,
            self.passed_scenarios(),
            self.scenario_count,
            self.execution_time
        )?;
        if let Some(reason) = self.skip_reasons.first() {
            write!(f, " - {reason}")?;
        }
        Ok(())
    }
}

/// Aggregated result of a whole run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SuiteResult {
    pub project_name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub failed: bool,
    #[serde(default)]
    pub spec_results: Vec<SpecResult>,
    #[serde(default)]
    pub pre_hook_failures: Vec<HookFailure>,
    #[serde(default)]
    pub post_hook_failures: Vec<HookFailure>,
    pub specs_failed_count: usize,
    pub specs_skipped_count: usize,
    pub scenarios_count: usize,
    pub scenarios_failed_count: usize,
    pub scenarios_skipped_count: usize,
    #[serde(default)]
    pub unhandled_errors: Vec<String>,
    pub execution_time: u64,
}

impl SuiteResult {
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            timestamp: Utc::now(),
            tags: Vec::new(),
            failed: false,
            spec_results: Vec::new(),
            pre_hook_failures: Vec::new(),
            post_hook_failures: Vec::new(),
            specs_failed_count: 0,
            specs_skipped_count: 0,
            scenarios_count: 0,
            scenarios_failed_count: 0,
            scenarios_skipped_count: 0,
            unhandled_errors: Vec::new(),
            execution_time: 0,
        }
    }

    pub fn add_unhandled_error(&mut self, error: impl Into<String>) {
        self.unhandled_errors.push(error.into());
        self.failed = true;
    }

    /// Recount spec and scenario totals from the spec list
    pub fn recompute_statistics(&mut self) {
        self.specs_failed_count = self.spec_results.iter().filter(|s| s.failed).count();
        self.specs_skipped_count = self
            .spec_results
            .iter()
            .filter(|s| s.skipped && !s.failed)
            .count();
        self.scenarios_count = self.spec_results.iter().map(|s| s.scenario_count).sum();
        self.scenarios_failed_count = self
            .spec_results
            .iter()
            .map(|s| s.scenario_failed_count)
            .sum();
        self.scenarios_skipped_count = self
            .spec_results
            .iter()
            .map(|s| s.scenario_skipped_count)
            .sum();
        if self.specs_failed_count > 0
            || !self.pre_hook_failures.is_empty()
            || !self.post_hook_failures.is_empty()
            || !self.unhandled_errors.is_empty()
        {
            self.failed = true;
        }
    }

    pub fn specs_count(&self) -> usize {
        self.spec_results.len()
    }

    /// Specs that actually ran
    pub fn specs_executed_count(&self) -> usize {
        self.specs_count() - self.specs_skipped_count
    }

    pub fn specs_passed_count(&self) -> usize {
        self.specs_executed_count() - self.specs_failed_count
    }

    pub fn spec(&self, file_name: &str) -> Option<&SpecResult> {
        self.spec_results.iter().find(|s| s.file_name == file_name)
    }

    pub fn success_rate(&self) -> f64 {
        let executed = self.specs_executed_count();
        if executed == 0 {
            0.0
        } else {
            (self.specs_passed_count() as f64 / executed as f64) * 100.0
        }
    }
}

impl_exec_result!(SuiteResult);

impl fmt::Display for SuiteResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Suite - {}", self.project_name)?;
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        for spec in &self.spec_results {
            writeln!(f, "  {spec}")?;
            for scenario in &spec.scenarios {
                writeln!(f, "      {scenario}")?;
            }
        }
        for error in &self.unhandled_errors {
            writeln!(f, "  ! {error}")?;
        }
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(
            f,
            "Specifications: {} executed | {} passed | {} failed | {} skipped",
            self.specs_executed_count(),
            self.specs_passed_count(),
            self.specs_failed_count,
            self.specs_skipped_count
        )?;
        writeln!(
            f,
            "Scenarios:      {} executed | {} passed | {} failed | {} skipped",
            self.scenarios_count - self.scenarios_skipped_count,
            self.scenarios_count - self.scenarios_failed_count - self.scenarios_skipped_count,
            self.scenarios_failed_count,
            self.scenarios_skipped_count
        )?;
        writeln!(
            f,
            "Success Rate: {:.1}% | Duration: {}ms",
            self.success_rate(),
            self.execution_time
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ROW_FILTER_FLAG;

    fn scenario(status: ExecutionStatus, spec_row: Option<usize>) -> ScenarioResult {
        let mut result = ScenarioResult::new("S", 3).with_rows(spec_row, None);
        match status {
            ExecutionStatus::Skipped => result.skip(["Scenario has errors"]),
            ExecutionStatus::Failed => {
                result.start();
                result.set_failure();
                result.finish();
            }
            _ => {
                result.start();
                result.finish();
            }
        }
        result
    }

    #[test]
    fn test_row_filtered_scenarios_are_not_counted() {
        let mut spec = SpecResult::new("a.spec", "A");
        spec.add_scenario(scenario(ExecutionStatus::Passed, Some(1)));
        let mut filtered = ScenarioResult::new("S", 3).with_rows(Some(0), None);
        filtered.skip([format!("Doesn't satisfy {ROW_FILTER_FLAG} flag condition")]);
        spec.add_scenario(filtered);
        spec.add_scenario(scenario(ExecutionStatus::Skipped, Some(2)));

        spec.recompute_statistics();
        assert_eq!(spec.scenario_count, 2);
        assert_eq!(spec.scenario_skipped_count, 1);
        assert_eq!(spec.scenarios.len(), 3);
    }

    #[test]
    fn test_failed_rows_tracked() {
        let mut spec = SpecResult::new("a.spec", "A");
        spec.add_scenario(scenario(ExecutionStatus::Failed, Some(2)));
        spec.add_scenario(scenario(ExecutionStatus::Failed, Some(0)));
        spec.add_scenario(scenario(ExecutionStatus::Failed, Some(2)));
        spec.finish();

        assert!(spec.failed);
        assert_eq!(spec.failed_data_table_rows, vec![0, 2]);
        assert_eq!(spec.status, ExecutionStatus::Failed);
    }

    #[test]
    fn test_spec_skipped_when_all_scenarios_skipped() {
        let mut spec = SpecResult::new("a.spec", "A");
        spec.add_scenario(scenario(ExecutionStatus::Skipped, None));
        spec.finish();

        assert!(spec.skipped);
        assert_eq!(spec.status, ExecutionStatus::Skipped);

        let mut started = SpecResult::new("b.spec", "B");
        started.start();
        started.add_scenario(scenario(ExecutionStatus::Skipped, None));
        started.finish();

        assert!(started.skipped);
        assert_eq!(started.status, ExecutionStatus::Passed);
    }

    #[test]
    fn test_suite_statistics() {
        let mut passed = SpecResult::new("a.spec", "A");
        passed.add_scenario(scenario(ExecutionStatus::Passed, None));
        passed.finish();

        let mut empty = SpecResult::new("b.spec", "B");
        empty.skip(["No scenarios found"]);
        empty.finish();

        let mut suite = SuiteResult::new("demo");
        suite.spec_results = vec![passed, empty];
        suite.recompute_statistics();

        assert_eq!(suite.specs_executed_count(), 1);
        assert_eq!(suite.specs_failed_count, 0);
        assert_eq!(suite.specs_skipped_count, 1);
        assert!(!suite.failed);
    }
}
