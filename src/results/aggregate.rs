//! Suite result aggregation
//!
//! Collects one report per stream and builds the suite result once every
//! stream is done. Suite hook failures are recorded by the scheduler on the
//! suite result it hands in; they come from the single runner that owns
//! the suite hooks.

#![allow(dead_code)]

use tracing::{info, warn};

use super::merge::merge_spec_results;
use crate::models::{SpecResult, SuiteResult};

/// What one stream produced
#[derive(Clone, Debug)]
pub struct StreamReport {
    pub stream: usize,
    pub spec_results: Vec<SpecResult>,
    /// Set when the stream could not run its work
    pub error: Option<String>,
}

impl StreamReport {
    pub fn completed(stream: usize, spec_results: Vec<SpecResult>) -> Self {
        Self {
            stream,
            spec_results,
            error: None,
        }
    }

    /// Stream that never ran; `spec_results` hold its work marked skipped
    pub fn failed(stream: usize, spec_results: Vec<SpecResult>, error: impl Into<String>) -> Self {
        Self {
            stream,
            spec_results,
            error: Some(error.into()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Builds the final suite result from stream reports
pub struct Aggregator {
    parallel: bool,
    /// File names in scheduling order
    order: Vec<String>,
}

impl Aggregator {
    pub fn new(parallel: bool) -> Self {
        Self {
            parallel,
            order: Vec::new(),
        }
    }

    /// Order merged specs by their position in `files`
    pub fn with_order(mut self, files: impl IntoIterator<Item = String>) -> Self {
        for file in files {
            if !self.order.contains(&file) {
                self.order.push(file);
            }
        }
        self
    }

    pub fn aggregate(&self, mut suite: SuiteResult, reports: Vec<StreamReport>) -> SuiteResult {
        let mut parts = Vec::new();
        let mut reports = reports;
        reports.sort_by_key(|r| r.stream);

        for report in reports {
            if let Some(error) = &report.error {
                warn!("Stream {} did not run: {}", report.stream, error);
                suite.add_unhandled_error(error.clone());
            }
            parts.extend(report.spec_results);
        }

        let mut merged = merge_spec_results(parts, self.parallel);
        merged.sort_by_key(|spec| {
            self.order
                .iter()
                .position(|f| *f == spec.file_name)
                .unwrap_or(usize::MAX)
        });

        suite.spec_results = merged;
        suite.recompute_statistics();

        info!(
            "Aggregated {} specs: {} failed, {} skipped",
            suite.specs_count(),
            suite.specs_failed_count,
            suite.specs_skipped_count
        );
        suite
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HookFailure, ScenarioResult};

    fn passed(file: &str, row: Option<usize>) -> SpecResult {
        let mut spec = SpecResult::new(file, file);
        spec.start();
        if let Some(row) = row {
            spec.is_table_driven = true;
            spec.add_table_row(row, vec![row.to_string()]);
        }
        let mut scenario = ScenarioResult::new("S", 2).with_rows(row, None);
        scenario.start();
        scenario.finish();
        spec.add_scenario(scenario);
        spec.finish();
        spec
    }

    fn skipped(file: &str, reason: &str) -> SpecResult {
        let mut spec = SpecResult::new(file, file);
        let mut scenario = ScenarioResult::new("S", 2);
        scenario.skip([reason]);
        spec.add_scenario(scenario);
        spec.skip([reason]);
        spec.finish();
        spec
    }

    #[test]
    fn test_failed_stream_does_not_block_others() {
        let reports = vec![
            StreamReport::failed(2, vec![skipped("b.spec", "Failed to start runner")], "runner 2 refused"),
            StreamReport::completed(1, vec![passed("a.spec", None)]),
        ];

        let suite = Aggregator::new(true)
            .with_order(["a.spec".to_string(), "b.spec".to_string()])
            .aggregate(SuiteResult::new("demo"), reports);

        assert!(suite.failed);
        assert_eq!(suite.unhandled_errors, vec!["runner 2 refused"]);
        assert_eq!(suite.specs_count(), 2);
        assert_eq!(suite.specs_skipped_count, 1);
        assert_eq!(suite.spec_results[0].file_name, "a.spec");
        assert!(suite.spec_results[1].skipped);
    }

    #[test]
    fn test_rows_from_streams_merge_into_one_spec() {
        let reports = vec![
            StreamReport::completed(1, vec![passed("t.spec", Some(0)), passed("t.spec", Some(2))]),
            StreamReport::completed(2, vec![passed("t.spec", Some(1))]),
        ];

        let suite = Aggregator::new(true).aggregate(SuiteResult::new("demo"), reports);

        assert_eq!(suite.specs_count(), 1);
        assert_eq!(suite.scenarios_count, 3);
        assert_eq!(suite.spec_results[0].table_rows.len(), 3);
        assert!(!suite.failed);
    }

    #[test]
    fn test_suite_hook_failure_fails_suite() {
        let mut suite = SuiteResult::new("demo");
        suite.pre_hook_failures.push(HookFailure::new("before suite"));

        let suite = Aggregator::new(false).aggregate(suite, vec![StreamReport::completed(1, Vec::new())]);
        assert!(suite.failed);
        assert_eq!(suite.pre_hook_failures.len(), 1);
    }
}
