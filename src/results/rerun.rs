//! Failed-only reruns
//!
//! Narrows freshly loaded specs to what failed in a previous run. A spec
//! that failed without any failed scenario (a spec or suite level hook,
//! say) is kept whole. A failed suite whose specs were all skipped, as
//! after a before-suite failure, reruns everything.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::info;

use crate::models::{Specification, SuiteResult};

/// Failed units of a previous run, keyed by spec file
#[derive(Clone, Debug, Default)]
pub struct FailedSelection {
    /// Failed scenario lines per file; an empty set means the whole spec
    specs: HashMap<String, BTreeSet<usize>>,
    /// Nothing ran in the previous run, so every spec is selected
    everything: bool,
}

impl FailedSelection {
    pub fn from_result(result: &SuiteResult) -> Self {
        if result.failed && result.spec_results.iter().all(|s| s.skipped && !s.failed) {
            info!("Previous run failed before any spec ran; selecting every spec");
            return Self {
                specs: HashMap::new(),
                everything: true,
            };
        }

        let mut specs = HashMap::new();
        for spec in result.spec_results.iter().filter(|s| s.failed) {
            let lines: BTreeSet<usize> = spec
                .scenarios
                .iter()
                .filter(|s| s.failed)
                .map(|s| s.line_no)
                .collect();
            specs.insert(spec.file_name.clone(), lines);
        }
        Self {
            specs,
            everything: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.everything && self.specs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Keep only failed specs, and within them only failed scenarios
    pub fn restrict(&self, specs: Vec<Arc<Specification>>) -> Vec<Arc<Specification>> {
        if self.everything {
            return specs;
        }
        let selected: Vec<_> = specs
            .into_iter()
            .filter_map(|spec| {
                let lines = self.specs.get(&spec.file_name)?;
                if lines.is_empty() {
                    return Some(spec);
                }
                let mut narrowed = (*spec).clone();
                narrowed.scenarios.retain(|s| lines.contains(&s.line_no));
                Some(Arc::new(narrowed))
            })
            .collect();

        info!("Rerunning {} previously failed spec(s)", selected.len());
        selected
    }
}

/// Restrict `specs` to the failures recorded in `previous`
pub fn restrict_to_failed(
    specs: Vec<Arc<Specification>>,
    previous: &SuiteResult,
) -> Vec<Arc<Specification>> {
    FailedSelection::from_result(previous).restrict(specs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HookFailure, Scenario, ScenarioResult, SpecResult, Step};

    fn spec(file: &str) -> Arc<Specification> {
        Arc::new(
            Specification::new(file, file)
                .with_scenario(Scenario::new("One", 2).with_step(Step::new(3, "a")))
                .with_scenario(Scenario::new("Two", 5).with_step(Step::new(6, "b"))),
        )
    }

    fn result(file: &str, failed_lines: &[usize]) -> SpecResult {
        let mut spec = SpecResult::new(file, file);
        spec.start();
        for line in [2, 5] {
            let mut scenario = ScenarioResult::new("S", line);
            scenario.start();
            scenario.failed = failed_lines.contains(&line);
            scenario.finish();
            spec.add_scenario(scenario);
        }
        spec.failed = !failed_lines.is_empty();
        spec.finish();
        spec
    }

    #[test]
    fn test_only_failed_scenarios_are_kept() {
        let mut previous = SuiteResult::new("demo");
        previous.spec_results = vec![result("a.spec", &[5]), result("b.spec", &[])];

        let specs = restrict_to_failed(vec![spec("a.spec"), spec("b.spec")], &previous);

        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].file_name, "a.spec");
        assert_eq!(specs[0].scenarios.len(), 1);
        assert_eq!(specs[0].scenarios[0].line_no, 5);
    }

    #[test]
    fn test_hook_failed_spec_is_kept_whole() {
        let mut failed = result("a.spec", &[]);
        failed.pre_hook_failures.push(HookFailure::new("before spec"));
        failed.failed = true;
        let mut previous = SuiteResult::new("demo");
        previous.spec_results = vec![failed];

        let specs = restrict_to_failed(vec![spec("a.spec")], &previous);
        assert_eq!(specs[0].scenarios.len(), 2);
    }

    #[test]
    fn test_suite_failure_before_any_spec_reruns_everything() {
        let mut skipped = SpecResult::new("a.spec", "a.spec");
        skipped.skip(["Skipped because the before suite hook failed"]);
        skipped.finish();
        let mut previous = SuiteResult::new("demo");
        previous.pre_hook_failures.push(HookFailure::new("before suite"));
        previous.spec_results = vec![skipped];
        previous.recompute_statistics();
        assert!(previous.failed);

        let selection = FailedSelection::from_result(&previous);
        assert!(!selection.is_empty());
        let specs = selection.restrict(vec![spec("a.spec"), spec("b.spec")]);
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].scenarios.len(), 2);
    }

    #[test]
    fn test_nothing_failed_selects_nothing() {
        let selection = FailedSelection::from_result(&SuiteResult::new("demo"));
        assert!(selection.is_empty());
        assert!(selection.restrict(vec![spec("a.spec")]).is_empty());
    }
}
