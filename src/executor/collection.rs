//! Schedulable units
//!
//! Data-table expansion turns parsed specifications into spec instances,
//! one per spec-table row, each holding the scenario instances it runs.
//! Scenario tables expand up front under the eager strategy and through a
//! `LazyScenarioCollection` under the lazy one.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::config::{RunConfig, Strategy, TagFilter};
use crate::models::{Scenario, Specification};

/// Spec rows times scenario rows above which a warning is logged
const NESTED_ITERATION_WARNING: usize = 100;

/// One scenario execution: a scenario plus the table rows it runs for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScenarioInstance {
    /// Index into the owning spec's scenario list
    pub scenario_index: usize,
    pub spec_row: Option<usize>,
    pub scenario_row: Option<usize>,
}

/// Scenario-table rows produced one at a time
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LazyScenarioCollection {
    scenario_index: usize,
    spec_row: Option<usize>,
    total_iterations: usize,
    next: usize,
}

impl LazyScenarioCollection {
    pub fn new(scenario_index: usize, spec_row: Option<usize>, total_iterations: usize) -> Self {
        Self {
            scenario_index,
            spec_row,
            total_iterations,
            next: 0,
        }
    }

    pub fn total_iterations(&self) -> usize {
        self.total_iterations
    }

    pub fn remaining(&self) -> usize {
        self.total_iterations - self.next
    }
}

impl Iterator for LazyScenarioCollection {
    type Item = ScenarioInstance;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.total_iterations {
            return None;
        }
        let row = self.next;
        self.next += 1;
        Some(ScenarioInstance {
            scenario_index: self.scenario_index,
            spec_row: self.spec_row,
            scenario_row: Some(row),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining(), Some(self.remaining()))
    }
}

/// Scheduled scenario work inside a spec instance
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScenarioUnit {
    Instance(ScenarioInstance),
    Lazy(LazyScenarioCollection),
}

impl ScenarioUnit {
    pub fn instance_count(&self) -> usize {
        match self {
            ScenarioUnit::Instance(_) => 1,
            ScenarioUnit::Lazy(lazy) => lazy.remaining(),
        }
    }

    /// Drain the unit into concrete instances
    pub fn into_instances(self) -> Vec<ScenarioInstance> {
        match self {
            ScenarioUnit::Instance(instance) => vec![instance],
            ScenarioUnit::Lazy(lazy) => lazy.collect(),
        }
    }
}

/// Independently schedulable piece of work: a spec, or one row of it
#[derive(Clone, Debug)]
pub struct SpecInstance {
    pub spec: Arc<Specification>,
    pub spec_row: Option<usize>,
    /// Row excluded by the row filter; its scenarios are skipped
    pub row_excluded: bool,
    pub units: Vec<ScenarioUnit>,
}

impl SpecInstance {
    pub fn file_name(&self) -> &str {
        &self.spec.file_name
    }

    pub fn scenario_instance_count(&self) -> usize {
        self.units.iter().map(ScenarioUnit::instance_count).sum()
    }
}

/// Total scenario instances across spec instances
pub fn scenario_instance_count(instances: &[SpecInstance]) -> usize {
    instances.iter().map(SpecInstance::scenario_instance_count).sum()
}

/// Drop scenarios the tag filter rejects
///
/// Specs left without scenarios are dropped; specs that had none to begin
/// with are kept so they can be reported as empty.
pub fn filter_by_tags(specs: Vec<Arc<Specification>>, filter: &TagFilter) -> Vec<Arc<Specification>> {
    if filter.is_empty() {
        return specs;
    }

    specs
        .into_iter()
        .filter_map(|spec| {
            if spec.scenarios.is_empty() {
                return Some(spec);
            }
            let scenarios: Vec<Scenario> = spec
                .scenarios
                .iter()
                .filter(|s| filter.matches(s.tags.iter().chain(spec.tags.iter())))
                .cloned()
                .collect();
            if scenarios.is_empty() {
                debug!("Spec {} has no scenarios matching the tag filter", spec.file_name);
                return None;
            }
            if scenarios.len() == spec.scenarios.len() {
                return Some(spec);
            }
            let mut filtered = (*spec).clone();
            filtered.scenarios = scenarios;
            Some(Arc::new(filtered))
        })
        .collect()
}

/// Expand specs into spec instances
///
/// A spec with a populated data table yields one instance per row. When
/// its contexts or teardowns read a table column every scenario runs per
/// row; otherwise only scenarios reading a column run per row and the rest
/// run once, with the first selected row.
pub fn expand_data_table_specs(
    specs: &[Arc<Specification>],
    config: &RunConfig,
) -> Vec<SpecInstance> {
    let mut instances = Vec::new();
    for spec in specs {
        match spec.table().filter(|t| t.row_count() > 0) {
            None => instances.push(SpecInstance {
                spec: spec.clone(),
                spec_row: None,
                row_excluded: false,
                units: scenario_units(spec, None, 0..spec.scenarios.len(), config.strategy),
            }),
            Some(table) => {
                let headers = &table.headers;
                let all: Vec<usize> = (0..spec.scenarios.len()).collect();
                let (related, unrelated): (Vec<usize>, Vec<usize>) =
                    if spec.uses_args_in_context_teardown(headers) {
                        (all, Vec::new())
                    } else {
                        all.into_iter()
                            .partition(|&i| spec.scenarios[i].uses_args_in_steps(headers))
                    };

                if related.is_empty() {
                    instances.push(SpecInstance {
                        spec: spec.clone(),
                        spec_row: None,
                        row_excluded: false,
                        units: scenario_units(spec, None, unrelated, config.strategy),
                    });
                    continue;
                }

                let host_row = (0..table.row_count())
                    .find(|&row| !config.row_excluded(row))
                    .unwrap_or(0);

                for row in 0..table.row_count() {
                    let mut indices = related.clone();
                    if row == host_row {
                        indices.extend(unrelated.iter().copied());
                        indices.sort_unstable();
                    }
                    instances.push(SpecInstance {
                        spec: spec.clone(),
                        spec_row: Some(row),
                        row_excluded: config.row_excluded(row),
                        units: scenario_units(spec, Some(row), indices, config.strategy),
                    });
                }
            }
        }
    }
    instances
}

fn scenario_units(
    spec: &Specification,
    spec_row: Option<usize>,
    indices: impl IntoIterator<Item = usize>,
    strategy: Strategy,
) -> Vec<ScenarioUnit> {
    let spec_headers: &[String] = spec.table().map(|t| t.headers.as_slice()).unwrap_or(&[]);
    let spec_rows = spec.table().map(|t| t.row_count()).unwrap_or(0);

    let mut units = Vec::new();
    for index in indices {
        let scenario = &spec.scenarios[index];
        let Some(table) = scenario.table() else {
            units.push(ScenarioUnit::Instance(ScenarioInstance {
                scenario_index: index,
                spec_row,
                scenario_row: None,
            }));
            continue;
        };

        let uses_spec_params = spec_row.is_some() && scenario.uses_args_in_steps(spec_headers);
        let scenario_spec_row = spec_row.filter(|_| uses_spec_params);
        if uses_spec_params && spec_rows * table.row_count() > NESTED_ITERATION_WARNING {
            warn!(
                "Scenario '{}' has nested data tables (spec: {} rows x scenario: {} rows = {} iterations). Consider the lazy strategy.",
                scenario.heading,
                spec_rows,
                table.row_count(),
                spec_rows * table.row_count()
            );
        }

        match strategy {
            Strategy::Lazy => units.push(ScenarioUnit::Lazy(LazyScenarioCollection::new(
                index,
                scenario_spec_row,
                table.row_count(),
            ))),
            Strategy::Eager => units.extend((0..table.row_count()).map(|row| {
                ScenarioUnit::Instance(ScenarioInstance {
                    scenario_index: index,
                    spec_row: scenario_spec_row,
                    scenario_row: Some(row),
                })
            })),
        }
    }
    units
}

/// Partition spec instances across `streams` buckets, round-robin
pub fn distribute(instances: Vec<SpecInstance>, streams: usize) -> Vec<Vec<SpecInstance>> {
    let streams = streams.max(1);
    let mut buckets: Vec<Vec<SpecInstance>> = (0..streams).map(|_| Vec::new()).collect();
    for (i, instance) in instances.into_iter().enumerate() {
        buckets[i % streams].push(instance);
    }
    buckets
}

/// Spec instances shared by lazily pulling streams
#[derive(Debug, Default)]
pub struct SpecCollection {
    queue: Mutex<VecDeque<SpecInstance>>,
}

impl SpecCollection {
    pub fn new(instances: Vec<SpecInstance>) -> Self {
        Self {
            queue: Mutex::new(instances.into()),
        }
    }

    /// Next instance in document order, if any is left
    pub fn next(&self) -> Option<SpecInstance> {
        self.queue.lock().ok().and_then(|mut q| q.pop_front())
    }

    /// Everything nobody pulled
    pub fn drain(&self) -> Vec<SpecInstance> {
        self.queue
            .lock()
            .map(|mut q| q.drain(..).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
