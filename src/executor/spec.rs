//! Spec execution
//!
//! Runs one spec instance: data-store init, before-spec hook, every
//! scheduled scenario instance in document order, after-spec hook.

use tracing::{debug, info};

use super::collection::{ScenarioInstance, ScenarioUnit, SpecInstance};
use super::hooks::{execute_hook, init_data_store, HookStage};
use super::scenario::ScenarioExecutor;
use super::ExecutionContext;
use crate::events::{EventResult, ExecutionEvent, Topic};
use crate::models::{ExecResult, SpecResult};
use crate::resolve::{ArgLookup, ResolveError};
use crate::runner::{Message, MessageKind, Runner, SpecInfo};

pub(crate) const NO_SCENARIOS: &str = "No scenarios found";
pub(crate) const RUNNER_NOT_ALIVE: &str = "Runner is not alive";
const BEFORE_SPEC_FAILED: &str = "Skipped because the before spec hook failed";

/// Executes spec instances over one runner connection
pub struct SpecExecutor<'a> {
    ctx: &'a ExecutionContext,
    runner: &'a dyn Runner,
    stream: usize,
}

impl<'a> SpecExecutor<'a> {
    pub fn new(ctx: &'a ExecutionContext, runner: &'a dyn Runner, stream: usize) -> Self {
        Self {
            ctx,
            runner,
            stream,
        }
    }

    pub async fn execute(&self, instance: SpecInstance) -> Result<SpecResult, ResolveError> {
        let spec = instance.spec.clone();
        let mut result = self.new_result(&instance);

        if !self.runner.is_alive() {
            return self.skip(instance, result, vec![RUNNER_NOT_ALIVE.to_string()]);
        }

        let build_errors = self.ctx.build_errors.spec_errors(&spec.file_name);
        if !build_errors.is_empty() {
            let messages: Vec<String> = build_errors.iter().map(|e| e.to_string()).collect();
            if self.ctx.build_errors.has_parse_errors(&spec.file_name) {
                result.errors = messages.clone();
                result.set_failure();
            }
            return self.skip(instance, result, messages);
        }

        if spec.scenarios.is_empty() {
            info!("Skipping {}: {}", spec.file_name, NO_SCENARIOS);
            return self.skip(instance, result, vec![NO_SCENARIOS.to_string()]);
        }

        if instance.row_excluded {
            debug!(
                "Row {:?} of {} excluded by row filter",
                instance.spec_row, spec.file_name
            );
            return self.skip(instance, result, vec![self.ctx.config.row_filter_reason()]);
        }

        self.emit(Topic::SpecStart, &instance, None);
        let info = self.spec_info(&instance);

        if let Some(error) = init_data_store(
            self.runner,
            self.message(MessageKind::SpecDataStoreInit(info.clone())),
        )
        .await
        {
            let reason = format!("Failed to initialize spec datastore. Error: {error}");
            let result = self.skip(instance.clone(), result, vec![reason])?;
            self.emit(Topic::SpecEnd, &instance, Some(&result));
            return Ok(result);
        }

        result.start();
        let row = instance.spec_row;
        let before_failed = execute_hook(
            self.runner,
            self.message(MessageKind::SpecExecutionStarting(info.clone())),
            &mut result,
            HookStage::Before,
            row,
        )
        .await;

        let lookup = self.spec_lookup(&instance);
        let scenarios = ScenarioExecutor {
            ctx: self.ctx,
            runner: self.runner,
            stream: self.stream,
            spec: &spec,
            spec_lookup: &lookup,
        };

        for unit in instance.units.iter().cloned() {
            for scenario in instances_of(unit) {
                let scenario_result = if before_failed {
                    scenarios.skipped(scenario, [BEFORE_SPEC_FAILED])?
                } else if !self.runner.is_alive() {
                    scenarios.skipped(scenario, [RUNNER_NOT_ALIVE])?
                } else {
                    scenarios.execute(scenario).await?
                };
                result.add_execution_time(scenario_result.execution_time);
                result.add_scenario(scenario_result);
            }
        }

        execute_hook(
            self.runner,
            self.message(MessageKind::SpecExecutionEnding(info)),
            &mut result,
            HookStage::After,
            row,
        )
        .await;

        result.finish();
        self.emit(Topic::SpecEnd, &instance, Some(&result));
        Ok(result)
    }

    /// Result for an instance that never runs, with every scenario skipped
    pub fn skipped(&self, instance: SpecInstance, reason: &str) -> Result<SpecResult, ResolveError> {
        let result = self.new_result(&instance);
        self.skip(instance, result, vec![reason.to_string()])
    }

    fn skip(
        &self,
        instance: SpecInstance,
        mut result: SpecResult,
        reasons: Vec<String>,
    ) -> Result<SpecResult, ResolveError> {
        let lookup = self.spec_lookup(&instance);
        let scenarios = ScenarioExecutor {
            ctx: self.ctx,
            runner: self.runner,
            stream: self.stream,
            spec: &instance.spec,
            spec_lookup: &lookup,
        };
        for unit in instance.units.iter().cloned() {
            for scenario in instances_of(unit) {
                result.add_scenario(scenarios.skipped(scenario, reasons.iter().cloned())?);
            }
        }
        result.skip(reasons);
        result.finish();
        Ok(result)
    }

    fn new_result(&self, instance: &SpecInstance) -> SpecResult {
        let spec = &instance.spec;
        let mut result = SpecResult::new(&spec.file_name, &spec.heading);
        result.tags = spec.tags.clone();
        if let Some(table) = spec.table() {
            result.table_headers = table.headers.clone();
            if let Some(row) = instance.spec_row {
                result.is_table_driven = true;
                if let Some(values) = table.row_values(row) {
                    result.add_table_row(row, values);
                }
            }
        }
        result
    }

    fn spec_lookup(&self, instance: &SpecInstance) -> ArgLookup {
        match (instance.spec.table(), instance.spec_row) {
            (Some(table), Some(row)) => ArgLookup::from_table_row(table, row),
            _ => ArgLookup::new(),
        }
    }

    fn spec_info(&self, instance: &SpecInstance) -> SpecInfo {
        SpecInfo {
            file_name: instance.spec.file_name.clone(),
            heading: instance.spec.heading.clone(),
            tags: instance.spec.tags.clone(),
            row_index: instance.spec_row,
        }
    }

    fn message(&self, kind: MessageKind) -> Message {
        Message::new(self.stream, kind)
    }

    fn emit(&self, topic: Topic, instance: &SpecInstance, result: Option<&SpecResult>) {
        if !self.ctx.events.is_enabled() {
            return;
        }
        let mut event = ExecutionEvent::new(topic, self.stream)
            .at(instance.file_name(), 1)
            .with_row(instance.spec_row)
            .with_title(&instance.spec.heading);
        if let Some(result) = result {
            event = event.with_result(EventResult::Spec(Box::new(result.clone())));
        }
        self.ctx.events.emit(event);
    }
}

fn instances_of(unit: ScenarioUnit) -> Box<dyn Iterator<Item = ScenarioInstance> + Send> {
    match unit {
        ScenarioUnit::Instance(instance) => Box::new(std::iter::once(instance)),
        ScenarioUnit::Lazy(lazy) => Box::new(lazy),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RunConfig, Strategy, TableRowFilter};
    use crate::executor::collection::expand_data_table_specs;
    use crate::models::{
        BuildError, BuildErrors, ExecutionStatus, Scenario, Specification, Step, StepArg, Table,
    };
    use crate::runner::ScriptedRunner;
    use std::sync::Arc;

    fn table_spec(rows: usize) -> Arc<Specification> {
        let mut table = Table::new(vec!["id".to_string()]);
        for row in 0..rows {
            table = table.with_row(vec![format!("{}", row + 1)]);
        }
        Arc::new(
            Specification::new("rows.spec", "Rows")
                .with_table(table)
                .with_scenario(
                    Scenario::new("Open", 3)
                        .with_step(Step::new(4, "Open {}").with_arg(StepArg::dynamic("id"))),
                ),
        )
    }

    async fn run_all(ctx: &ExecutionContext, runner: &ScriptedRunner, specs: &[Arc<Specification>]) -> Vec<SpecResult> {
        let executor = SpecExecutor::new(ctx, runner, 1);
        let mut results = Vec::new();
        for instance in expand_data_table_specs(specs, &ctx.config) {
            results.push(executor.execute(instance).await.unwrap());
        }
        results
    }

    #[tokio::test]
    async fn test_spec_without_scenarios_is_skipped() {
        let ctx = ExecutionContext::new(RunConfig::new());
        let runner = ScriptedRunner::new();
        let specs = vec![Arc::new(Specification::new("empty.spec", "Empty"))];

        let results = run_all(&ctx, &runner, &specs).await;

        assert!(results[0].skipped);
        assert_eq!(results[0].skip_reasons, vec![NO_SCENARIOS]);
        assert_eq!(results[0].scenario_count, 0);
        assert!(!results[0].failed);
        assert!(runner.messages().is_empty());
    }

    #[tokio::test]
    async fn test_row_filter_skips_excluded_rows() {
        let config = RunConfig::new().with_table_rows(TableRowFilter::parse("2-3").unwrap());
        let ctx = ExecutionContext::new(config);
        let runner = ScriptedRunner::new();

        let results = run_all(&ctx, &runner, &[table_spec(4)]).await;

        assert_eq!(runner.executed_steps(), vec!["Open \"2\"", "Open \"3\""]);
        assert!(results[0].skipped);
        assert!(results[0].scenarios[0].is_row_filtered());
        assert!(!results[1].skipped);
        assert!(results[3].scenarios[0].is_row_filtered());
        assert_eq!(runner.count("spec_execution_starting"), 2);
    }

    #[tokio::test]
    async fn test_spec_hooks_run_per_row() {
        let ctx = ExecutionContext::new(RunConfig::new().with_strategy(Strategy::Lazy));
        let runner = ScriptedRunner::new();

        let results = run_all(&ctx, &runner, &[table_spec(3)]).await;

        assert_eq!(results.len(), 3);
        assert_eq!(runner.count("spec_execution_starting"), 3);
        assert_eq!(runner.count("spec_execution_ending"), 3);
        assert!(results.iter().all(|r| r.status == ExecutionStatus::Passed));
    }

    #[tokio::test]
    async fn test_before_spec_failure_skips_scenarios_and_runs_after_hook() {
        let ctx = ExecutionContext::new(RunConfig::new());
        let runner = ScriptedRunner::new().fail_on("spec_execution_starting");

        let results = run_all(&ctx, &runner, &[table_spec(1)]).await;

        let spec = &results[0];
        assert!(spec.failed);
        assert_eq!(spec.pre_hook_failures[0].table_row_index, Some(0));
        assert!(spec.scenarios[0].is_skipped());
        assert_eq!(runner.count("spec_execution_ending"), 1);
        assert!(runner.executed_steps().is_empty());
    }

    #[tokio::test]
    async fn test_dead_runner_skips_spec() {
        let ctx = ExecutionContext::new(RunConfig::new());
        let runner = ScriptedRunner::new();
        runner.crash();

        let results = run_all(&ctx, &runner, &[table_spec(1)]).await;

        assert!(results[0].skipped);
        assert_eq!(results[0].skip_reasons, vec![RUNNER_NOT_ALIVE]);
        assert_eq!(results[0].scenario_skipped_count, 1);
    }

    #[tokio::test]
    async fn test_parse_errors_fail_spec_without_running() {
        let errors: BuildErrors = vec![BuildError::parse("rows.spec", 1, "Unexpected token")]
            .into_iter()
            .collect();
        let ctx = ExecutionContext::new(RunConfig::new()).with_build_errors(errors);
        let runner = ScriptedRunner::new();

        let results = run_all(&ctx, &runner, &[table_spec(1)]).await;

        assert!(results[0].failed);
        assert_eq!(results[0].errors.len(), 1);
        assert!(runner.messages().is_empty());
    }
}
