//! Scenario execution
//!
//! A scenario instance runs its data-store init, before hook, the spec
//! contexts, its own steps, the spec teardowns and its after hook. The
//! after hook runs even when the before hook failed.

use tracing::debug;

use super::collection::ScenarioInstance;
use super::hooks::{execute_hook, init_data_store, HookStage};
use super::step::{StepExecutor, PREVIOUS_FAILURE};
use super::ExecutionContext;
use crate::events::{EventResult, ExecutionEvent, Topic};
use crate::models::{ExecResult, ItemResult, ScenarioResult, Specification};
use crate::resolve::{ArgLookup, ResolveError};
use crate::runner::{Message, MessageKind, Runner, ScenarioInfo};

const BEFORE_HOOK_FAILED: &str = "Skipped because the before scenario hook failed";

/// Runs scenario instances of one spec instance
pub(crate) struct ScenarioExecutor<'a> {
    pub ctx: &'a ExecutionContext,
    pub runner: &'a dyn Runner,
    pub stream: usize,
    pub spec: &'a Specification,
    /// Lookup for the spec-table row of the owning spec instance
    pub spec_lookup: &'a ArgLookup,
}

impl<'a> ScenarioExecutor<'a> {
    /// Execute one instance, retrying failures up to the configured limit
    pub async fn execute(&self, instance: ScenarioInstance) -> Result<ScenarioResult, ResolveError> {
        let attempts = self.ctx.config.max_retries.max(1);
        let mut attempt = 1;
        loop {
            let mut result = self.execute_once(instance).await?;
            if !result.failed || attempt >= attempts {
                result.retries_count = attempt - 1;
                return Ok(result);
            }
            debug!(
                "Retrying scenario '{}' ({}/{})",
                result.heading,
                attempt + 1,
                attempts
            );
            attempt += 1;
        }
    }

    /// Result for an instance that will not run
    pub fn skipped<I, S>(&self, instance: ScenarioInstance, reasons: I) -> Result<ScenarioResult, ResolveError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut result = self.resolve(instance)?;
        result.skip(reasons);
        Ok(result)
    }

    /// Build the unexecuted result tree for an instance
    pub fn resolve(&self, instance: ScenarioInstance) -> Result<ScenarioResult, ResolveError> {
        let scenario = &self.spec.scenarios[instance.scenario_index];
        let table = scenario.table();
        let lookup = match (table, instance.scenario_row) {
            (Some(table), Some(row)) => self
                .spec_lookup
                .overlay(&ArgLookup::from_table_row(table, row)),
            _ => self.spec_lookup.clone(),
        };

        let resolver = self.ctx.resolver();
        let file_name = &self.spec.file_name;
        let mut result = ScenarioResult::new(&scenario.heading, scenario.line_no)
            .with_rows(instance.spec_row, instance.scenario_row);
        result.tags = scenario.tags.clone();
        result.scenario_table_row = table
            .zip(instance.scenario_row)
            .and_then(|(t, row)| t.row_values(row));
        result.contexts = resolver.resolve_items(&self.spec.contexts, file_name, &lookup)?;
        result.items = resolver.resolve_items(&scenario.steps, file_name, &lookup)?;
        result.teardowns = resolver.resolve_items(&self.spec.teardowns, file_name, &lookup)?;
        Ok(result)
    }

    async fn execute_once(&self, instance: ScenarioInstance) -> Result<ScenarioResult, ResolveError> {
        let mut result = self.resolve(instance)?;
        let scenario = &self.spec.scenarios[instance.scenario_index];
        let row = instance.spec_row;

        let errors = self
            .ctx
            .build_errors
            .scenario_errors(&self.spec.file_name, scenario.line_no);
        if !errors.is_empty() {
            result.skip(errors.iter().map(|e| e.message.clone()));
            self.emit_end(&result);
            return Ok(result);
        }

        self.ctx.events.emit(
            ExecutionEvent::new(Topic::ScenarioStart, self.stream)
                .at(&self.spec.file_name, scenario.line_no)
                .with_row(row)
                .with_title(&scenario.heading),
        );

        let info = ScenarioInfo {
            file_name: self.spec.file_name.clone(),
            heading: scenario.heading.clone(),
            line_no: scenario.line_no,
            tags: scenario.tags.clone(),
            spec_row: instance.spec_row,
            scenario_row: instance.scenario_row,
        };

        if let Some(error) = init_data_store(
            self.runner,
            self.message(MessageKind::ScenarioDataStoreInit(info.clone())),
        )
        .await
        {
            result.skip([format!(
                "Failed to initialize scenario datastore. Error: {error}"
            )]);
            self.emit_end(&result);
            return Ok(result);
        }

        result.start();
        let before_failed = execute_hook(
            self.runner,
            self.message(MessageKind::ScenarioExecutionStarting(info.clone())),
            &mut result,
            HookStage::Before,
            row,
        )
        .await;

        if before_failed {
            skip_pending(&mut result.contexts, BEFORE_HOOK_FAILED);
            skip_pending(&mut result.items, BEFORE_HOOK_FAILED);
            skip_pending(&mut result.teardowns, BEFORE_HOOK_FAILED);
        } else {
            let steps = StepExecutor {
                ctx: self.ctx,
                runner: self.runner,
                stream: self.stream,
                file_name: &self.spec.file_name,
                row,
            };

            steps.execute_items(&mut result.contexts).await;
            if any_failed(&result.contexts) {
                result.set_failure();
                skip_pending(&mut result.items, PREVIOUS_FAILURE);
            } else {
                steps.execute_items(&mut result.items).await;
                if any_failed(&result.items) {
                    result.set_failure();
                }
            }

            steps.execute_items(&mut result.teardowns).await;
            if any_failed(&result.teardowns) {
                result.set_failure();
            }
        }

        execute_hook(
            self.runner,
            self.message(MessageKind::ScenarioExecutionEnding(info)),
            &mut result,
            HookStage::After,
            row,
        )
        .await;

        result.finish();
        self.emit_end(&result);
        Ok(result)
    }

    fn message(&self, kind: MessageKind) -> Message {
        Message::new(self.stream, kind)
    }

    fn emit_end(&self, result: &ScenarioResult) {
        if self.ctx.events.is_enabled() {
            self.ctx.events.emit(
                ExecutionEvent::new(Topic::ScenarioEnd, self.stream)
                    .at(&self.spec.file_name, result.line_no)
                    .with_row(result.spec_row)
                    .with_title(&result.heading)
                    .with_result(EventResult::Scenario(Box::new(result.clone()))),
            );
        }
    }
}

fn any_failed(items: &[ItemResult]) -> bool {
    items.iter().any(ItemResult::failed)
}

fn skip_pending(items: &mut [ItemResult], reason: &str) {
    for item in items {
        item.skip(reason);
    }
}
