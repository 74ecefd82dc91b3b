//! Serial execution
//!
//! One runner, one stream, spec instances in document order. Also holds the
//! suite setup and teardown shared with the parallel scheduler.

use std::sync::Arc;
use tracing::{info, warn};

use super::collection::SpecInstance;
use super::hooks::{execute_hook, init_data_store, HookStage};
use super::spec::SpecExecutor;
use super::{kill_runner, ExecutionContext, ExecutionError};
use crate::events::{EventResult, ExecutionEvent, Topic};
use crate::models::{SpecResult, SuiteResult};
use crate::resolve::ResolveError;
use crate::results::{Aggregator, StreamReport};
use crate::runner::{Disconnected, Message, MessageKind, Runner, RunnerError, RunnerFactory};
use crate::utils::Timer;

const BEFORE_SUITE_FAILED: &str = "Skipped because the before suite hook failed";

/// State left by suite setup on the runner that owns the suite hooks
pub(crate) struct SuiteSetup {
    /// Every spec is skipped with this reason when set
    pub skip_reason: Option<String>,
    run_after_hook: bool,
}

/// Suite data-store init followed by the before-suite hook
pub(crate) async fn begin_suite(runner: &dyn Runner, suite: &mut SuiteResult) -> SuiteSetup {
    if let Some(error) =
        init_data_store(runner, Message::new(1, MessageKind::SuiteDataStoreInit)).await
    {
        let message = format!("Failed to initialize suite datastore. Error: {error}");
        warn!("{}", message);
        suite.add_unhandled_error(message.clone());
        return SuiteSetup {
            skip_reason: Some(message),
            run_after_hook: false,
        };
    }

    let failed = execute_hook(
        runner,
        Message::new(1, MessageKind::ExecutionStarting),
        suite,
        HookStage::Before,
        None,
    )
    .await;

    SuiteSetup {
        skip_reason: failed.then(|| BEFORE_SUITE_FAILED.to_string()),
        run_after_hook: true,
    }
}

/// After-suite hook, unless the suite data store never came up
pub(crate) async fn end_suite(runner: &dyn Runner, suite: &mut SuiteResult, setup: &SuiteSetup) {
    if setup.run_after_hook {
        execute_hook(
            runner,
            Message::new(1, MessageKind::ExecutionEnding),
            suite,
            HookStage::After,
            None,
        )
        .await;
    }
}

/// File names in scheduling order, without repeats
pub(crate) fn file_order(instances: &[SpecInstance]) -> Vec<String> {
    let mut files: Vec<String> = Vec::new();
    for instance in instances {
        if !files.iter().any(|f| f == instance.file_name()) {
            files.push(instance.file_name().to_string());
        }
    }
    files
}

pub(crate) fn emit_suite_start(ctx: &ExecutionContext) {
    ctx.events.emit(ExecutionEvent::new(Topic::SuiteStart, 1));
}

pub(crate) fn emit_suite_end(ctx: &ExecutionContext, suite: &SuiteResult) {
    if ctx.events.is_enabled() {
        ctx.events.emit(
            ExecutionEvent::new(Topic::SuiteEnd, 1)
                .with_result(EventResult::Suite(Box::new(suite.clone()))),
        );
    }
}

/// Record a run whose first runner never started
///
/// Every instance is reported skipped and the suite carries the start
/// failure as an unhandled error.
pub(crate) fn runner_start_failed(
    ctx: &ExecutionContext,
    suite: &mut SuiteResult,
    instances: Vec<SpecInstance>,
    error: &RunnerError,
) -> Result<Vec<SpecResult>, ResolveError> {
    warn!("Could not start runner: {}", error);
    let files = file_order(&instances);
    suite.add_unhandled_error(format!(
        "The following specifications could not be executed:\n{}\nReason : Failed to start runner. {}",
        files.join("\n"),
        error
    ));

    let reason = format!("Failed to start runner. {error}");
    let executor = SpecExecutor::new(ctx, &Disconnected, 1);
    instances
        .into_iter()
        .map(|instance| executor.skipped(instance, &reason))
        .collect()
}

/// Runs every spec instance over a single runner
pub struct SimpleExecution {
    ctx: ExecutionContext,
    factory: Arc<dyn RunnerFactory>,
}

impl SimpleExecution {
    pub fn new(ctx: ExecutionContext, factory: Arc<dyn RunnerFactory>) -> Self {
        Self { ctx, factory }
    }

    pub async fn run(&self, instances: Vec<SpecInstance>) -> Result<SuiteResult, ExecutionError> {
        let timer = Timer::start("serial execution");
        info!("Executing {} spec instance(s) serially", instances.len());

        emit_suite_start(&self.ctx);
        let order = file_order(&instances);
        let mut suite = SuiteResult::new(&self.ctx.config.project_name);

        let results = match self.factory.start(1).await {
            Ok(runner) => self.execute(runner, instances, &mut suite).await?,
            Err(e) => runner_start_failed(&self.ctx, &mut suite, instances, &e)?,
        };

        let mut suite = Aggregator::new(false)
            .with_order(order)
            .aggregate(suite, vec![StreamReport::completed(1, results)]);
        suite.execution_time = timer.stop();

        emit_suite_end(&self.ctx, &suite);
        Ok(suite)
    }

    async fn execute(
        &self,
        runner: Arc<dyn Runner>,
        instances: Vec<SpecInstance>,
        suite: &mut SuiteResult,
    ) -> Result<Vec<SpecResult>, ResolveError> {
        self.ctx.kill_switch.register(runner.clone());
        let setup = begin_suite(runner.as_ref(), suite).await;

        let executor = SpecExecutor::new(&self.ctx, runner.as_ref(), 1);
        let mut results = Vec::with_capacity(instances.len());
        let mut outcome = Ok(());
        for instance in instances {
            let result = match &setup.skip_reason {
                Some(reason) => executor.skipped(instance, reason),
                None => executor.execute(instance).await,
            };
            match result {
                Ok(result) => results.push(result),
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }

        end_suite(runner.as_ref(), suite, &setup).await;
        kill_runner(runner.as_ref(), self.ctx.config.kill_timeout).await;
        outcome.map(|_| results)
    }
}
