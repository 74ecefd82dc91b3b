//! Parallel execution
//!
//! Spec instances run across several streams, each with its own runner or
//! with a channel onto one shared multithreaded runner. Stream 1's runner
//! owns the suite data store and suite hooks, which run exactly once.
//! Eager scheduling splits the instances up front; lazy scheduling lets
//! every stream pull the next instance from a shared queue.

use futures::future::join_all;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::collection::{distribute, SpecCollection, SpecInstance};
use super::simple::{
    begin_suite, emit_suite_end, emit_suite_start, end_suite, file_order, runner_start_failed,
};
use super::spec::{SpecExecutor, RUNNER_NOT_ALIVE};
use super::{kill_runner, ExecutionContext, ExecutionError};
use crate::config::Strategy;
use crate::models::{SpecResult, SuiteResult};
use crate::resolve::ResolveError;
use crate::results::{Aggregator, StreamReport};
use crate::runner::{Disconnected, MultiplexedChannel, Runner, RunnerFactory};
use crate::utils::Timer;

type StreamTask = JoinHandle<Result<StreamReport, ResolveError>>;

/// Runner slot for one stream
enum StreamRunner {
    Ready(Arc<dyn Runner>),
    Failed(String),
}

/// Runs spec instances over several streams
pub struct ParallelExecution {
    ctx: ExecutionContext,
    factory: Arc<dyn RunnerFactory>,
}

impl ParallelExecution {
    pub fn new(ctx: ExecutionContext, factory: Arc<dyn RunnerFactory>) -> Self {
        Self { ctx, factory }
    }

    /// Streams actually used: never more than there are instances
    pub fn stream_count(&self, instances: usize) -> usize {
        self.ctx.config.streams.min(instances).max(1)
    }

    pub async fn run(&self, instances: Vec<SpecInstance>) -> Result<SuiteResult, ExecutionError> {
        let timer = Timer::start("parallel execution");
        let streams = self.stream_count(instances.len());
        let order = file_order(&instances);
        let mut suite = SuiteResult::new(&self.ctx.config.project_name);

        emit_suite_start(&self.ctx);

        let owner = match self.factory.start(1).await {
            Ok(runner) => runner,
            Err(e) => {
                let results = runner_start_failed(&self.ctx, &mut suite, instances, &e)?;
                return Ok(self.finish(suite, vec![StreamReport::completed(1, results)], order, timer));
            }
        };
        self.ctx.kill_switch.register(owner.clone());

        let shared = owner.is_multithreaded() && self.ctx.config.multithreading;
        info!(
            "Executing {} spec instance(s) on {} stream(s) ({} strategy{})",
            instances.len(),
            streams,
            self.ctx.config.strategy,
            if shared { ", shared runner" } else { "" }
        );

        let setup = begin_suite(owner.as_ref(), &mut suite).await;
        if let Some(reason) = &setup.skip_reason {
            let results = self.skip_all(instances, reason);
            end_suite(owner.as_ref(), &mut suite, &setup).await;
            kill_runner(owner.as_ref(), self.ctx.config.kill_timeout).await;
            let results = results?;
            return Ok(self.finish(suite, vec![StreamReport::completed(1, results)], order, timer));
        }

        let runners = self.start_runners(owner.clone(), streams, shared).await;
        let outcome = match self.ctx.config.strategy {
            Strategy::Eager => self.run_eager(instances, &runners).await,
            Strategy::Lazy => self.run_lazy(instances, &runners).await,
        };

        end_suite(owner.as_ref(), &mut suite, &setup).await;
        for runner in runners.iter().skip(1) {
            if let StreamRunner::Ready(runner) = runner {
                kill_runner(runner.as_ref(), self.ctx.config.kill_timeout).await;
            }
        }
        kill_runner(owner.as_ref(), self.ctx.config.kill_timeout).await;

        let reports = outcome?;
        Ok(self.finish(suite, reports, order, timer))
    }

    /// Runner per stream; stream 1 is always the already started owner
    async fn start_runners(
        &self,
        owner: Arc<dyn Runner>,
        streams: usize,
        shared: bool,
    ) -> Vec<StreamRunner> {
        if shared {
            return (1..=streams)
                .map(|stream| {
                    StreamRunner::Ready(Arc::new(MultiplexedChannel::new(owner.clone(), stream)))
                })
                .collect();
        }

        let started = join_all((2..=streams).map(|stream| self.factory.start(stream))).await;
        let mut runners = vec![StreamRunner::Ready(owner)];
        for (stream, result) in (2..=streams).zip(started) {
            match result {
                Ok(runner) => {
                    self.ctx.kill_switch.register(runner.clone());
                    runners.push(StreamRunner::Ready(runner));
                }
                Err(e) => {
                    warn!("Stream {} has no runner: {}", stream, e);
                    runners.push(StreamRunner::Failed(format!(
                        "Failed to start runner for stream {stream}. {e}"
                    )));
                }
            }
        }
        runners
    }

    async fn run_eager(
        &self,
        instances: Vec<SpecInstance>,
        runners: &[StreamRunner],
    ) -> Result<Vec<StreamReport>, ExecutionError> {
        let buckets = distribute(instances, runners.len());
        let mut reports = Vec::new();
        let mut tasks = Vec::new();

        for (index, (runner, bucket)) in runners.iter().zip(buckets).enumerate() {
            let stream = index + 1;
            debug!("Stream {} takes {} spec instance(s)", stream, bucket.len());
            match runner {
                StreamRunner::Ready(runner) => {
                    let ctx = self.ctx.clone();
                    let runner = runner.clone();
                    let task: StreamTask = tokio::spawn(async move {
                        let executor = SpecExecutor::new(&ctx, runner.as_ref(), stream);
                        let mut results = Vec::with_capacity(bucket.len());
                        for instance in bucket {
                            results.push(executor.execute(instance).await?);
                        }
                        Ok(stream_report(stream, runner.as_ref(), results))
                    });
                    tasks.push((stream, task));
                }
                StreamRunner::Failed(error) => {
                    let results = self.skip_all(bucket, error)?;
                    reports.push(StreamReport::failed(stream, results, error.clone()));
                }
            }
        }

        reports.extend(collect(tasks).await?);
        Ok(reports)
    }

    async fn run_lazy(
        &self,
        instances: Vec<SpecInstance>,
        runners: &[StreamRunner],
    ) -> Result<Vec<StreamReport>, ExecutionError> {
        let queue = Arc::new(SpecCollection::new(instances));
        let mut reports = Vec::new();
        let mut tasks = Vec::new();

        for (index, runner) in runners.iter().enumerate() {
            let stream = index + 1;
            match runner {
                StreamRunner::Ready(runner) => {
                    let ctx = self.ctx.clone();
                    let runner = runner.clone();
                    let queue = queue.clone();
                    let task: StreamTask = tokio::spawn(async move {
                        let executor = SpecExecutor::new(&ctx, runner.as_ref(), stream);
                        let mut results = Vec::new();
                        while runner.is_alive() {
                            let Some(instance) = queue.next() else {
                                break;
                            };
                            results.push(executor.execute(instance).await?);
                        }
                        Ok(stream_report(stream, runner.as_ref(), results))
                    });
                    tasks.push((stream, task));
                }
                StreamRunner::Failed(error) => {
                    reports.push(StreamReport::failed(stream, Vec::new(), error.clone()));
                }
            }
        }

        reports.extend(collect(tasks).await?);

        let leftovers = queue.drain();
        if !leftovers.is_empty() {
            warn!("{} spec instance(s) were never picked up", leftovers.len());
            reports.push(StreamReport::completed(
                runners.len() + 1,
                self.skip_all(leftovers, RUNNER_NOT_ALIVE)?,
            ));
        }
        Ok(reports)
    }

    fn skip_all(&self, instances: Vec<SpecInstance>, reason: &str) -> Result<Vec<SpecResult>, ResolveError> {
        let executor = SpecExecutor::new(&self.ctx, &Disconnected, 1);
        instances
            .into_iter()
            .map(|instance| executor.skipped(instance, reason))
            .collect()
    }

    fn finish(
        &self,
        suite: SuiteResult,
        reports: Vec<StreamReport>,
        order: Vec<String>,
        timer: Timer,
    ) -> SuiteResult {
        let mut suite = Aggregator::new(true).with_order(order).aggregate(suite, reports);
        suite.execution_time = timer.stop();
        emit_suite_end(&self.ctx, &suite);
        suite
    }
}

/// Report for a finished stream; a stream that lost its runner is failed
fn stream_report(stream: usize, runner: &dyn Runner, results: Vec<SpecResult>) -> StreamReport {
    if runner.is_alive() {
        StreamReport::completed(stream, results)
    } else {
        warn!("Stream {} stopped: {}", stream, RUNNER_NOT_ALIVE);
        StreamReport::failed(stream, results, format!("Stream {stream}: {RUNNER_NOT_ALIVE}"))
    }
}

/// Wait for every stream; a panicked stream aborts the run
async fn collect(tasks: Vec<(usize, StreamTask)>) -> Result<Vec<StreamReport>, ExecutionError> {
    let (streams, handles): (Vec<usize>, Vec<StreamTask>) = tasks.into_iter().unzip();
    let mut reports = Vec::with_capacity(streams.len());
    let mut first_error = None;

    for (stream, joined) in streams.into_iter().zip(join_all(handles).await) {
        match joined {
            Ok(Ok(report)) => reports.push(report),
            Ok(Err(e)) => {
                first_error.get_or_insert(ExecutionError::Resolve(e));
            }
            Err(e) => {
                first_error.get_or_insert(ExecutionError::StreamPanicked {
                    stream,
                    message: e.to_string(),
                });
            }
        }
    }

    match first_error {
        Some(error) => Err(error),
        None => Ok(reports),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::executor::expand_data_table_specs;
    use crate::models::{Scenario, Specification, Step, StepArg, Table};
    use crate::runner::{ScriptedRunner, ScriptedRunnerFactory};
    use std::collections::BTreeSet;

    fn plain_specs(count: usize) -> Vec<Arc<Specification>> {
        (1..=count)
            .map(|i| {
                Arc::new(
                    Specification::new(format!("spec{i}.spec"), format!("Spec {i}"))
                        .with_scenario(Scenario::new("Only", 2).with_step(Step::new(3, "Work"))),
                )
            })
            .collect()
    }

    /// Two spec rows, each driving a scenario with three rows of its own
    fn nested_table_spec() -> Arc<Specification> {
        let users = Table::new(vec!["user".to_string()])
            .with_row(vec!["alice"])
            .with_row(vec!["bob"]);
        let attempts = Table::new(vec!["attempt".to_string()])
            .with_row(vec!["1"])
            .with_row(vec!["2"])
            .with_row(vec!["3"]);
        Arc::new(
            Specification::new("rows.spec", "Rows")
                .with_table(users)
                .with_scenario(
                    Scenario::new("Login", 3).with_table(attempts).with_step(
                        Step::new(4, "Login {} attempt {}")
                            .with_arg(StepArg::dynamic("user"))
                            .with_arg(StepArg::dynamic("attempt")),
                    ),
                ),
        )
    }

    async fn run(
        config: RunConfig,
        factory: Arc<ScriptedRunnerFactory>,
        specs: &[Arc<Specification>],
    ) -> SuiteResult {
        let ctx = ExecutionContext::new(config);
        let instances = expand_data_table_specs(specs, &ctx.config);
        ParallelExecution::new(ctx, factory)
            .run(instances)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_suite_hooks_run_once_across_streams() {
        let factory = Arc::new(ScriptedRunnerFactory::default());
        let suite = run(RunConfig::new().with_parallel(5), factory.clone(), &plain_specs(5)).await;

        assert!(!suite.failed);
        assert_eq!(suite.specs_count(), 5);
        assert_eq!(factory.runners().len(), 5);
        assert_eq!(factory.total("suite_data_store_init"), 1);
        assert_eq!(factory.total("execution_starting"), 1);
        assert_eq!(factory.total("execution_ending"), 1);
        assert_eq!(factory.runners()[0].count("execution_starting"), 1);
        assert!(factory.runners().iter().all(|r| r.kill_count() == 1));
    }

    #[tokio::test]
    async fn test_streams_capped_by_instance_count() {
        let factory = Arc::new(ScriptedRunnerFactory::default());
        let suite = run(RunConfig::new().with_parallel(8), factory.clone(), &plain_specs(2)).await;

        assert_eq!(suite.specs_count(), 2);
        assert_eq!(factory.runners().len(), 2);
    }

    #[tokio::test]
    async fn test_eager_and_lazy_cover_same_scenarios() {
        for strategy in [Strategy::Eager, Strategy::Lazy] {
            let factory = Arc::new(ScriptedRunnerFactory::default());
            let config = RunConfig::new().with_parallel(2).with_strategy(strategy);
            let suite = run(config, factory.clone(), &[nested_table_spec()]).await;

            assert!(!suite.failed, "{strategy}");
            assert_eq!(suite.specs_count(), 1, "{strategy}");
            assert_eq!(suite.scenarios_count, 6, "{strategy}");
            assert_eq!(suite.spec_results[0].scenario_count, 6, "{strategy}");
            assert_eq!(factory.total("execute_step"), 6, "{strategy}");
            assert_eq!(suite.spec_results[0].table_rows.len(), 2, "{strategy}");
        }
    }

    #[tokio::test]
    async fn test_owner_start_failure_skips_everything() {
        let factory = Arc::new(ScriptedRunnerFactory::default().fail_stream(1));
        let suite = run(RunConfig::new().with_parallel(2), factory.clone(), &plain_specs(2)).await;

        assert!(suite.failed);
        assert!(suite.unhandled_errors[0]
            .starts_with("The following specifications could not be executed:\nspec1.spec\nspec2.spec"));
        assert!(suite.unhandled_errors[0].contains("Reason : Failed to start runner."));
        assert_eq!(suite.specs_skipped_count, 2);
        assert!(factory.runners().is_empty());
    }

    #[tokio::test]
    async fn test_failed_stream_does_not_block_the_rest() {
        let factory = Arc::new(ScriptedRunnerFactory::default().fail_stream(2));
        let suite = run(RunConfig::new().with_parallel(2), factory.clone(), &plain_specs(2)).await;

        assert!(suite.failed);
        assert_eq!(suite.unhandled_errors.len(), 1);
        assert!(!suite.spec("spec1.spec").unwrap().skipped);
        assert!(suite.spec("spec2.spec").unwrap().skipped);
        assert_eq!(factory.total("execute_step"), 1);
    }

    #[tokio::test]
    async fn test_lazy_streams_absorb_failed_stream_share() {
        let factory = Arc::new(ScriptedRunnerFactory::default().fail_stream(3));
        let config = RunConfig::new().with_parallel(3).with_strategy(Strategy::Lazy);
        let suite = run(config, factory.clone(), &plain_specs(4)).await;

        assert_eq!(suite.specs_skipped_count, 0);
        assert_eq!(factory.total("execute_step"), 4);
        assert_eq!(suite.unhandled_errors.len(), 1);
    }

    fn dead_second_stream() -> Arc<ScriptedRunnerFactory> {
        Arc::new(ScriptedRunnerFactory::new(|stream| {
            let runner = ScriptedRunner::new().with_step_time(10);
            if stream == 2 {
                runner.crash();
            }
            runner
        }))
    }

    #[tokio::test]
    async fn test_lazy_dead_runner_leaves_queue_to_live_streams() {
        let factory = dead_second_stream();
        let config = RunConfig::new().with_parallel(2).with_strategy(Strategy::Lazy);
        let suite = run(config, factory.clone(), &plain_specs(8)).await;

        assert!(suite.failed);
        assert_eq!(suite.specs_count(), 8);
        assert_eq!(suite.specs_skipped_count, 0);
        assert_eq!(factory.runners()[0].executed_steps().len(), 8);
        assert_eq!(suite.unhandled_errors, vec!["Stream 2: Runner is not alive"]);
    }

    #[tokio::test]
    async fn test_eager_dead_runner_fails_its_bucket() {
        let factory = dead_second_stream();
        let suite = run(RunConfig::new().with_parallel(2), factory.clone(), &plain_specs(4)).await;

        assert!(suite.failed);
        assert_eq!(suite.specs_skipped_count, 2);
        assert!(suite.spec("spec2.spec").unwrap().skipped);
        assert!(!suite.spec("spec1.spec").unwrap().skipped);
        assert_eq!(suite.unhandled_errors, vec!["Stream 2: Runner is not alive"]);
    }

    #[tokio::test]
    async fn test_multithreaded_runner_is_shared() {
        let factory = Arc::new(ScriptedRunnerFactory::new(|_| ScriptedRunner::new().multithreaded()));
        let config = RunConfig::new().with_parallel(3).with_multithreading(true);
        let suite = run(config, factory.clone(), &plain_specs(3)).await;

        assert!(!suite.failed);
        let runners = factory.runners();
        assert_eq!(runners.len(), 1);
        let streams: BTreeSet<usize> = runners[0]
            .messages()
            .iter()
            .filter(|m| m.name() == "execute_step")
            .map(|m| m.stream)
            .collect();
        assert_eq!(streams, BTreeSet::from([1, 2, 3]));
        assert_eq!(runners[0].count("execution_starting"), 1);
    }

    #[tokio::test]
    async fn test_before_suite_failure_skips_all_specs() {
        let factory = Arc::new(ScriptedRunnerFactory::new(|stream| {
            if stream == 1 {
                ScriptedRunner::new().fail_on("execution_starting")
            } else {
                ScriptedRunner::new()
            }
        }));
        let suite = run(RunConfig::new().with_parallel(2), factory.clone(), &plain_specs(2)).await;

        assert!(suite.failed);
        assert_eq!(suite.specs_skipped_count, 2);
        assert_eq!(factory.runners().len(), 1);
        assert_eq!(factory.total("execution_ending"), 1);
        assert_eq!(factory.total("execute_step"), 0);
    }
}
