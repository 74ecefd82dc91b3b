//! Hook and data-store requests
//!
//! Hooks at every level share one shape: send the request, fold its time
//! into the unit's result and record a failure as a pre- or post-hook
//! failure that marks the unit failed.

use tracing::warn;

use crate::models::ExecResult;
use crate::runner::{ExecutionResult, Message, Runner};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum HookStage {
    Before,
    After,
}

/// Run a hook request; returns whether it failed
pub(crate) async fn execute_hook<R>(
    runner: &dyn Runner,
    message: Message,
    result: &mut R,
    stage: HookStage,
    row: Option<usize>,
) -> bool
where
    R: ExecResult + ?Sized,
{
    let name = message.name();
    let response = runner.execute_and_get_status(message).await;
    result.add_execution_time(response.execution_time);
    if response.failed {
        warn!("Hook {} failed: {}", name, response.error_message);
        handle_hook_failure(result, &response, stage, row);
    }
    response.failed
}

/// Attach a hook failure to `result` and mark it failed
pub(crate) fn handle_hook_failure<R>(
    result: &mut R,
    response: &ExecutionResult,
    stage: HookStage,
    row: Option<usize>,
) where
    R: ExecResult + ?Sized,
{
    let failure = response.hook_failure(row);
    match stage {
        HookStage::Before => result.add_pre_hook_failure(failure),
        HookStage::After => result.add_post_hook_failure(failure),
    }
    result.set_failure();
}

/// Initialise a data store; returns the runner's error when it failed
pub(crate) async fn init_data_store(runner: &dyn Runner, message: Message) -> Option<String> {
    let response = runner.execute_and_get_status(message).await;
    response.failed.then_some(response.error_message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ScenarioResult, SuiteResult};
    use crate::runner::{MessageKind, ScriptedRunner};

    #[tokio::test]
    async fn test_failed_before_hook_recorded_with_row() {
        let runner = ScriptedRunner::new()
            .with_step_time(7)
            .fail_on("execution_starting");
        let mut suite = SuiteResult::new("demo");

        let failed = execute_hook(
            &runner,
            Message::new(1, MessageKind::ExecutionStarting),
            &mut suite,
            HookStage::Before,
            Some(2),
        )
        .await;

        assert!(failed);
        assert!(suite.failed);
        assert_eq!(suite.execution_time, 7);
        assert_eq!(suite.pre_hook_failures.len(), 1);
        assert_eq!(suite.pre_hook_failures[0].table_row_index, Some(2));
    }

    #[tokio::test]
    async fn test_passing_hook_adds_time_only() {
        let runner = ScriptedRunner::new().with_step_time(3);
        let mut scenario = ScenarioResult::new("S", 1);

        let failed = execute_hook(
            &runner,
            Message::new(1, MessageKind::ExecutionEnding),
            &mut scenario,
            HookStage::After,
            None,
        )
        .await;

        assert!(!failed);
        assert!(!scenario.failed);
        assert_eq!(scenario.execution_time, 3);
        assert!(scenario.post_hook_failures.is_empty());
    }

    #[tokio::test]
    async fn test_data_store_init_reports_error() {
        let runner = ScriptedRunner::new().fail_on("suite_data_store_init");
        let error = init_data_store(&runner, Message::new(1, MessageKind::SuiteDataStoreInit)).await;
        assert_eq!(error.as_deref(), Some("suite_data_store_init failed"));
    }
}
