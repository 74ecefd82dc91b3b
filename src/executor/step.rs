//! Step and concept execution

use futures::future::{BoxFuture, FutureExt};

use super::hooks::{execute_hook, HookStage};
use super::ExecutionContext;
use crate::events::{EventResult, ExecutionEvent, Topic};
use crate::models::{ConceptResult, ItemResult, StepResult};
use crate::runner::{Message, MessageKind, Runner, StepInfo};

/// Reason recorded on items left unexecuted after a fatal failure
pub(crate) const PREVIOUS_FAILURE: &str = "Skipped after a previous non-recoverable failure";

/// Executes resolved item trees for one scenario instance
pub(crate) struct StepExecutor<'a> {
    pub ctx: &'a ExecutionContext,
    pub runner: &'a dyn Runner,
    pub stream: usize,
    pub file_name: &'a str,
    pub row: Option<usize>,
}

impl<'a> StepExecutor<'a> {
    /// Execute items in order, stopping at the first non-recoverable failure
    ///
    /// Items after the stop are marked skipped. Returns whether execution
    /// stopped early.
    pub fn execute_items<'b>(&'b self, items: &'b mut [ItemResult]) -> BoxFuture<'b, bool> {
        async move {
            let mut halted = false;
            for item in items.iter_mut() {
                if halted {
                    item.skip(PREVIOUS_FAILURE);
                    continue;
                }
                if item.is_skipped() {
                    continue;
                }
                match item {
                    ItemResult::Step(step) => self.execute_step(step).await,
                    ItemResult::Concept(concept) => self.execute_concept(concept).await,
                }
                halted = item.failed() && !item.recoverable();
            }
            halted
        }
        .boxed()
    }

    async fn execute_concept(&self, concept: &mut ConceptResult) {
        self.emit(
            ExecutionEvent::new(Topic::ConceptStart, self.stream).with_title(&concept.text),
            concept.line_no,
        );

        self.execute_items(&mut concept.items).await;
        concept.update_exec_result();

        self.emit(
            ExecutionEvent::new(Topic::ConceptEnd, self.stream)
                .with_title(&concept.text)
                .with_result(EventResult::Item(Box::new(ItemResult::Concept(concept.clone())))),
            concept.line_no,
        );
    }

    async fn execute_step(&self, step: &mut StepResult) {
        self.emit(
            ExecutionEvent::new(Topic::StepStart, self.stream).with_title(&step.text),
            step.line_no,
        );

        let info = StepInfo {
            file_name: self.file_name.to_string(),
            parsed_text: step.parsed_text.clone(),
            actual_text: step.text.clone(),
            line_no: step.line_no,
            parameters: step.parameters.clone(),
        };

        step.start();
        execute_hook(
            self.runner,
            self.message(MessageKind::StepExecutionStarting(info.clone())),
            step,
            HookStage::Before,
            self.row,
        )
        .await;

        if !step.failed {
            let response = self
                .runner
                .execute_and_get_status(self.message(MessageKind::ExecuteStep(info.clone())))
                .await;
            step.execution_time += response.execution_time;
            step.messages.extend(response.messages.iter().cloned());
            if response.failed {
                step.failed = true;
                step.recoverable = response.recoverable;
                step.error_message = Some(response.error_message.clone());
                step.stack_trace = Some(response.stack_trace.clone()).filter(|s| !s.is_empty());
                step.screenshot = response.screenshot.clone();
            }
        }

        execute_hook(
            self.runner,
            self.message(MessageKind::StepExecutionEnding(info)),
            step,
            HookStage::After,
            self.row,
        )
        .await;
        step.finish();

        self.emit(
            ExecutionEvent::new(Topic::StepEnd, self.stream)
                .with_title(&step.text)
                .with_result(EventResult::Item(Box::new(ItemResult::Step(step.clone())))),
            step.line_no,
        );
    }

    fn message(&self, kind: MessageKind) -> Message {
        Message::new(self.stream, kind)
    }

    fn emit(&self, event: ExecutionEvent, line_no: usize) {
        if self.ctx.events.is_enabled() {
            self.ctx
                .events
                .emit(event.at(self.file_name, line_no).with_row(self.row));
        }
    }
}
