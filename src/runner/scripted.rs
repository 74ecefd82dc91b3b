//! In-process scripted runner
//!
//! Records every request and answers from a list of scripted failures,
//! passing everything else. Backs `run --dry-run` and the executor tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{ExecutionResult, Message, MessageKind, Runner, RunnerError, RunnerFactory};

type Matcher = Box<dyn Fn(&Message) -> bool + Send + Sync>;

struct Rule {
    matcher: Matcher,
    result: ExecutionResult,
}

/// Runner answering from scripted rules
pub struct ScriptedRunner {
    rules: Vec<Rule>,
    messages: Mutex<Vec<Message>>,
    multithreaded: bool,
    alive: AtomicBool,
    step_time: u64,
    kills: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            messages: Mutex::new(Vec::new()),
            multithreaded: false,
            alive: AtomicBool::new(true),
            step_time: 0,
            kills: AtomicUsize::new(0),
        }
    }

    pub fn multithreaded(mut self) -> Self {
        self.multithreaded = true;
        self
    }

    /// Time reported for every passing request
    pub fn with_step_time(mut self, millis: u64) -> Self {
        self.step_time = millis;
        self
    }

    /// Answer matching requests with `result`; first matching rule wins
    pub fn fail_when<F>(mut self, matcher: F, result: ExecutionResult) -> Self
    where
        F: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        self.rules.push(Rule {
            matcher: Box::new(matcher),
            result,
        });
        self
    }

    /// Fail `execute_step` for steps whose parsed text equals `parsed_text`
    pub fn fail_step(self, parsed_text: &str) -> Self {
        let text = parsed_text.to_string();
        let result = ExecutionResult::failure(format!("Step failed: {parsed_text}"));
        self.fail_when(move |m| is_step(m, &text), result)
    }

    /// Same as `fail_step` but the failure lets sibling steps continue
    pub fn fail_step_recoverable(self, parsed_text: &str) -> Self {
        let text = parsed_text.to_string();
        let result = ExecutionResult::failure(format!("Step failed: {parsed_text}")).recoverable();
        self.fail_when(move |m| is_step(m, &text), result)
    }

    /// Fail every request of the given kind, e.g. `"execution_starting"`
    pub fn fail_on(self, kind: &'static str) -> Self {
        let result = ExecutionResult::failure(format!("{kind} failed"));
        self.fail_when(move |m| m.name() == kind, result)
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Number of recorded requests of the given kind
    pub fn count(&self, kind: &str) -> usize {
        self.messages().iter().filter(|m| m.name() == kind).count()
    }

    /// Actual text of every executed step, in order
    pub fn executed_steps(&self) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter_map(|m| match m.kind {
                MessageKind::ExecuteStep(step) => Some(step.actual_text),
                _ => None,
            })
            .collect()
    }

    pub fn kill_count(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    /// Simulate the runner process dying
    pub fn crash(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    fn record(&self, message: &Message) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message.clone());
        }
    }
}

impl Default for ScriptedRunner {
    fn default() -> Self {
        Self::new()
    }
}

fn is_step(message: &Message, parsed_text: &str) -> bool {
    matches!(&message.kind, MessageKind::ExecuteStep(step) if step.parsed_text == parsed_text)
}

#[async_trait]
impl Runner for ScriptedRunner {
    async fn execute_and_get_status(&self, message: Message) -> ExecutionResult {
        if !self.is_alive() {
            return ExecutionResult::failure("Runner is not alive");
        }
        self.record(&message);

        match self.rules.iter().find(|rule| (rule.matcher)(&message)) {
            Some(rule) => {
                let mut result = rule.result.clone();
                if result.execution_time == 0 {
                    result.execution_time = self.step_time;
                }
                result
            }
            None => ExecutionResult::passed(self.step_time),
        }
    }

    async fn kill(&self) -> Result<(), RunnerError> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_multithreaded(&self) -> bool {
        self.multithreaded
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

type Builder = Box<dyn Fn(usize) -> ScriptedRunner + Send + Sync>;

/// Factory handing out scripted runners and keeping them for inspection
pub struct ScriptedRunnerFactory {
    build: Builder,
    failing_streams: Vec<usize>,
    started: Mutex<Vec<(usize, Arc<ScriptedRunner>)>>,
}

impl ScriptedRunnerFactory {
    pub fn new<F>(build: F) -> Self
    where
        F: Fn(usize) -> ScriptedRunner + Send + Sync + 'static,
    {
        Self {
            build: Box::new(build),
            failing_streams: Vec::new(),
            started: Mutex::new(Vec::new()),
        }
    }

    /// Refuse to start a runner for `stream`
    pub fn fail_stream(mut self, stream: usize) -> Self {
        self.failing_streams.push(stream);
        self
    }

    /// Started runners ordered by stream
    pub fn runners(&self) -> Vec<Arc<ScriptedRunner>> {
        let mut started = self
            .started
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default();
        started.sort_by_key(|(stream, _)| *stream);
        started.into_iter().map(|(_, runner)| runner).collect()
    }

    /// Requests of one kind across every started runner
    pub fn total(&self, kind: &str) -> usize {
        self.runners().iter().map(|r| r.count(kind)).sum()
    }
}

impl Default for ScriptedRunnerFactory {
    fn default() -> Self {
        Self::new(|_| ScriptedRunner::new())
    }
}

#[async_trait]
impl RunnerFactory for ScriptedRunnerFactory {
    async fn start(&self, stream: usize) -> Result<Arc<dyn Runner>, RunnerError> {
        if self.failing_streams.contains(&stream) {
            return Err(RunnerError::Handshake(format!(
                "runner for stream {stream} refused to start"
            )));
        }
        let runner = Arc::new((self.build)(stream));
        if let Ok(mut started) = self.started.lock() {
            started.push((stream, runner.clone()));
        }
        Ok(runner as Arc<dyn Runner>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::StepInfo;

    fn step(text: &str) -> Message {
        Message::new(
            1,
            MessageKind::ExecuteStep(StepInfo {
                parsed_text: text.to_string(),
                actual_text: text.to_string(),
                ..Default::default()
            }),
        )
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let runner = ScriptedRunner::new()
            .with_step_time(3)
            .fail_step("boom")
            .fail_on("execution_starting");

        assert!(!runner.execute_and_get_status(step("fine")).await.failed);
        let failed = runner.execute_and_get_status(step("boom")).await;
        assert!(failed.failed);
        assert!(!failed.recoverable);
        assert_eq!(failed.execution_time, 3);
        assert!(
            runner
                .execute_and_get_status(Message::new(1, MessageKind::ExecutionStarting))
                .await
                .failed
        );
        assert_eq!(runner.executed_steps(), vec!["fine", "boom"]);
    }

    #[tokio::test]
    async fn test_dead_runner_fails_requests() {
        let runner = ScriptedRunner::new();
        runner.kill().await.unwrap();

        let result = runner.execute_and_get_status(step("any")).await;
        assert!(result.failed);
        assert_eq!(result.error_message, "Runner is not alive");
        assert_eq!(runner.kill_count(), 1);
        assert!(runner.messages().is_empty());
    }

    #[tokio::test]
    async fn test_factory_tracks_runners() {
        let factory = ScriptedRunnerFactory::default().fail_stream(2);
        assert!(factory.start(3).await.is_ok());
        assert!(factory.start(1).await.is_ok());
        assert!(factory.start(2).await.is_err());
        assert_eq!(factory.runners().len(), 2);
    }
}
