//! Execution engine
//!
//! Spec, scenario and step state machines driven over a runner, plus the
//! serial and parallel schedulers that feed them.

#![allow(dead_code)]

mod collection;
mod hooks;
mod parallel;
mod scenario;
mod simple;
mod spec;
mod step;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::RunConfig;
use crate::events::EventBus;
use crate::models::BuildErrors;
use crate::resolve::{ConceptDictionary, ResolveError, SpecialResolver, StepResolver};
use crate::runner::Runner;

pub use collection::{
    distribute, expand_data_table_specs, filter_by_tags, scenario_instance_count,
    LazyScenarioCollection, ScenarioInstance, ScenarioUnit, SpecCollection, SpecInstance,
};
pub use parallel::ParallelExecution;
pub use simple::SimpleExecution;
pub use spec::SpecExecutor;

/// Failures that abort a run instead of being reported
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("Stream {stream} stopped unexpectedly: {message}")]
    StreamPanicked { stream: usize, message: String },
}

/// Read-only state shared by every stream of a run
#[derive(Clone)]
pub struct ExecutionContext {
    pub config: Arc<RunConfig>,
    pub dictionary: Arc<ConceptDictionary>,
    pub build_errors: Arc<BuildErrors>,
    pub special: Arc<SpecialResolver>,
    pub events: EventBus,
    pub kill_switch: KillSwitch,
}

impl ExecutionContext {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config: Arc::new(config),
            dictionary: Arc::new(ConceptDictionary::default()),
            build_errors: Arc::new(BuildErrors::new()),
            special: Arc::new(SpecialResolver::default()),
            events: EventBus::disabled(),
            kill_switch: KillSwitch::new(),
        }
    }

    pub fn with_dictionary(mut self, dictionary: ConceptDictionary) -> Self {
        self.dictionary = Arc::new(dictionary);
        self
    }

    pub fn with_build_errors(mut self, errors: BuildErrors) -> Self {
        self.build_errors = Arc::new(errors);
        self
    }

    pub fn with_special(mut self, special: SpecialResolver) -> Self {
        self.special = Arc::new(special);
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_kill_switch(mut self, kill_switch: KillSwitch) -> Self {
        self.kill_switch = kill_switch;
        self
    }

    pub fn resolver(&self) -> StepResolver<'_> {
        StepResolver::new(&self.dictionary, &self.build_errors, &self.special)
    }
}

/// Kills every registered runner on demand
///
/// Cloned into the Ctrl-C handler; the scheduler registers runners as it
/// starts them.
#[derive(Clone, Default)]
pub struct KillSwitch {
    triggered: Arc<AtomicBool>,
    runners: Arc<Mutex<Vec<Arc<dyn Runner>>>>,
}

impl KillSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, runner: Arc<dyn Runner>) {
        if let Ok(mut runners) = self.runners.lock() {
            runners.push(runner);
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Kill all registered runners, each bounded by `timeout`
    pub async fn trigger(&self, timeout: Duration) {
        self.triggered.store(true, Ordering::SeqCst);
        let runners = self
            .runners
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default();

        info!("Killing {} runner(s)", runners.len());
        for runner in runners {
            kill_runner(runner.as_ref(), timeout).await;
        }
    }
}

/// Kill one runner without letting a stuck process hang the run
pub(crate) async fn kill_runner(runner: &dyn Runner, timeout: Duration) {
    match tokio::time::timeout(timeout, runner.kill()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Failed to kill runner: {}", e),
        Err(_) => warn!("Runner did not terminate within {:?}", timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ScriptedRunner;

    #[tokio::test]
    async fn test_kill_switch_kills_registered_runners() {
        let first = Arc::new(ScriptedRunner::new());
        let second = Arc::new(ScriptedRunner::new());
        let switch = KillSwitch::new();
        switch.register(first.clone());
        switch.register(second.clone());

        assert!(!switch.is_triggered());
        switch.trigger(Duration::from_secs(1)).await;

        assert!(switch.is_triggered());
        assert!(!first.is_alive());
        assert_eq!(second.kill_count(), 1);
    }
}
