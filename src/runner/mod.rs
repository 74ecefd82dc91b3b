//! Runner protocol
//!
//! A runner executes step implementations and hooks on request. Streams
//! talk to runners only through the `Runner` trait; the scheduler picks the
//! topology (one process per stream, or one multithreaded process shared
//! through multiplexed channels) when it starts.

#![allow(dead_code)]

mod message;
mod multithreaded;
mod process;
mod scripted;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use message::{ExecutionResult, Message, MessageKind, ScenarioInfo, SpecInfo, StepInfo};
pub use multithreaded::MultiplexedChannel;
pub use process::{ProcessRunner, ProcessRunnerFactory};
pub use scripted::{ScriptedRunner, ScriptedRunnerFactory};

/// Runner failures outside the request/response exchange itself
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Failed to start runner '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Runner handshake failed: {0}")]
    Handshake(String),

    #[error("Runner did not respond within {0:?}")]
    Timeout(Duration),

    #[error("Runner connection error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid runner response: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("Runner is not alive")]
    NotAlive,
}

/// Connection to something that executes steps
#[async_trait]
pub trait Runner: Send + Sync {
    /// Send one request and wait for its result
    ///
    /// Transport failures are reported as a failed `ExecutionResult`, never
    /// as an error, so callers always get a result to record.
    async fn execute_and_get_status(&self, message: Message) -> ExecutionResult;

    /// Terminate the runner, bounded by its kill timeout
    async fn kill(&self) -> Result<(), RunnerError>;

    /// Whether one runner can serve several streams concurrently
    fn is_multithreaded(&self) -> bool;

    fn is_alive(&self) -> bool;
}

/// Stand-in for a runner that never started
///
/// Lets skipped results be produced through the normal executors; every
/// request fails and the runner reports itself dead.
pub struct Disconnected;

#[async_trait]
impl Runner for Disconnected {
    async fn execute_and_get_status(&self, _message: Message) -> ExecutionResult {
        ExecutionResult::failure(RunnerError::NotAlive.to_string())
    }

    async fn kill(&self) -> Result<(), RunnerError> {
        Ok(())
    }

    fn is_multithreaded(&self) -> bool {
        false
    }

    fn is_alive(&self) -> bool {
        false
    }
}

/// Starts one runner per stream
#[async_trait]
pub trait RunnerFactory: Send + Sync {
    async fn start(&self, stream: usize) -> Result<Arc<dyn Runner>, RunnerError>;
}
