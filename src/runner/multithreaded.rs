//! Multiplexed runner channels
//!
//! One multithreaded runner process serves every stream. Each stream gets a
//! channel that stamps its stream id on outgoing requests; killing a channel
//! leaves the shared runner to its owner.

use async_trait::async_trait;
use std::sync::Arc;

use super::{ExecutionResult, Message, Runner, RunnerError};

/// Logical per-stream view of a shared multithreaded runner
pub struct MultiplexedChannel {
    inner: Arc<dyn Runner>,
    stream: usize,
}

impl MultiplexedChannel {
    pub fn new(inner: Arc<dyn Runner>, stream: usize) -> Self {
        Self { inner, stream }
    }

    pub fn stream(&self) -> usize {
        self.stream
    }
}

#[async_trait]
impl Runner for MultiplexedChannel {
    async fn execute_and_get_status(&self, mut message: Message) -> ExecutionResult {
        message.stream = self.stream;
        self.inner.execute_and_get_status(message).await
    }

    async fn kill(&self) -> Result<(), RunnerError> {
        Ok(())
    }

    fn is_multithreaded(&self) -> bool {
        true
    }

    fn is_alive(&self) -> bool {
        self.inner.is_alive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{MessageKind, ScriptedRunner};

    #[tokio::test]
    async fn test_channel_stamps_stream_and_shares_runner() {
        let shared = Arc::new(ScriptedRunner::new().multithreaded());
        let first = MultiplexedChannel::new(shared.clone(), 1);
        let second = MultiplexedChannel::new(shared.clone(), 2);

        first
            .execute_and_get_status(Message::new(0, MessageKind::SuiteDataStoreInit))
            .await;
        second
            .execute_and_get_status(Message::new(0, MessageKind::SuiteDataStoreInit))
            .await;

        let streams: Vec<_> = shared.messages().iter().map(|m| m.stream).collect();
        assert_eq!(streams, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_channel_kill_keeps_runner_alive() {
        let shared = Arc::new(ScriptedRunner::new().multithreaded());
        let channel = MultiplexedChannel::new(shared.clone(), 3);

        channel.kill().await.unwrap();
        assert!(channel.is_alive());
        assert!(channel.is_multithreaded());
    }
}
