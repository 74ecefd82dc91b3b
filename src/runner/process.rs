//! Out-of-process runner
//!
//! Spawns the runner command and exchanges one JSON document per line over
//! its stdin/stdout. The runner announces itself with a handshake line
//! `{"ready": true, "multithreaded": <bool>}` before the first request.
//!
//! Every request carries an `id` which the runner echoes on its reply, so
//! several streams can have requests in flight on one process. A reply
//! without an `id` answers the oldest outstanding request.

#![allow(dead_code)]

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use super::{ExecutionResult, Message, MessageKind, Runner, RunnerError, RunnerFactory};

/// Environment variable telling the runner which stream it serves
pub const STREAM_ENV: &str = "STEPWISE_STREAM";

#[derive(Debug, Deserialize)]
struct Handshake {
    ready: bool,
    #[serde(default)]
    multithreaded: bool,
}

/// Request line on the wire
#[derive(Serialize)]
struct Request<'a> {
    id: u64,
    #[serde(flatten)]
    message: &'a Message,
}

/// Reply line on the wire
#[derive(Deserialize)]
struct Reply {
    #[serde(default)]
    id: Option<u64>,
    #[serde(flatten)]
    result: ExecutionResult,
}

/// Outstanding requests waiting for their reply
type Pending = Arc<StdMutex<BTreeMap<u64, oneshot::Sender<ExecutionResult>>>>;

/// Runner process speaking JSON lines
pub struct ProcessRunner {
    stream: usize,
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    pending: Pending,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
    multithreaded: bool,
    alive: Arc<AtomicBool>,
    request_timeout: Duration,
    kill_timeout: Duration,
}

impl ProcessRunner {
    pub fn stream(&self) -> usize {
        self.stream
    }

    async fn exchange(&self, message: &Message) -> Result<ExecutionResult, RunnerError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut line = serde_json::to_string(&Request { id, message })?;
        line.push('\n');

        let (tx, rx) = oneshot::channel();
        match self.pending.lock() {
            Ok(mut pending) => {
                pending.insert(id, tx);
            }
            Err(_) => return Err(RunnerError::NotAlive),
        }

        if let Err(e) = self.send(&line).await {
            self.forget(id);
            return Err(e);
        }

        match timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(RunnerError::NotAlive),
            Err(_) => {
                self.forget(id);
                Err(RunnerError::Timeout(self.request_timeout))
            }
        }
    }

    /// Write one line; the lock is held only for the write
    async fn send(&self, line: &str) -> Result<(), RunnerError> {
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    fn forget(&self, id: u64) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&id);
        }
    }

    /// Ask the runner to exit, unless a writer is busy on stdin
    async fn say_goodbye(&self, deadline: Instant) {
        let Ok(mut stdin) = self.stdin.try_lock() else {
            debug!("Runner stdin for stream {} busy, skipping goodbye", self.stream);
            return;
        };
        let goodbye = Message::new(self.stream, MessageKind::KillProcess);
        let request = Request {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            message: &goodbye,
        };
        let Ok(mut line) = serde_json::to_string(&request) else {
            return;
        };
        line.push('\n');
        let write = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        };
        if let Ok(Err(e)) = timeout_at(deadline, write).await {
            debug!("Could not send goodbye to stream {} runner: {}", self.stream, e);
        }
    }
}

/// Hand each reply line to the request waiting for it
fn spawn_reader(
    stream: usize,
    stdout: BufReader<ChildStdout>,
    pending: Pending,
    alive: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = stdout.lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => match serde_json::from_str::<Reply>(line.trim()) {
                    Ok(reply) => deliver(&pending, reply),
                    Err(e) => warn!("Stream {} runner sent an invalid reply: {}", stream, e),
                },
                Ok(None) => break,
                Err(e) => {
                    warn!("Lost output of stream {} runner: {}", stream, e);
                    break;
                }
            }
        }
        debug!("Runner for stream {} closed its output", stream);
        alive.store(false, Ordering::SeqCst);
        close_pending(&pending);
    })
}

fn deliver(pending: &Pending, reply: Reply) {
    let Ok(mut pending) = pending.lock() else {
        return;
    };
    let id = reply.id.or_else(|| pending.keys().next().copied());
    match id.and_then(|id| pending.remove(&id)) {
        Some(waiter) => {
            let _ = waiter.send(reply.result);
        }
        None => warn!("Dropping runner reply for unknown request {:?}", reply.id),
    }
}

/// Fail every outstanding request
fn close_pending(pending: &Pending) {
    if let Ok(mut pending) = pending.lock() {
        pending.clear();
    }
}

#[async_trait]
impl Runner for ProcessRunner {
    async fn execute_and_get_status(&self, message: Message) -> ExecutionResult {
        if !self.is_alive() {
            return ExecutionResult::failure(RunnerError::NotAlive.to_string());
        }
        match self.exchange(&message).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Stream {} lost its runner during {}: {}", self.stream, message.name(), e);
                self.alive.store(false, Ordering::SeqCst);
                ExecutionResult::failure(e.to_string())
            }
        }
    }

    /// Goodbye, then a grace period, then a hard kill
    ///
    /// The hard kill happens within half the kill timeout, so a caller
    /// bounding this call by the same timeout always reaches it.
    async fn kill(&self) -> Result<(), RunnerError> {
        let deadline = Instant::now() + self.kill_timeout / 2;
        if self.alive.swap(false, Ordering::SeqCst) {
            self.say_goodbye(deadline).await;
        }
        close_pending(&self.pending);

        let mut child = self.child.lock().await;
        match timeout_at(deadline, child.wait()).await {
            Ok(status) => {
                debug!("Runner for stream {} exited: {:?}", self.stream, status?);
            }
            Err(_) => {
                warn!(
                    "Runner for stream {} did not exit within {:?}, killing it",
                    self.stream,
                    self.kill_timeout / 2
                );
                child.start_kill()?;
                let _ = timeout(self.kill_timeout / 2, child.wait()).await;
            }
        }
        self.reader.abort();
        Ok(())
    }

    fn is_multithreaded(&self) -> bool {
        self.multithreaded
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

/// Spawns one runner process per stream
#[derive(Clone, Debug)]
pub struct ProcessRunnerFactory {
    command: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    connection_timeout: Duration,
    request_timeout: Duration,
    kill_timeout: Duration,
}

impl ProcessRunnerFactory {
    /// Build from a shell-like command line, split on whitespace
    pub fn new(command_line: &str) -> Self {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        Self {
            command: parts.next().unwrap_or_default(),
            args: parts.collect(),
            working_dir: None,
            connection_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(300),
            kill_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_timeouts(mut self, connection: Duration, request: Duration, kill: Duration) -> Self {
        self.connection_timeout = connection;
        self.request_timeout = request;
        self.kill_timeout = kill;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

#[async_trait]
impl RunnerFactory for ProcessRunnerFactory {
    async fn start(&self, stream: usize) -> Result<Arc<dyn Runner>, RunnerError> {
        let mut command = Command::new(&self.command);
        command
            .args(&self.args)
            .env(STREAM_ENV, stream.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| RunnerError::Spawn {
            command: self.command.clone(),
            source,
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RunnerError::Handshake("runner stdin unavailable".to_string()))?;
        let mut stdout = BufReader::new(
            child
                .stdout
                .take()
                .ok_or_else(|| RunnerError::Handshake("runner stdout unavailable".to_string()))?,
        );

        let mut line = String::new();
        timeout(self.connection_timeout, stdout.read_line(&mut line))
            .await
            .map_err(|_| RunnerError::Timeout(self.connection_timeout))??;
        let handshake: Handshake = serde_json::from_str(line.trim())
            .map_err(|e| RunnerError::Handshake(format!("unexpected greeting {line:?}: {e}")))?;
        if !handshake.ready {
            return Err(RunnerError::Handshake("runner reported not ready".to_string()));
        }

        info!(
            "Started runner '{}' for stream {} (multithreaded: {})",
            self.command, stream, handshake.multithreaded
        );

        let pending: Pending = Arc::default();
        let alive = Arc::new(AtomicBool::new(true));
        let reader = spawn_reader(stream, stdout, pending.clone(), alive.clone());

        Ok(Arc::new(ProcessRunner {
            stream,
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            pending,
            next_id: AtomicU64::new(0),
            reader,
            multithreaded: handshake.multithreaded,
            alive,
            request_timeout: self.request_timeout,
            kill_timeout: self.kill_timeout,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_splits_command_line() {
        let factory = ProcessRunnerFactory::new("python3 -m steps.runner --quiet");
        assert_eq!(factory.command(), "python3");
        assert_eq!(factory.args, vec!["-m", "steps.runner", "--quiet"]);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let factory = ProcessRunnerFactory::new("/nonexistent/stepwise-runner-binary");
        let err = factory.start(1).await.err().unwrap();
        assert!(matches!(err, RunnerError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_handshake_and_exchange_over_stdio() {
        let script = r#"echo '{"ready": true, "multithreaded": false}'; while read line; do echo '{"failed": false, "execution_time": 4}'; done"#;
        let factory = ProcessRunnerFactory::new("sh").with_timeouts(
            Duration::from_secs(5),
            Duration::from_secs(5),
            Duration::from_secs(1),
        );
        let factory = ProcessRunnerFactory {
            args: vec!["-c".to_string(), script.to_string()],
            ..factory
        };

        let runner = factory.start(1).await.unwrap();
        assert!(!runner.is_multithreaded());

        let result = runner
            .execute_and_get_status(Message::new(1, MessageKind::ExecutionStarting))
            .await;
        assert!(!result.failed);
        assert_eq!(result.execution_time, 4);

        runner.kill().await.unwrap();
        assert!(!runner.is_alive());
    }

    #[cfg(unix)]
    fn sh_factory(script: &str, request_timeout: Duration) -> ProcessRunnerFactory {
        ProcessRunnerFactory {
            args: vec!["-c".to_string(), script.to_string()],
            ..ProcessRunnerFactory::new("sh").with_timeouts(
                Duration::from_secs(5),
                request_timeout,
                Duration::from_secs(1),
            )
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kill_ends_request_in_flight() {
        let script = r#"echo '{"ready": true}'; while read line; do :; done"#;
        let runner = sh_factory(script, Duration::from_secs(20))
            .start(1)
            .await
            .unwrap();

        let busy = runner.clone();
        let in_flight = tokio::spawn(async move {
            busy.execute_and_get_status(Message::new(1, MessageKind::ExecutionStarting))
                .await
        });
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = std::time::Instant::now();
        crate::executor::kill_runner(runner.as_ref(), Duration::from_secs(1)).await;
        let result = tokio::time::timeout(Duration::from_secs(2), in_flight)
            .await
            .expect("request still blocked after kill")
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(result.failed);
        assert_eq!(result.error_message, "Runner is not alive");
        assert!(!runner.is_alive());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_concurrent_requests_matched_by_id() {
        // Replies to both requests in reverse order, timing each by its stream
        let script = r#"echo '{"ready": true, "multithreaded": true}'
read a; read b
for l in "$b" "$a"; do
  id=$(echo "$l" | sed 's/.*"id":\([0-9]*\).*/\1/')
  s=$(echo "$l" | sed 's/.*"stream":\([0-9]*\).*/\1/')
  echo "{\"id\": $id, \"execution_time\": $s}"
done
while read l; do :; done"#;
        let runner = sh_factory(script, Duration::from_secs(5))
            .start(1)
            .await
            .unwrap();
        assert!(runner.is_multithreaded());

        let (first, second) = tokio::join!(
            runner.execute_and_get_status(Message::new(1, MessageKind::ExecutionStarting)),
            runner.execute_and_get_status(Message::new(2, MessageKind::ExecutionStarting)),
        );

        assert!(!first.failed, "{}", first.error_message);
        assert!(!second.failed, "{}", second.error_message);
        assert_eq!(first.execution_time, 1);
        assert_eq!(second.execution_time, 2);
        runner.kill().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bad_greeting_rejected() {
        let factory = ProcessRunnerFactory {
            args: vec!["-c".to_string(), "echo hello".to_string()],
            ..ProcessRunnerFactory::new("sh")
        };
        assert!(matches!(
            factory.start(1).await.err().unwrap(),
            RunnerError::Handshake(_)
        ));
    }
}
