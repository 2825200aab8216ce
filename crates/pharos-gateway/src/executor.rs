//! Sandboxed session executor
//!
//! Runs validated scripts inside bounded-lifetime sessions keyed by
//! conversation id. Sessions are created lazily on first execution, reused
//! so session-local state (shell variables, cwd) persists across turns, and
//! destroyed on explicit termination or timeout. The executor revalidates
//! every script itself; a caller-supplied "already validated" claim is
//! never trusted.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::safety::{ScriptSafetyGate, ValidationOutcome};

/// Maximum captured output before truncation
const MAX_CAPTURE_BYTES: usize = 100_000; // 100KB
/// Marker appended when output is cut
const TRUNCATION_MARKER: &str = "\n... (output truncated)";
/// Deadline for the interpreter reachability probe
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// A request to run one script
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub script: String,
    /// Session to run under; generated when absent
    pub session_id: Option<String>,
    /// Wall-clock bound override for this run
    pub timeout: Option<Duration>,
}

impl ExecutionRequest {
    /// Build a request targeting a specific session
    pub fn in_session(script: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            session_id: Some(session_id.into()),
            timeout: None,
        }
    }
}

/// Outcome of one script run; produced exactly once per request
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    /// Captured output, truncated with a marker when oversized
    pub output: String,
    /// Actual elapsed wall-clock time, timeouts included
    pub duration_ms: u64,
    /// Session the script ran under
    pub session_id: String,
    pub validation: ValidationOutcome,
}

/// What a backend run produced
#[derive(Debug)]
pub struct RunOutput {
    pub output: String,
    pub exit_code: i32,
    /// Set when the backend stopped capturing at its byte cap
    pub truncated: bool,
}

/// Backend-level run failures
#[derive(ThisError, Debug)]
pub enum RunError {
    #[error("script timed out")]
    Timeout { partial: String },
    #[error("session interpreter exited")]
    Closed { partial: String },
    #[error("session I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// One live execution context
#[async_trait]
pub trait ScriptSession: Send {
    /// Run a script to completion or the deadline, whichever comes first
    async fn run(&mut self, script: &str, timeout: Duration)
    -> std::result::Result<RunOutput, RunError>;

    /// Tear down the underlying process; must be idempotent
    async fn close(&mut self);
}

/// Factory for execution sessions; the seam a stub backend plugs into
#[async_trait]
pub trait ScriptBackend: Send + Sync {
    /// Open a fresh session
    async fn open(&self) -> Result<Box<dyn ScriptSession>>;

    /// Verify the runtime dependency is reachable without creating a
    /// persistent session
    async fn health(&self) -> Result<()>;
}

/// Default backend: one persistent POSIX-shell child process per session,
/// driven over piped stdio with a sentinel protocol.
pub struct ShellBackend {
    interpreter: String,
}

impl ShellBackend {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }
}

impl Default for ShellBackend {
    fn default() -> Self {
        Self::new("sh")
    }
}

#[async_trait]
impl ScriptBackend for ShellBackend {
    async fn open(&self) -> Result<Box<dyn ScriptSession>> {
        let mut child = Command::new(&self.interpreter)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdin = child.stdin.take().expect("stdin was piped");
        let stdout = child.stdout.take().expect("stdout was piped");

        // Fold stderr into the captured stream for the whole session.
        stdin.write_all(b"exec 2>&1\n").await?;
        stdin.flush().await?;

        Ok(Box::new(ShellSession {
            child: Some(child),
            stdin,
            stdout: BufReader::new(stdout).lines(),
        }))
    }

    async fn health(&self) -> Result<()> {
        let probe = Command::new(&self.interpreter)
            .arg("-c")
            .arg("exit 0")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        let status = tokio::time::timeout(HEALTH_PROBE_TIMEOUT, probe)
            .await
            .map_err(|_| Error::Execution("interpreter probe timed out".to_string()))??;

        if status.success() {
            Ok(())
        } else {
            Err(Error::Execution(format!(
                "interpreter '{}' probe exited with {}",
                self.interpreter, status
            )))
        }
    }
}

struct ShellSession {
    child: Option<Child>,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

#[async_trait]
impl ScriptSession for ShellSession {
    async fn run(
        &mut self,
        script: &str,
        timeout: Duration,
    ) -> std::result::Result<RunOutput, RunError> {
        let sentinel = format!("__PHAROS_DONE_{}__", Uuid::new_v4().simple());
        let payload = format!("{}\necho {} $?\n", script.trim_end(), sentinel);
        self.stdin.write_all(payload.as_bytes()).await?;
        self.stdin.flush().await?;

        let mut output = String::new();
        let mut truncated = false;
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    self.close().await;
                    return Err(RunError::Timeout { partial: output });
                }
                line = self.stdout.next_line() => match line {
                    Ok(Some(line)) => {
                        // Output without a trailing newline lands on the
                        // sentinel's line, so scan rather than prefix-match.
                        if let Some(at) = line.find(sentinel.as_str()) {
                            if at > 0 && !truncated {
                                if !output.is_empty() {
                                    output.push('\n');
                                }
                                output.push_str(&line[..at]);
                            }
                            let rest = &line[at + sentinel.len()..];
                            let exit_code = rest.trim().parse().unwrap_or(-1);
                            return Ok(RunOutput {
                                output,
                                exit_code,
                                truncated,
                            });
                        }
                        if truncated || output.len() + line.len() > MAX_CAPTURE_BYTES {
                            truncated = true;
                            continue;
                        }
                        if !output.is_empty() {
                            output.push('\n');
                        }
                        output.push_str(&line);
                    }
                    Ok(None) => {
                        self.close().await;
                        return Err(RunError::Closed { partial: output });
                    }
                    Err(e) => {
                        self.close().await;
                        return Err(RunError::Io(e));
                    }
                },
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
        }
    }
}

/// Executor configuration
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Wall-clock bound applied when a request carries none
    pub default_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
        }
    }
}

/// Owns per-conversation execution sessions and never bypasses the gate
pub struct SessionExecutor {
    gate: ScriptSafetyGate,
    backend: Arc<dyn ScriptBackend>,
    config: ExecutorConfig,
    sessions: Mutex<HashMap<String, Arc<Mutex<Box<dyn ScriptSession>>>>>,
}

impl SessionExecutor {
    pub fn new(backend: Arc<dyn ScriptBackend>, config: ExecutorConfig) -> Self {
        Self {
            gate: ScriptSafetyGate::default(),
            backend,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Validate and run one script, creating the session if needed.
    ///
    /// Returns `Err(Error::Validation)` when the gate rejects the script;
    /// runtime failures (including timeouts) come back as unsuccessful
    /// results, with the session torn down so no process leaks.
    pub async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        // Defense in depth: revalidate no matter what the caller claims.
        let validation = self.gate.validate(&request.script);
        if !validation.valid {
            return Err(Error::Validation(validation));
        }

        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let session = self.session(&session_id).await?;
        let timeout = request.timeout.unwrap_or(self.config.default_timeout);

        let started = std::time::Instant::now();
        let run = {
            let mut session = session.lock().await;
            session.run(&request.script, timeout).await
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let result = match run {
            Ok(out) => {
                let mut output = out.output;
                if out.truncated {
                    output.push_str(TRUNCATION_MARKER);
                }
                ExecutionResult {
                    success: out.exit_code == 0,
                    output,
                    duration_ms,
                    session_id: session_id.clone(),
                    validation,
                }
            }
            Err(RunError::Timeout { partial }) => {
                // The session's process is already gone; drop the entry too.
                self.terminate_session(&session_id).await;
                let mut output = partial;
                if !output.is_empty() {
                    output.push('\n');
                }
                output.push_str(&format!("script timed out after {:?}", timeout));
                ExecutionResult {
                    success: false,
                    output,
                    duration_ms,
                    session_id: session_id.clone(),
                    validation,
                }
            }
            Err(RunError::Closed { partial }) => {
                self.terminate_session(&session_id).await;
                let mut output = partial;
                if !output.is_empty() {
                    output.push('\n');
                }
                output.push_str("session interpreter exited");
                ExecutionResult {
                    success: false,
                    output,
                    duration_ms,
                    session_id: session_id.clone(),
                    validation,
                }
            }
            Err(RunError::Io(e)) => {
                self.terminate_session(&session_id).await;
                ExecutionResult {
                    success: false,
                    output: format!("session I/O failed: {}", e),
                    duration_ms,
                    session_id: session_id.clone(),
                    validation,
                }
            }
        };

        tracing::debug!(
            session = %session_id,
            success = result.success,
            duration_ms = result.duration_ms,
            "script executed"
        );
        Ok(result)
    }

    /// Get or lazily create the session with this id
    async fn session(&self, id: &str) -> Result<Arc<Mutex<Box<dyn ScriptSession>>>> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(id) {
            return Ok(session.clone());
        }
        let session = Arc::new(Mutex::new(self.backend.open().await?));
        sessions.insert(id.to_string(), session.clone());
        Ok(session)
    }

    /// Tear down a session deterministically; calling twice is a no-op
    pub async fn terminate_session(&self, id: &str) {
        let removed = self.sessions.lock().await.remove(id);
        if let Some(session) = removed {
            session.lock().await.close().await;
            tracing::debug!(session = %id, "session terminated");
        }
    }

    /// Ids of currently live sessions
    pub async fn active_sessions(&self) -> Vec<String> {
        self.sessions.lock().await.keys().cloned().collect()
    }

    /// Probe the executor's runtime dependency
    pub async fn health_check(&self) -> Result<()> {
        self.backend.health().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// A backend whose sessions echo a canned reply and count activity.
    struct StubBackend {
        reply: String,
        /// Sessions report their output as cut at the capture cap
        truncate: bool,
        opens: AtomicU32,
    }

    impl StubBackend {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                truncate: false,
                opens: AtomicU32::new(0),
            })
        }

        fn truncating(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                truncate: true,
                opens: AtomicU32::new(0),
            })
        }
    }

    struct StubSession {
        reply: String,
        truncate: bool,
    }

    #[async_trait]
    impl ScriptBackend for StubBackend {
        async fn open(&self) -> Result<Box<dyn ScriptSession>> {
            self.opens.fetch_add(1, Ordering::Relaxed);
            Ok(Box::new(StubSession {
                reply: self.reply.clone(),
                truncate: self.truncate,
            }))
        }

        async fn health(&self) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl ScriptSession for StubSession {
        async fn run(
            &mut self,
            _script: &str,
            _timeout: Duration,
        ) -> std::result::Result<RunOutput, RunError> {
            Ok(RunOutput {
                output: self.reply.clone(),
                exit_code: 0,
                truncated: self.truncate,
            })
        }

        async fn close(&mut self) {}
    }

    fn executor_with(backend: Arc<dyn ScriptBackend>) -> SessionExecutor {
        SessionExecutor::new(backend, ExecutorConfig::default())
    }

    #[tokio::test]
    async fn test_stub_backend_round_trip() {
        let executor = executor_with(StubBackend::new("Hello, World!"));
        let result = executor
            .execute(&ExecutionRequest::in_session("ph-file read test.txt", "conv-1"))
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.output.contains("Hello, World!"));
        assert_eq!(result.session_id, "conv-1");
        assert!(result.validation.valid);
        assert_eq!(result.validation.detected_commands, vec!["ph-file"]);
    }

    #[tokio::test]
    async fn test_truncated_output_carries_marker() {
        let executor = executor_with(StubBackend::truncating("partial capture"));
        let result = executor
            .execute(&ExecutionRequest::in_session("echo hi", "conv-1"))
            .await
            .unwrap();
        assert!(result.success);
        assert!(
            result.output.ends_with(TRUNCATION_MARKER),
            "output: {}",
            result.output
        );
        assert!(result.output.starts_with("partial capture"));
    }

    #[tokio::test]
    async fn test_dangerous_script_never_reaches_backend() {
        let backend = StubBackend::new("unreachable");
        let executor = executor_with(backend.clone());
        let err = executor
            .execute(&ExecutionRequest::in_session("rm -rf /", "conv-1"))
            .await
            .unwrap_err();
        match err {
            Error::Validation(outcome) => {
                assert!(!outcome.valid);
                assert_eq!(outcome.safety_level, crate::safety::SafetyLevel::Dangerous);
            }
            other => panic!("expected validation failure, got {:?}", other),
        }
        assert_eq!(backend.opens.load(Ordering::Relaxed), 0, "no session opened");
    }

    #[tokio::test]
    async fn test_session_reused_within_conversation() {
        let backend = StubBackend::new("ok");
        let executor = executor_with(backend.clone());
        for _ in 0..3 {
            executor
                .execute(&ExecutionRequest::in_session("echo hi", "conv-7"))
                .await
                .unwrap();
        }
        assert_eq!(backend.opens.load(Ordering::Relaxed), 1, "one session for one conversation");

        executor
            .execute(&ExecutionRequest::in_session("echo hi", "conv-8"))
            .await
            .unwrap();
        assert_eq!(backend.opens.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_generated_session_id_when_absent() {
        let executor = executor_with(StubBackend::new("ok"));
        let result = executor
            .execute(&ExecutionRequest {
                script: "echo hi".to_string(),
                session_id: None,
                timeout: None,
            })
            .await
            .unwrap();
        assert!(!result.session_id.is_empty());
    }

    #[tokio::test]
    async fn test_terminate_session_idempotent() {
        let executor = executor_with(StubBackend::new("ok"));
        executor
            .execute(&ExecutionRequest::in_session("echo hi", "conv-9"))
            .await
            .unwrap();
        assert_eq!(executor.active_sessions().await, vec!["conv-9"]);

        executor.terminate_session("conv-9").await;
        executor.terminate_session("conv-9").await;
        assert!(executor.active_sessions().await.is_empty());
    }

    // --- real shell sessions ---

    #[tokio::test]
    async fn test_shell_echo() {
        let executor = executor_with(Arc::new(ShellBackend::default()));
        let result = executor
            .execute(&ExecutionRequest::in_session("echo hello world", "sh-1"))
            .await
            .unwrap();
        assert!(result.success, "output: {}", result.output);
        assert!(result.output.contains("hello world"));
        executor.terminate_session("sh-1").await;
    }

    #[tokio::test]
    async fn test_shell_state_persists_across_runs() {
        let executor = executor_with(Arc::new(ShellBackend::default()));
        executor
            .execute(&ExecutionRequest::in_session("GREETING=salut", "sh-2"))
            .await
            .unwrap();
        let result = executor
            .execute(&ExecutionRequest::in_session("echo $GREETING", "sh-2"))
            .await
            .unwrap();
        assert!(result.output.contains("salut"), "output: {}", result.output);
        executor.terminate_session("sh-2").await;
    }

    #[tokio::test]
    async fn test_shell_nonzero_exit_reported() {
        let executor = executor_with(Arc::new(ShellBackend::default()));
        let result = executor
            .execute(&ExecutionRequest::in_session("false", "sh-3"))
            .await
            .unwrap();
        assert!(!result.success);
        executor.terminate_session("sh-3").await;
    }

    #[tokio::test]
    async fn test_shell_timeout_kills_and_reports_elapsed() {
        let executor = executor_with(Arc::new(ShellBackend::default()));
        let request = ExecutionRequest {
            script: "echo before; sleep 30".to_string(),
            session_id: Some("sh-4".to_string()),
            timeout: Some(Duration::from_millis(300)),
        };
        let result = executor.execute(&request).await.unwrap();
        assert!(!result.success);
        assert!(result.output.contains("timed out"), "output: {}", result.output);
        assert!(result.output.contains("before"), "partial output kept: {}", result.output);
        assert!(result.duration_ms >= 300);
        // The session was torn down rather than leaked.
        assert!(executor.active_sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_shell_health_check() {
        let executor = executor_with(Arc::new(ShellBackend::default()));
        executor.health_check().await.unwrap();
        assert!(executor.active_sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_interpreter_health_fails() {
        let backend = ShellBackend::new("definitely-not-a-real-shell");
        assert!(backend.health().await.is_err());
    }
}
