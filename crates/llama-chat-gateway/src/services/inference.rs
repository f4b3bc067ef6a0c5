use bytes::Bytes;
use futures::stream::Stream;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::LlmConfig;
use crate::services::session::ASSISTANT_MARKER;

/// How long to wait for stderr to close once the process has exited
const STDERR_GRACE: Duration = Duration::from_secs(2);

/// What one generation ended with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// Extracted assistant text, never empty
    Succeeded(String),
    /// Diagnostic text, usually the process's stderr
    Failed(String),
    /// Process exited cleanly but produced no assistant text
    Empty,
}

impl GenerationOutcome {
    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            GenerationOutcome::Succeeded(_) => "succeeded",
            GenerationOutcome::Failed(_) => "failed",
            GenerationOutcome::Empty => "empty",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InferenceEvent {
    /// Raw bytes for the caller, in the order they were produced
    Chunk(Bytes),
    /// Always the last event of a stream that was consumed to the end
    Done(GenerationOutcome),
}

pub type InferenceStream = Pin<Box<dyn Stream<Item = InferenceEvent> + Send>>;

/// Runs the external generation engine and streams its stdout.
#[derive(Debug, Clone)]
pub struct InferenceStreamer {
    config: LlmConfig,
}

impl InferenceStreamer {
    pub fn new(config: LlmConfig) -> Self {
        Self { config }
    }

    fn command(&self, prompt: &str) -> Command {
        let mut cmd = Command::new(&self.config.cli_path);
        if let Some(model) = &self.config.model_path {
            cmd.arg("-m").arg(model);
        }
        cmd.args(&self.config.extra_args)
            .arg("--prompt")
            .arg(prompt)
            // -1: no limit on generated tokens
            .args(["-n", "-1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own group, so a wrapper script's children can be killed with it
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    /// Start a generation for `prompt`.
    ///
    /// Nothing is spawned until the stream is first polled, and every call
    /// spawns a fresh process in its own group. Dropping the stream before it
    /// ends kills the whole group. On success or failure the final item is
    /// `Done`; a failure is also reported inline as a trailing error notice
    /// chunk.
    pub fn run(&self, prompt: String) -> InferenceStream {
        let mut command = self.command(&prompt);
        let program = self.config.cli_path.display().to_string();
        let read_buffer_bytes = self.config.read_buffer_bytes.max(1);
        let max_generation = self.config.max_generation();

        Box::pin(async_stream::stream! {
            debug!("Spawning {} for a {} byte prompt", program, prompt.len());

            let mut child = match command.spawn() {
                Ok(child) => child,
                Err(e) => {
                    let reason = format!("failed to start {}: {}", program, e);
                    error!("LLM process could not be started: {}", reason);
                    yield InferenceEvent::Chunk(failure_notice(&reason));
                    yield InferenceEvent::Done(GenerationOutcome::Failed(reason));
                    return;
                }
            };

            let mut group = ProcessGroup::of(&child);
            let deadline = max_generation.map(|limit| Instant::now() + limit);

            // Drained on its own task so a chatty stderr can never stall stdout
            let stderr_task = child.stderr.take().map(|mut stderr| {
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let _ = stderr.read_to_end(&mut buf).await;
                    buf
                })
            });

            let mut accumulated: Vec<u8> = Vec::new();
            let mut interrupted: Option<String> = None;

            if let Some(mut stdout) = child.stdout.take() {
                let mut buf = vec![0u8; read_buffer_bytes];
                loop {
                    let read = match deadline {
                        Some(deadline) => {
                            match tokio::time::timeout_at(deadline, stdout.read(&mut buf)).await {
                                Ok(read) => read,
                                Err(_) => {
                                    interrupted = Some(timeout_reason(max_generation));
                                    break;
                                }
                            }
                        }
                        None => stdout.read(&mut buf).await,
                    };

                    match read {
                        Ok(0) => break,
                        Ok(n) => {
                            accumulated.extend_from_slice(&buf[..n]);
                            yield InferenceEvent::Chunk(Bytes::copy_from_slice(&buf[..n]));
                        }
                        Err(e) => {
                            interrupted = Some(format!("failed to read generation output: {}", e));
                            break;
                        }
                    }
                }
            }

            let status = match interrupted {
                Some(reason) => {
                    terminate(&mut child, &mut group).await;
                    Err(reason)
                }
                None => wait_until(&mut child, &mut group, deadline, max_generation).await,
            };
            // Strays left behind by a wrapper script go with the engine
            group.kill();

            let stderr = match stderr_task {
                Some(task) => collect_stderr(task).await,
                None => Vec::new(),
            };

            let outcome = classify(status, &stderr, &accumulated);
            if let GenerationOutcome::Failed(reason) = &outcome {
                yield InferenceEvent::Chunk(failure_notice(reason));
            }
            yield InferenceEvent::Done(outcome);
        })
    }
}

async fn wait_until(
    child: &mut Child,
    group: &mut ProcessGroup,
    deadline: Option<Instant>,
    max_generation: Option<Duration>,
) -> Result<ExitStatus, String> {
    let waited = match deadline {
        Some(deadline) => match tokio::time::timeout_at(deadline, child.wait()).await {
            Ok(waited) => waited,
            Err(_) => {
                terminate(child, group).await;
                return Err(timeout_reason(max_generation));
            }
        },
        None => child.wait().await,
    };
    waited.map_err(|e| format!("failed to wait for generation process: {}", e))
}

async fn terminate(child: &mut Child, group: &mut ProcessGroup) {
    group.kill();
    if let Err(e) = child.kill().await {
        warn!("Failed to kill generation process: {}", e);
    }
}

/// A leftover grandchild can hold stderr open after the engine exits
async fn collect_stderr(mut task: JoinHandle<Vec<u8>>) -> Vec<u8> {
    match tokio::time::timeout(STDERR_GRACE, &mut task).await {
        Ok(joined) => joined.unwrap_or_default(),
        Err(_) => {
            warn!("Generation stderr still open {:?} after exit, discarding it", STDERR_GRACE);
            task.abort();
            Vec::new()
        }
    }
}

/// Process group led by the engine. Killed on drop, which covers a client
/// disconnecting mid-generation.
struct ProcessGroup {
    leader: Option<u32>,
}

impl ProcessGroup {
    fn of(child: &Child) -> Self {
        Self { leader: child.id() }
    }

    /// SIGKILL every process in the group. Only the first call signals.
    fn kill(&mut self) {
        let Some(leader) = self.leader.take() else {
            return;
        };

        #[cfg(unix)]
        {
            // Negative pid addresses the whole group
            let rc = unsafe { libc::kill(-(leader as libc::pid_t), libc::SIGKILL) };
            if rc != 0 {
                debug!(
                    "Process group {} already gone: {}",
                    leader,
                    std::io::Error::last_os_error()
                );
            }
        }
        #[cfg(not(unix))]
        let _ = leader;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

fn timeout_reason(max_generation: Option<Duration>) -> String {
    match max_generation {
        Some(limit) => format!("generation timed out after {}s", limit.as_secs()),
        None => "generation timed out".to_string(),
    }
}

fn classify(status: Result<ExitStatus, String>, stderr: &[u8], stdout: &[u8]) -> GenerationOutcome {
    let status = match status {
        Ok(status) => status,
        Err(reason) => {
            error!("LLM process interrupted: {}", reason);
            return GenerationOutcome::Failed(reason);
        }
    };

    if !status.success() {
        let stderr = String::from_utf8_lossy(stderr).trim().to_string();
        let reason = if stderr.is_empty() {
            format!("process exited with {}", status)
        } else {
            stderr
        };
        error!("LLM process failed ({}): {}", status, reason);
        return GenerationOutcome::Failed(reason);
    }

    let output = String::from_utf8_lossy(stdout);
    let assistant = extract_assistant_text(&output);
    if assistant.is_empty() {
        return GenerationOutcome::Empty;
    }

    info!("LLM process finished, {} bytes of output", stdout.len());
    GenerationOutcome::Succeeded(assistant.to_string())
}

/// Text after the last assistant marker, trimmed. The engine echoes the
/// prompt, so anything before it is context rather than new output.
pub fn extract_assistant_text(output: &str) -> &str {
    output
        .rsplit(ASSISTANT_MARKER)
        .next()
        .unwrap_or(output)
        .trim()
}

fn failure_notice(reason: &str) -> Bytes {
    Bytes::from(format!(
        "\n\n[ERROR] Model execution failed. Details:\n{}\n",
        reason
    ))
}
