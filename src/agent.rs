use crate::agent_sdk::AgentEvent;
use crate::protocol::ChatMessage;
use futures::stream::BoxStream;
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Use the available tools \
when they help answer the user's question, and say so plainly when you cannot find an answer.";

pub const DEFAULT_ALLOWED_TOOLS: &[&str] = &["Skill", "Bash", "Read", "Write", "Grep", "Glob"];

const STDERR_TAIL_LINES: usize = 20;

/// Ordered upstream events for one query. Dropping the stream releases the
/// upstream session.
pub type AgentStream = BoxStream<'static, Result<AgentEvent, AgentError>>;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("failed to start agent runtime `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("agent runtime I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("agent runtime exited with {}{}", describe_code(.code), stderr_suffix(.stderr))]
    Exited { code: Option<i32>, stderr: String },
    #[error("agent run aborted: {0}")]
    Aborted(String),
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "a signal".to_string(),
    }
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

/// Fixed configuration handed to the runtime with every prompt.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub system_prompt: String,
    pub allowed_tools: Vec<String>,
    pub cwd: PathBuf,
}

impl AgentOptions {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            allowed_tools: DEFAULT_ALLOWED_TOOLS
                .iter()
                .map(|tool| tool.to_string())
                .collect(),
            cwd: cwd.into(),
        }
    }
}

/// The external process that reasons and runs tools.
pub trait AgentRuntime: Send + Sync {
    fn query(&self, prompt: String, options: &AgentOptions) -> AgentStream;
}

/// Flatten the conversation into one prompt, one labelled paragraph per turn.
pub fn build_prompt(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|message| format!("{}: {}", message.role.prompt_label(), message.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Runs the agent CLI in streaming JSON mode, one child process per query.
#[derive(Debug, Clone)]
pub struct CommandRuntime {
    program: String,
    extra_args: Vec<String>,
}

impl CommandRuntime {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            extra_args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.extra_args.extend(args);
        self
    }

    fn command(&self, options: &AgentOptions) -> Command {
        let mut command = Command::new(&self.program);
        command.args([
            "-p",
            "--output-format",
            "stream-json",
            "--verbose",
            "--include-partial-messages",
        ]);
        if !options.allowed_tools.is_empty() {
            command
                .arg("--allowedTools")
                .arg(options.allowed_tools.join(","));
        }
        if !options.system_prompt.is_empty() {
            command.arg("--system-prompt").arg(&options.system_prompt);
        }
        command
            .args(&self.extra_args)
            .current_dir(&options.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

impl AgentRuntime for CommandRuntime {
    fn query(&self, prompt: String, options: &AgentOptions) -> AgentStream {
        let command = self.command(options);
        let program = self.program.clone();

        Box::pin(async_stream::stream! {
            let mut process = match AgentProcess::start(command, &program, &prompt).await {
                Ok(process) => process,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };

            loop {
                match process.next_event().await {
                    Ok(Some(event)) => {
                        yield Ok(event);
                    }
                    Ok(None) => break,
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                }
            }

            if let Err(err) = process.finish().await {
                yield Err(err);
            }
        })
    }
}

struct AgentProcess {
    child: Child,
    stdout: BufReader<ChildStdout>,
    line: Vec<u8>,
    stderr: Option<JoinHandle<String>>,
}

impl AgentProcess {
    async fn start(mut command: Command, program: &str, prompt: &str) -> Result<Self, AgentError> {
        let mut child = command.spawn().map_err(|source| AgentError::Spawn {
            program: program.to_string(),
            source,
        })?;
        tracing::info!(pid = child.id(), program, "spawned agent runtime");

        // Drain stderr before writing stdin: a child blocked on a full stderr
        // pipe never reads its prompt.
        let stderr = child.stderr.take().map(|stderr| tokio::spawn(drain_stderr(stderr)));

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(prompt.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("agent stdout was not captured"))?;

        Ok(Self {
            child,
            stdout: BufReader::new(stdout),
            line: Vec::new(),
            stderr,
        })
    }

    /// Next decodable event on stdout. Lines that are not UTF-8 or not a
    /// known event are skipped.
    async fn next_event(&mut self) -> Result<Option<AgentEvent>, AgentError> {
        loop {
            self.line.clear();
            if self.stdout.read_until(b'\n', &mut self.line).await? == 0 {
                return Ok(None);
            }

            let line = match std::str::from_utf8(&self.line) {
                Ok(line) => line.trim(),
                Err(err) => {
                    tracing::warn!(error = %err, "skipping agent output line that is not UTF-8");
                    continue;
                }
            };
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<AgentEvent>(line) {
                Ok(event) => return Ok(Some(event)),
                Err(err) => tracing::warn!(error = %err, "skipping undecodable agent output line"),
            }
        }
    }

    async fn finish(mut self) -> Result<(), AgentError> {
        let status = self.child.wait().await?;
        let stderr = match self.stderr.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };
        tracing::info!(%status, "agent runtime exited");

        if status.success() {
            Ok(())
        } else {
            Err(AgentError::Exited {
                code: status.code(),
                stderr,
            })
        }
    }
}

async fn drain_stderr(stderr: ChildStderr) -> String {
    let mut reader = BufReader::new(stderr);
    let mut raw = Vec::new();
    let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
    while let Ok(read) = reader.read_until(b'\n', &mut raw).await {
        if read == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&raw).trim_end().to_string();
        raw.clear();
        tracing::debug!(target: "agent_relay::agent::stderr", "{line}");
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    Vec::from(tail).join("\n").trim().to_string()
}

/// Replays a recorded run instead of spawning the agent.
#[derive(Debug, Clone, Default)]
pub struct ReplayRuntime {
    events: Vec<AgentEvent>,
    failure: Option<String>,
    delay: Duration,
}

impl ReplayRuntime {
    pub fn new(events: Vec<AgentEvent>) -> Self {
        Self {
            events,
            ..Self::default()
        }
    }

    /// Load a transcript with one upstream event per line.
    pub fn from_jsonl(path: &Path) -> io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let events = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| match serde_json::from_str::<AgentEvent>(line) {
                Ok(event) => Some(event),
                Err(err) => {
                    tracing::warn!(error = %err, path = %path.display(), "skipping transcript line");
                    None
                }
            })
            .collect();
        Ok(Self::new(events))
    }

    /// After the recorded events, fail the run with `message`.
    pub fn failing_with(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Pause before each event, to mimic a live agent.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl AgentRuntime for ReplayRuntime {
    fn query(&self, prompt: String, _options: &AgentOptions) -> AgentStream {
        tracing::debug!(
            prompt_len = prompt.len(),
            events = self.events.len(),
            "replaying transcript"
        );
        let events = self.events.clone();
        let failure = self.failure.clone();
        let delay = self.delay;

        Box::pin(async_stream::stream! {
            for event in events {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(event);
            }
            if let Some(message) = failure {
                yield Err(AgentError::Aborted(message));
            }
        })
    }
}
