//! Per-query transcripts of upstream agent output.
//!
//! Each query gets its own JSON-lines file: a `query` header carrying the
//! prompt, one line per upstream event, then a `query_completed` or
//! `query_failed` trailer. Header and trailer decode as ignored events, so a
//! transcript can be served again with `serve --replay`.

use crate::agent::{AgentOptions, AgentRuntime, AgentStream};
use crate::agent_sdk::AgentEvent;
use futures::StreamExt;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

/// Wraps a runtime and records every query it serves under `dir`.
pub struct RecordingRuntime {
    inner: Arc<dyn AgentRuntime>,
    dir: PathBuf,
}

impl RecordingRuntime {
    pub fn new(inner: Arc<dyn AgentRuntime>, dir: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            dir: dir.into(),
        }
    }
}

impl AgentRuntime for RecordingRuntime {
    fn query(&self, prompt: String, options: &AgentOptions) -> AgentStream {
        let dir = self.dir.clone();
        let header = json!({"type": "query", "prompt": prompt});
        let mut source = self.inner.query(prompt, options);

        Box::pin(async_stream::stream! {
            let mut transcript = Transcript::create(&dir).await;
            transcript.write(&header).await;

            let mut failed = false;
            while let Some(item) = source.next().await {
                match &item {
                    Ok(event) => transcript.record(event).await,
                    Err(err) => {
                        failed = true;
                        transcript
                            .write(&json!({"type": "query_failed", "error": err.to_string()}))
                            .await;
                    }
                }
                yield item;
            }

            if !failed {
                let total = transcript.events;
                transcript
                    .write(&json!({"type": "query_completed", "total_events": total}))
                    .await;
            }
        })
    }
}

/// An open transcript file. Recording stops quietly after the first I/O
/// failure; the query itself is never affected.
struct Transcript {
    path: PathBuf,
    file: Option<File>,
    events: usize,
}

impl Transcript {
    async fn create(dir: &Path) -> Self {
        let path = dir.join(transcript_name());
        let file = match open(dir, &path).await {
            Ok(file) => {
                tracing::info!(path = %path.display(), "recording agent transcript");
                Some(file)
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "cannot record agent transcript");
                None
            }
        };
        Self {
            path,
            file,
            events: 0,
        }
    }

    async fn record(&mut self, event: &AgentEvent) {
        match serde_json::to_value(event) {
            Ok(value) => {
                self.events += 1;
                self.write(&value).await;
            }
            Err(err) => tracing::warn!(error = %err, "cannot serialize upstream event"),
        }
    }

    async fn write(&mut self, value: &serde_json::Value) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        let mut line = value.to_string();
        line.push('\n');

        let written = async {
            file.write_all(line.as_bytes()).await?;
            file.flush().await
        }
        .await;

        if let Err(err) = written {
            tracing::warn!(path = %self.path.display(), error = %err, "stopped recording agent transcript");
            self.file = None;
        }
    }
}

async fn open(dir: &Path, path: &Path) -> std::io::Result<File> {
    fs::create_dir_all(dir).await?;
    File::create(path).await
}

fn transcript_name() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("agent-{millis}-{}.jsonl", &suffix[..8])
}
