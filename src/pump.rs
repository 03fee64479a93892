use crate::agent::AgentStream;
use crate::codec::encode_frame;
use crate::normalizer::normalize;
use crate::protocol::NormalizedEvent;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// How a pump run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    /// Upstream finished; `Done` was written.
    Completed,
    /// Upstream failed; one `Error` frame was written, no `Done`.
    Failed,
    /// The reader went away before upstream finished.
    Cancelled,
}

/// Drive `source` to completion, writing one encoded frame per normalized
/// event to `frames`.
///
/// Each upstream event is fully written before the next one is pulled. The
/// source is dropped on every exit path, which releases the upstream session;
/// `frames` is dropped too, which closes the outgoing channel.
pub async fn pump(
    mut source: AgentStream,
    frames: mpsc::Sender<String>,
    cancel: CancellationToken,
) -> PumpOutcome {
    let mut upstream_events = 0usize;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(upstream_events, "client went away, releasing agent session");
                return PumpOutcome::Cancelled;
            }
            next = source.next() => next,
        };

        match next {
            Some(Ok(event)) => {
                upstream_events += 1;
                tracing::debug!(?event, "upstream event");
                for normalized in normalize(&event) {
                    if send(&frames, &normalized).await.is_err() {
                        tracing::info!(upstream_events, "outgoing channel closed, releasing agent session");
                        return PumpOutcome::Cancelled;
                    }
                }
            }
            Some(Err(err)) => {
                tracing::warn!(error = %err, upstream_events, "agent run failed");
                let _ = send(&frames, &NormalizedEvent::error(err.to_string())).await;
                return PumpOutcome::Failed;
            }
            None => {
                tracing::info!(upstream_events, "agent run completed");
                if send(&frames, &NormalizedEvent::Done).await.is_err() {
                    return PumpOutcome::Cancelled;
                }
                return PumpOutcome::Completed;
            }
        }
    }
}

async fn send(
    frames: &mpsc::Sender<String>,
    event: &NormalizedEvent,
) -> Result<(), mpsc::error::SendError<String>> {
    frames.send(encode_frame(event)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentError, AgentOptions, AgentRuntime, ReplayRuntime};
    use crate::agent_sdk::AgentEvent;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn text_delta(text: &str) -> AgentEvent {
        serde_json::from_value(json!({
            "type": "stream_event",
            "event": {"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": text}}
        }))
        .unwrap()
    }

    async fn collect(mut rx: mpsc::Receiver<String>) -> Vec<String> {
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn completed_run_ends_with_done() {
        let runtime = ReplayRuntime::new(vec![text_delta("Hel"), text_delta("lo")]);
        let (tx, rx) = mpsc::channel(8);

        let outcome = pump(
            runtime.query(String::new(), &AgentOptions::new(".")),
            tx,
            CancellationToken::new(),
        )
        .await;

        assert_eq!(outcome, PumpOutcome::Completed);
        assert_eq!(
            collect(rx).await,
            vec![
                "data: {\"type\":\"text\",\"content\":\"Hel\"}\n\n".to_string(),
                "data: {\"type\":\"text\",\"content\":\"lo\"}\n\n".to_string(),
                "data: [DONE]\n\n".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn failed_run_writes_error_without_done() {
        let runtime = ReplayRuntime::new(vec![text_delta("Hi")]).failing_with("socket hang up");
        let (tx, rx) = mpsc::channel(8);

        let outcome = pump(
            runtime.query(String::new(), &AgentOptions::new(".")),
            tx,
            CancellationToken::new(),
        )
        .await;

        assert_eq!(outcome, PumpOutcome::Failed);
        let frames = collect(rx).await;
        assert_eq!(frames.len(), 2);
        assert!(frames[1].contains("\"type\":\"error\""));
        assert!(frames[1].contains("socket hang up"));
        assert!(!frames.iter().any(|frame| frame.contains("[DONE]")));
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn cancellation_releases_upstream() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = DropFlag(Arc::clone(&released));
        let source: AgentStream = Box::pin(async_stream::stream! {
            let _flag = flag;
            yield Ok::<_, AgentError>(text_delta("first"));
            futures::future::pending::<()>().await;
        });

        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(pump(source, tx, cancel.clone()));

        assert!(rx.recv().await.is_some());
        cancel.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, PumpOutcome::Cancelled);
        assert!(released.load(Ordering::SeqCst));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropped_receiver_stops_the_pump() {
        let runtime = ReplayRuntime::new(vec![text_delta("a"), text_delta("b")]);
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let outcome = pump(
            runtime.query(String::new(), &AgentOptions::new(".")),
            tx,
            CancellationToken::new(),
        )
        .await;

        assert_eq!(outcome, PumpOutcome::Cancelled);
    }
}
