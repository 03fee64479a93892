//! Maps upstream agent events onto the relay's wire vocabulary.
//!
//! Final assistant text is never forwarded from a complete turn: it already
//! reached the client as a sequence of partial deltas. Only error-flagged
//! text survives, as an [`NormalizedEvent::Error`].

use crate::agent_sdk::{AgentEvent, ContentBlock, Delta, PartialEvent, TurnMessage, UsageSummary};
use crate::protocol::NormalizedEvent;

/// Normalize one upstream event, preserving block order.
pub fn normalize(event: &AgentEvent) -> Vec<NormalizedEvent> {
    match event {
        AgentEvent::StreamEvent { event } => normalize_partial(event).into_iter().collect(),
        AgentEvent::Assistant { message, error } => normalize_assistant(message, error.is_some()),
        AgentEvent::User { message } => normalize_user(message),
        AgentEvent::Result(summary) => {
            log_summary(summary);
            Vec::new()
        }
        AgentEvent::Other => {
            tracing::debug!("ignoring upstream event without a wire mapping");
            Vec::new()
        }
    }
}

fn normalize_partial(event: &PartialEvent) -> Option<NormalizedEvent> {
    match event {
        PartialEvent::ContentBlockDelta {
            delta: Delta::TextDelta { text },
            ..
        } => Some(NormalizedEvent::text(text.clone())),
        _ => None,
    }
}

fn normalize_assistant(message: &TurnMessage, message_failed: bool) -> Vec<NormalizedEvent> {
    let mut events = Vec::new();
    for (index, block) in message.blocks().enumerate() {
        match block {
            Ok(ContentBlock::ToolUse { id, name, input }) => {
                events.push(NormalizedEvent::Action { id, name, input });
            }
            Ok(ContentBlock::Text { text, is_error }) if is_error || message_failed => {
                events.push(NormalizedEvent::Error { content: text });
            }
            Ok(ContentBlock::Text { .. }) => {}
            Ok(other) => skip_block(index, "assistant", &other),
            Err(err) => {
                tracing::warn!(index, error = %err, "skipping malformed assistant block");
            }
        }
    }
    events
}

fn normalize_user(message: &TurnMessage) -> Vec<NormalizedEvent> {
    let mut events = Vec::new();
    for (index, block) in message.blocks().enumerate() {
        match block {
            Ok(ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            }) => events.push(NormalizedEvent::ActionResult {
                id: tool_use_id,
                output: stringify_output(content),
                is_error: is_error.unwrap_or(false),
            }),
            Ok(other) => skip_block(index, "user", &other),
            Err(err) => {
                tracing::warn!(index, error = %err, "skipping malformed user block");
            }
        }
    }
    events
}

fn skip_block(index: usize, role: &str, block: &ContentBlock) {
    tracing::debug!(index, role, ?block, "block has no wire mapping");
}

/// Tool output goes over the wire as a string; structured results are
/// serialized as JSON.
fn stringify_output(content: serde_json::Value) -> String {
    match content {
        serde_json::Value::String(text) => text,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn log_summary(summary: &UsageSummary) {
    tracing::info!(
        subtype = %summary.subtype,
        is_error = summary.is_error,
        duration_ms = summary.duration_ms,
        num_turns = summary.num_turns,
        total_cost_usd = summary.total_cost_usd,
        "agent run finished"
    );
}
