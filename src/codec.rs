//! Frame codec for the relay wire protocol.
//!
//! A frame is `data: <json>\n\n`. The end-of-stream sentinel is the literal
//! `data: [DONE]\n\n` so readers can stop without decoding JSON.

use crate::protocol::NormalizedEvent;
use serde::{Deserialize, Serialize};

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";
pub const FRAME_TERMINATOR: &str = "\n\n";

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    Text { content: String },
    Action { data: WireAction },
    ActionResult { data: WireActionResult },
    Error { content: String },
}

#[derive(Debug, Serialize, Deserialize)]
struct WireAction {
    #[serde(rename = "type")]
    name: String,
    #[serde(default)]
    id: String,
    #[serde(default)]
    input: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireActionResult {
    #[serde(default)]
    id: String,
    output: String,
    #[serde(default)]
    is_error: bool,
}

impl WireEvent {
    fn from_event(event: &NormalizedEvent) -> Option<Self> {
        let wire = match event {
            NormalizedEvent::Text { content } => WireEvent::Text {
                content: content.clone(),
            },
            NormalizedEvent::Action { id, name, input } => WireEvent::Action {
                data: WireAction {
                    name: name.clone(),
                    id: id.clone(),
                    input: input.clone(),
                },
            },
            NormalizedEvent::ActionResult {
                id,
                output,
                is_error,
            } => WireEvent::ActionResult {
                data: WireActionResult {
                    id: id.clone(),
                    output: output.clone(),
                    is_error: *is_error,
                },
            },
            NormalizedEvent::Error { content } => WireEvent::Error {
                content: content.clone(),
            },
            NormalizedEvent::Done => return None,
        };
        Some(wire)
    }

    fn into_event(self) -> NormalizedEvent {
        match self {
            WireEvent::Text { content } => NormalizedEvent::Text { content },
            WireEvent::Action { data } => NormalizedEvent::Action {
                id: data.id,
                name: data.name,
                input: data.input,
            },
            WireEvent::ActionResult { data } => NormalizedEvent::ActionResult {
                id: data.id,
                output: data.output,
                is_error: data.is_error,
            },
            WireEvent::Error { content } => NormalizedEvent::Error { content },
        }
    }
}

/// Encode one event as a complete frame, terminator included.
pub fn encode_frame(event: &NormalizedEvent) -> String {
    let Some(wire) = WireEvent::from_event(event) else {
        return format!("{DATA_PREFIX}{DONE_SENTINEL}{FRAME_TERMINATOR}");
    };

    let json = serde_json::to_string(&wire).unwrap_or_else(|e| {
        serde_json::json!({ "type": "error", "content": format!("failed to encode event: {e}") })
            .to_string()
    });

    format!("{DATA_PREFIX}{json}{FRAME_TERMINATOR}")
}

/// Decode one line of the stream.
///
/// Lines that are not `data:` frames and frames whose JSON does not decode
/// yield `None`; neither is an error for the stream as a whole.
pub fn decode_line(line: &str) -> Option<NormalizedEvent> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let payload = line.strip_prefix(DATA_PREFIX)?;

    if payload == DONE_SENTINEL {
        return Some(NormalizedEvent::Done);
    }

    match serde_json::from_str::<WireEvent>(payload) {
        Ok(wire) => Some(wire.into_event()),
        Err(err) => {
            tracing::debug!(error = %err, "skipping undecodable frame");
            None
        }
    }
}
