use serde::{Deserialize, Serialize};

/// One line of the agent runtime's streaming JSON output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Raw model stream event, forwarded while a turn is still generating.
    StreamEvent { event: PartialEvent },
    /// A finished assistant turn.
    Assistant {
        message: TurnMessage,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// A user-side turn; during a run this carries tool results.
    User { message: TurnMessage },
    /// End-of-run summary.
    Result(UsageSummary),
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PartialEvent {
    ContentBlockDelta {
        #[serde(default)]
        index: usize,
        delta: Delta,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Delta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnMessage {
    #[serde(default)]
    pub content: TurnContent,
}

/// Message content is either a bare string or an ordered list of blocks.
///
/// Blocks stay as raw JSON so that one malformed block can be skipped
/// without losing the rest of the message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TurnContent {
    Blocks(Vec<serde_json::Value>),
    Text(String),
}

impl Default for TurnContent {
    fn default() -> Self {
        TurnContent::Blocks(Vec::new())
    }
}

impl TurnMessage {
    pub fn from_blocks(blocks: Vec<serde_json::Value>) -> Self {
        Self {
            content: TurnContent::Blocks(blocks),
        }
    }

    /// Decode each content block in order. A bare string message has no blocks.
    pub fn blocks(&self) -> impl Iterator<Item = Result<ContentBlock, serde_json::Error>> + '_ {
        let raw: &[serde_json::Value] = match &self.content {
            TurnContent::Blocks(blocks) => blocks,
            TurnContent::Text(_) => &[],
        };
        raw.iter().map(|block| ContentBlock::deserialize(block))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
    ToolUse {
        #[serde(default)]
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    /// Thinking, images and anything newer than this crate.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_turns: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost_usd: Option<f64>,
}
