use serde::{Deserialize, Serialize};

/// One event of the wire vocabulary shared by server and client.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedEvent {
    /// Fragment appended to the open assistant turn.
    Text { content: String },
    /// Tool invocation announced by the agent. `id` is empty when the
    /// upstream runtime did not supply one.
    Action {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    /// Result of an earlier action; structured output is already serialized.
    ActionResult {
        id: String,
        output: String,
        is_error: bool,
    },
    Error { content: String },
    /// End of stream; nothing follows.
    Done,
}

impl NormalizedEvent {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::Error {
            content: content.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Action { .. } => "action",
            Self::ActionResult { .. } => "action_result",
            Self::Error { .. } => "error",
            Self::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Label used when the history is flattened into a single prompt.
    pub fn prompt_label(self) -> &'static str {
        match self {
            Role::User => "Human",
            Role::Assistant => "Assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Body of `POST /api/chat`: prior turns, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
}

impl ChatRequest {
    /// A request opens a stream only when it ends with something the user said.
    pub fn is_well_formed(&self) -> bool {
        matches!(self.messages.last(), Some(last) if last.role == Role::User)
    }
}
