use crate::conversation::{Conversation, ConversationError, ConversationTurn, INCOMPLETE_NOTICE};
use crate::protocol::{ChatRequest, NormalizedEvent};
use crate::stream_parser::decode_stream;
use futures::StreamExt;
use reqwest::Client as HttpClient;

pub struct ClientConfig {
    pub base_url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Conversation(#[from] ConversationError),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("relay rejected the request: {status} - {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// How the assistant turn of one exchange ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// `Done` arrived.
    Completed,
    /// The stream ended or broke without `Done`; the turn carries a notice.
    Incomplete,
}

/// One conversation against a relay server.
pub struct ChatClient {
    base_url: String,
    http: HttpClient,
    conversation: Conversation,
}

impl ChatClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            base_url: normalize_base_url(&config.base_url),
            http: HttpClient::new(),
            conversation: Conversation::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Send `content` and stream the reply into the conversation.
    ///
    /// `on_event` runs after each applied event with the turn it changed.
    pub async fn send<F>(
        &mut self,
        content: String,
        mut on_event: F,
    ) -> Result<TurnOutcome, ClientError>
    where
        F: FnMut(&NormalizedEvent, &ConversationTurn),
    {
        self.conversation.submit(content)?;
        let request = ChatRequest {
            messages: self.conversation.history(),
        };

        let response = match self.post_chat(&request).await {
            Ok(response) => response,
            Err(err) => {
                self.conversation.close_incomplete(INCOMPLETE_NOTICE);
                return Err(err);
            }
        };

        let events = decode_stream(response.bytes_stream());
        futures::pin_mut!(events);

        while let Some(item) = events.next().await {
            let event = match item {
                Ok(event) => event,
                Err(err) => {
                    tracing::warn!(error = %err, "response stream broke");
                    break;
                }
            };

            let turn = self.conversation.open_turn().map(|turn| turn.id.clone());
            self.conversation.apply(&event);
            if let Some(turn) = turn.and_then(|id| self.find_turn(&id)) {
                on_event(&event, turn);
            }
            if event == NormalizedEvent::Done {
                return Ok(TurnOutcome::Completed);
            }
        }

        // A turn that already shows an error gets no second notice.
        let turn = self
            .conversation
            .open_turn()
            .filter(|turn| !turn.failed)
            .map(|turn| turn.id.clone());
        self.conversation.close_incomplete(INCOMPLETE_NOTICE);
        if let Some(turn) = turn.and_then(|id| self.find_turn(&id)) {
            on_event(&NormalizedEvent::error(INCOMPLETE_NOTICE), turn);
        }
        Ok(TurnOutcome::Incomplete)
    }

    async fn post_chat(&self, request: &ChatRequest) -> Result<reqwest::Response, ClientError> {
        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status { status, body });
        }

        Ok(response)
    }

    fn find_turn(&self, id: &str) -> Option<&ConversationTurn> {
        self.conversation.turns().iter().rev().find(|turn| turn.id == id)
    }
}

fn normalize_base_url(value: &str) -> String {
    value.trim_end_matches('/').to_string()
}
