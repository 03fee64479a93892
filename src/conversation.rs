//! Client-side conversation state.
//!
//! [`Conversation`] owns the ordered turn list and an explicit turn state:
//! `Idle → AssistantOpen → Closed`, reopened by the next user submission.
//! Only the open assistant turn accepts events; anything arriving while no
//! turn is open is dropped.

use crate::protocol::{ChatMessage, NormalizedEvent, Role};
use uuid::Uuid;

/// Appended to a turn whose stream ended without `Done`.
pub const INCOMPLETE_NOTICE: &str = "The response ended unexpectedly. Please try again.";

const ERROR_PREFIX: &str = "Error: ";

#[derive(Debug, Clone, PartialEq)]
pub struct ActionRecord {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
    /// `None` while the action is in flight.
    pub output: Option<String>,
    pub is_error: Option<bool>,
}

impl ActionRecord {
    pub fn is_pending(&self) -> bool {
        self.output.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationTurn {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub actions: Vec<ActionRecord>,
    /// Set once an error notice has been appended.
    pub failed: bool,
    last_result: Option<usize>,
}

impl ConversationTurn {
    fn new(role: Role, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            actions: Vec::new(),
            failed: false,
            last_result: None,
        }
    }

    /// The action completed by the most recently applied result, if that
    /// result matched one.
    pub fn last_result(&self) -> Option<&ActionRecord> {
        self.last_result.and_then(|index| self.actions.get(index))
    }

    fn append_error(&mut self, message: &str) {
        if !self.content.is_empty() {
            if !self.content.ends_with('\n') {
                self.content.push('\n');
            }
            self.content.push('\n');
        }
        self.content.push_str(ERROR_PREFIX);
        self.content.push_str(message);
        self.failed = true;
    }

    fn record_action(&mut self, id: &str, name: &str, input: &serde_json::Value) -> bool {
        if !id.is_empty() && self.actions.iter().any(|action| action.id == id) {
            tracing::debug!(id, name, "dropping duplicate action id");
            return false;
        }
        self.actions.push(ActionRecord {
            id: id.to_string(),
            name: name.to_string(),
            input: input.clone(),
            output: None,
            is_error: None,
        });
        true
    }

    fn complete_action(&mut self, id: &str, output: &str, is_error: bool) -> bool {
        self.last_result = self
            .actions
            .iter()
            .position(|action| action.is_pending() && (id.is_empty() || action.id == id));

        match self.last_result.and_then(|index| self.actions.get_mut(index)) {
            Some(action) => {
                action.output = Some(output.to_string());
                action.is_error = Some(is_error);
                true
            }
            None => {
                tracing::debug!(id, "dropping result with no pending action");
                false
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// Nothing submitted yet.
    Idle,
    /// The assistant turn at `turn` is accepting events.
    AssistantOpen { turn: usize },
    /// The last assistant turn is finished.
    Closed,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConversationError {
    #[error("a response is still being generated")]
    TurnInProgress,
    #[error("message is empty")]
    EmptyMessage,
}

#[derive(Debug, Clone)]
pub struct Conversation {
    turns: Vec<ConversationTurn>,
    state: TurnState,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            turns: Vec::new(),
            state: TurnState::Idle,
        }
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn is_generating(&self) -> bool {
        matches!(self.state, TurnState::AssistantOpen { .. })
    }

    pub fn open_turn(&self) -> Option<&ConversationTurn> {
        match self.state {
            TurnState::AssistantOpen { turn } => self.turns.get(turn),
            _ => None,
        }
    }

    fn open_turn_mut(&mut self) -> Option<&mut ConversationTurn> {
        match self.state {
            TurnState::AssistantOpen { turn } => self.turns.get_mut(turn),
            _ => None,
        }
    }

    /// Append the user's turn and open an empty assistant turn right after it.
    pub fn submit(&mut self, content: impl Into<String>) -> Result<(), ConversationError> {
        if self.is_generating() {
            return Err(ConversationError::TurnInProgress);
        }
        let content = content.into();
        if content.trim().is_empty() {
            return Err(ConversationError::EmptyMessage);
        }

        self.turns.push(ConversationTurn::new(Role::User, content));
        self.turns
            .push(ConversationTurn::new(Role::Assistant, String::new()));
        self.state = TurnState::AssistantOpen {
            turn: self.turns.len() - 1,
        };
        Ok(())
    }

    /// Request history: every turn except the still-empty open one.
    pub fn history(&self) -> Vec<ChatMessage> {
        let open = match self.state {
            TurnState::AssistantOpen { turn } => Some(turn),
            _ => None,
        };
        self.turns
            .iter()
            .enumerate()
            .filter(|(index, _)| Some(*index) != open)
            .map(|(_, turn)| ChatMessage {
                role: turn.role,
                content: turn.content.clone(),
            })
            .collect()
    }

    /// Apply one decoded event. Returns whether the state changed.
    pub fn apply(&mut self, event: &NormalizedEvent) -> bool {
        if matches!(event, NormalizedEvent::Done) {
            return self.close();
        }

        let Some(turn) = self.open_turn_mut() else {
            tracing::debug!(kind = event.kind(), "dropping event with no open turn");
            return false;
        };

        match event {
            NormalizedEvent::Text { content } => {
                turn.content.push_str(content);
                true
            }
            NormalizedEvent::Action { id, name, input } => turn.record_action(id, name, input),
            NormalizedEvent::ActionResult {
                id,
                output,
                is_error,
            } => turn.complete_action(id, output, *is_error),
            NormalizedEvent::Error { content } => {
                turn.append_error(content);
                true
            }
            NormalizedEvent::Done => false,
        }
    }

    /// Close the open turn after the stream ended without `Done`. A notice is
    /// appended unless the turn already carries an error.
    pub fn close_incomplete(&mut self, notice: &str) -> bool {
        let Some(turn) = self.open_turn_mut() else {
            return false;
        };
        if !turn.failed {
            turn.append_error(notice);
        }
        self.close()
    }

    fn close(&mut self) -> bool {
        if self.is_generating() {
            self.state = TurnState::Closed;
            true
        } else {
            false
        }
    }
}

/// Pure form of [`Conversation::apply`].
pub fn reduce(mut state: Conversation, event: &NormalizedEvent) -> Conversation {
    state.apply(event);
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn action(id: &str, name: &str) -> NormalizedEvent {
        NormalizedEvent::Action {
            id: id.to_string(),
            name: name.to_string(),
            input: json!({}),
        }
    }

    fn result(id: &str, output: &str, is_error: bool) -> NormalizedEvent {
        NormalizedEvent::ActionResult {
            id: id.to_string(),
            output: output.to_string(),
            is_error,
        }
    }

    fn open_conversation() -> Conversation {
        let mut conversation = Conversation::new();
        conversation.submit("hi").unwrap();
        conversation
    }

    #[test]
    fn submit_opens_assistant_turn_after_user_turn() {
        let conversation = open_conversation();
        assert!(conversation.is_generating());
        assert_eq!(conversation.state(), TurnState::AssistantOpen { turn: 1 });
        assert_eq!(conversation.turns()[0].role, Role::User);
        assert_eq!(conversation.turns()[1].role, Role::Assistant);
        assert_eq!(conversation.turns()[1].content, "");
        assert_eq!(conversation.history(), vec![ChatMessage::user("hi")]);
    }

    #[test]
    fn submit_is_refused_while_generating() {
        let mut conversation = open_conversation();
        assert_eq!(
            conversation.submit("again"),
            Err(ConversationError::TurnInProgress)
        );
        assert_eq!(conversation.turns().len(), 2);
    }

    #[test]
    fn blank_submission_is_refused() {
        let mut conversation = Conversation::new();
        assert_eq!(conversation.submit("  \n"), Err(ConversationError::EmptyMessage));
        assert_eq!(conversation.state(), TurnState::Idle);
    }

    #[test]
    fn text_fragments_concatenate_in_order() {
        let conversation = ["Hel", "lo", ", ", "world"]
            .into_iter()
            .fold(open_conversation(), |state, fragment| {
                reduce(state, &NormalizedEvent::text(fragment))
            });
        assert_eq!(conversation.open_turn().unwrap().content, "Hello, world");
    }

    #[test]
    fn events_without_open_turn_are_dropped() {
        let mut conversation = Conversation::new();
        assert!(!conversation.apply(&NormalizedEvent::text("orphan")));
        assert!(!conversation.apply(&NormalizedEvent::Done));
        assert!(conversation.turns().is_empty());
        assert_eq!(conversation.state(), TurnState::Idle);
    }

    #[test]
    fn actions_append_in_arrival_order_with_no_output() {
        let mut conversation = open_conversation();
        conversation.apply(&action("a", "Read"));
        conversation.apply(&action("b", "Grep"));
        conversation.apply(&action("c", "Read"));

        let actions = &conversation.open_turn().unwrap().actions;
        let ids: Vec<_> = actions.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert!(actions.iter().all(ActionRecord::is_pending));
    }

    #[test]
    fn duplicate_action_id_is_dropped() {
        let mut conversation = open_conversation();
        assert!(conversation.apply(&action("a", "Read")));
        assert!(!conversation.apply(&action("a", "Read")));
        assert_eq!(conversation.open_turn().unwrap().actions.len(), 1);
    }

    #[test]
    fn result_correlates_by_id() {
        let mut conversation = open_conversation();
        conversation.apply(&action("a0", "lookup"));
        conversation.apply(&action("a1", "lookup"));
        assert!(conversation.apply(&result("a1", "42", false)));

        let actions = &conversation.open_turn().unwrap().actions;
        assert!(actions[0].is_pending());
        assert_eq!(actions[1].output.as_deref(), Some("42"));
        assert_eq!(actions[1].is_error, Some(false));
    }

    #[test]
    fn unknown_result_leaves_records_unchanged() {
        let mut conversation = open_conversation();
        conversation.apply(&action("a1", "lookup"));
        let before = conversation.open_turn().unwrap().clone();

        assert!(!conversation.apply(&result("unknown", "x", false)));
        assert_eq!(conversation.open_turn().unwrap(), &before);
    }

    #[test]
    fn result_for_already_completed_action_is_dropped() {
        let mut conversation = open_conversation();
        conversation.apply(&action("a1", "lookup"));
        conversation.apply(&result("a1", "first", false));
        assert!(!conversation.apply(&result("a1", "second", true)));

        let record = &conversation.open_turn().unwrap().actions[0];
        assert_eq!(record.output.as_deref(), Some("first"));
        assert_eq!(record.is_error, Some(false));
    }

    #[test]
    fn empty_result_id_matches_oldest_pending_action() {
        let mut conversation = open_conversation();
        conversation.apply(&action("", "swap"));
        conversation.apply(&action("", "buy"));
        conversation.apply(&result("", "done", false));
        conversation.apply(&result("", "failed", true));

        let actions = &conversation.open_turn().unwrap().actions;
        assert_eq!(actions[0].output.as_deref(), Some("done"));
        assert_eq!(actions[1].output.as_deref(), Some("failed"));
        assert_eq!(actions[1].is_error, Some(true));
    }

    #[test]
    fn last_result_points_at_the_matched_record() {
        let mut conversation = open_conversation();
        conversation.apply(&action("", "swap"));
        conversation.apply(&action("", "buy"));

        conversation.apply(&result("", "done", false));
        let turn = conversation.open_turn().unwrap();
        assert_eq!(turn.last_result().map(|a| a.name.as_str()), Some("swap"));

        conversation.apply(&result("", "failed", true));
        let turn = conversation.open_turn().unwrap();
        assert_eq!(turn.last_result().map(|a| a.name.as_str()), Some("buy"));

        conversation.apply(&result("", "stray", false));
        assert!(conversation.open_turn().unwrap().last_result().is_none());
    }

    #[test]
    fn error_appends_visible_notice() {
        let mut conversation = open_conversation();
        conversation.apply(&NormalizedEvent::text("Hi"));
        conversation.apply(&NormalizedEvent::error("upstream crashed"));

        let turn = conversation.open_turn().unwrap();
        assert_eq!(turn.content, "Hi\n\nError: upstream crashed");
        assert!(turn.failed);
    }

    #[test]
    fn done_closes_turn_and_blocks_further_mutation() {
        let mut conversation = open_conversation();
        conversation.apply(&NormalizedEvent::text("Hello"));
        assert!(conversation.apply(&NormalizedEvent::Done));
        assert_eq!(conversation.state(), TurnState::Closed);
        assert!(!conversation.is_generating());

        assert!(!conversation.apply(&NormalizedEvent::text(" late")));
        assert!(!conversation.apply(&action("x", "late")));
        assert_eq!(conversation.turns()[1].content, "Hello");
        assert!(conversation.turns()[1].actions.is_empty());
    }

    #[test]
    fn closed_conversation_can_be_reopened() {
        let mut conversation = open_conversation();
        conversation.apply(&NormalizedEvent::text("Hello"));
        conversation.apply(&NormalizedEvent::Done);
        conversation.submit("more").unwrap();

        assert_eq!(conversation.state(), TurnState::AssistantOpen { turn: 3 });
        assert_eq!(
            conversation.history(),
            vec![
                ChatMessage::user("hi"),
                ChatMessage::assistant("Hello"),
                ChatMessage::user("more"),
            ]
        );
    }

    #[test]
    fn incomplete_close_appends_notice_once() {
        let mut conversation = open_conversation();
        conversation.apply(&NormalizedEvent::text("Hi"));
        assert!(conversation.close_incomplete(INCOMPLETE_NOTICE));
        assert_eq!(
            conversation.turns()[1].content,
            format!("Hi\n\nError: {INCOMPLETE_NOTICE}")
        );
        assert!(!conversation.close_incomplete(INCOMPLETE_NOTICE));
    }

    #[test]
    fn incomplete_close_after_error_keeps_single_notice() {
        let mut conversation = open_conversation();
        conversation.apply(&NormalizedEvent::text("Hi"));
        conversation.apply(&NormalizedEvent::error("boom"));
        conversation.close_incomplete(INCOMPLETE_NOTICE);

        assert_eq!(conversation.turns()[1].content, "Hi\n\nError: boom");
        assert_eq!(conversation.state(), TurnState::Closed);
    }
}
