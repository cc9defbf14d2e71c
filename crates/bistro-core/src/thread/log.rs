//! Append-only message log for one thread.
//!
//! `MessageLog` owns a [`Conversation`] and is the only way the engine adds
//! turns to it. Appends check that every tool turn answers a call made by an
//! earlier assistant turn and that no call is answered twice. Nothing is
//! ever removed or reordered.

use std::collections::HashSet;

use bistro_types::conversation::{Conversation, ConversationSummary};
use bistro_types::turn::{Role, ToolCall, Turn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AppendError {
    #[error("tool turn has no tool_call_id")]
    MissingCallId,

    #[error("tool turn answers unknown call '{0}'")]
    UnknownCall(String),

    #[error("call '{0}' already has a result")]
    DuplicateResult(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageLog {
    conversation: Conversation,
}

impl MessageLog {
    pub fn new(conversation: Conversation) -> Self {
        Self { conversation }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn into_conversation(self) -> Conversation {
        self.conversation
    }

    pub fn turns(&self) -> &[Turn] {
        &self.conversation.turns
    }

    pub fn len(&self) -> usize {
        self.conversation.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversation.turns.is_empty()
    }

    /// The summary is derived data and may be replaced freely.
    pub fn set_summary(&mut self, summary: Option<ConversationSummary>) {
        self.conversation.summary = summary;
    }

    pub fn append(&mut self, turn: Turn) -> Result<(), AppendError> {
        self.append_all(vec![turn])
    }

    /// Append several turns at once. Either all are appended or none.
    pub fn append_all(&mut self, turns: Vec<Turn>) -> Result<(), AppendError> {
        let mut issued = self.issued_calls();
        let mut answered = self.answered_calls();

        for turn in &turns {
            if turn.role == Role::Assistant {
                issued.extend(turn.tool_calls.iter().map(|c| c.id.clone()));
            }
            if turn.role == Role::Tool {
                let id = turn.tool_call_id.as_ref().ok_or(AppendError::MissingCallId)?;
                if !issued.contains(id) {
                    return Err(AppendError::UnknownCall(id.clone()));
                }
                if !answered.insert(id.clone()) {
                    return Err(AppendError::DuplicateResult(id.clone()));
                }
            }
        }

        self.conversation.turns.extend(turns);
        Ok(())
    }

    /// Whether an assistant turn already issued a call with this id.
    pub fn knows_call(&self, call_id: &str) -> bool {
        self.conversation
            .turns
            .iter()
            .filter(|t| t.role == Role::Assistant)
            .any(|t| t.tool_calls.iter().any(|c| c.id == call_id))
    }

    /// Tool calls of the latest assistant message that still lack a result, in emitted order.
    pub fn pending_tool_calls(&self) -> Vec<ToolCall> {
        let Some(turn) = self
            .conversation
            .turns
            .iter()
            .rev()
            .find(|t| t.is_message() && t.role != Role::Tool)
        else {
            return Vec::new();
        };
        if turn.role != Role::Assistant {
            return Vec::new();
        }
        let answered = self.answered_calls();
        turn.tool_calls
            .iter()
            .filter(|c| !answered.contains(&c.id))
            .cloned()
            .collect()
    }

    fn issued_calls(&self) -> HashSet<String> {
        self.conversation
            .turns
            .iter()
            .filter(|t| t.role == Role::Assistant)
            .flat_map(|t| t.tool_calls.iter().map(|c| c.id.clone()))
            .collect()
    }

    fn answered_calls(&self) -> HashSet<String> {
        self.conversation
            .turns
            .iter()
            .filter(|t| t.role == Role::Tool)
            .filter_map(|t| t.tool_call_id.clone())
            .collect()
    }
}
