//! Turns: the unit of a conversation log.
//!
//! A [`Turn`] is immutable once it has been appended to a conversation.
//! Assistant turns may carry [`ToolCall`]s; tool turns answer exactly one
//! of them through `tool_call_id`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FailureKind;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" => Ok(Role::Tool),
            other => Err(format!("invalid role: '{other}'")),
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id, echoed back by the matching tool turn.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

/// One piece of multi-part content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
}

/// Turn content: plain text or an ordered list of parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TurnContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl TurnContent {
    /// Text of every part, in order.
    pub fn segments(&self) -> Vec<&str> {
        match self {
            TurnContent::Text(text) => vec![text.as_str()],
            TurnContent::Parts(parts) => parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => text.as_str(),
                })
                .collect(),
        }
    }

    /// All text joined with newlines.
    pub fn text(&self) -> String {
        match self {
            TurnContent::Text(text) => text.clone(),
            TurnContent::Parts(_) => self.segments().join("\n"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments().iter().all(|s| s.is_empty())
    }
}

impl Default for TurnContent {
    fn default() -> Self {
        TurnContent::Text(String::new())
    }
}

impl From<String> for TurnContent {
    fn from(text: String) -> Self {
        TurnContent::Text(text)
    }
}

impl From<&str> for TurnContent {
    fn from(text: &str) -> Self {
        TurnContent::Text(text.to_string())
    }
}

/// Error attached to a tool turn that did not produce a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolError {
    pub kind: FailureKind,
    pub message: String,
}

/// What a turn is for, beyond its role.
///
/// Only `Message` turns are shown to the model; narration and failure
/// turns are kept in the log for the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnKind {
    #[default]
    Message,
    Narration,
    Failure { error: FailureKind },
}

/// A single entry in a conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: Uuid,
    pub role: Role,
    #[serde(default)]
    pub content: TurnContent,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_error: Option<ToolError>,
    #[serde(default)]
    pub kind: TurnKind,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    fn new(role: Role, content: TurnContent) -> Self {
        Self {
            id: Uuid::now_v7(),
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_error: None,
            kind: TurnKind::Message,
            timestamp: Utc::now(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, TurnContent::Text(text.into()))
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, TurnContent::Text(text.into()))
    }

    pub fn assistant(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut turn = Self::new(Role::Assistant, TurnContent::Text(text.into()));
        turn.tool_calls = tool_calls;
        turn
    }

    /// A successful tool result. The payload is stored as JSON text.
    pub fn tool_result(call_id: impl Into<String>, payload: &serde_json::Value) -> Self {
        let mut turn = Self::new(Role::Tool, TurnContent::Text(payload.to_string()));
        turn.tool_call_id = Some(call_id.into());
        turn
    }

    /// A failed tool result; the message doubles as the turn text.
    pub fn tool_failure(call_id: impl Into<String>, kind: FailureKind, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut turn = Self::new(Role::Tool, TurnContent::Text(message.clone()));
        turn.tool_call_id = Some(call_id.into());
        turn.tool_error = Some(ToolError { kind, message });
        turn
    }

    /// A status line shown to the caller before tools run.
    pub fn narration(text: impl Into<String>) -> Self {
        let mut turn = Self::new(Role::Assistant, TurnContent::Text(text.into()));
        turn.kind = TurnKind::Narration;
        turn
    }

    /// A terminal assistant turn marked as failed.
    pub fn failure(error: FailureKind, message: impl Into<String>) -> Self {
        let mut turn = Self::new(Role::Assistant, TurnContent::Text(message.into()));
        turn.kind = TurnKind::Failure { error };
        turn
    }

    pub fn text(&self) -> String {
        self.content.text()
    }

    /// True for turns that belong in a model prompt.
    pub fn is_message(&self) -> bool {
        matches!(self.kind, TurnKind::Message)
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.kind {
            TurnKind::Failure { error } => Some(*error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_parse_and_display() {
        for role in [Role::System, Role::User, Role::Assistant, Role::Tool] {
            let parsed: Role = role.to_string().parse().unwrap();
            assert_eq!(parsed, role);
        }
        assert!("robot".parse::<Role>().is_err());
    }

    #[test]
    fn test_multi_part_content_segments() {
        let content = TurnContent::Parts(vec![
            ContentPart::Text { text: "first".into() },
            ContentPart::Text { text: "second".into() },
        ]);
        assert_eq!(content.segments(), vec!["first", "second"]);
        assert_eq!(content.text(), "first\nsecond");
        assert!(!content.is_empty());
        assert!(TurnContent::Parts(vec![]).is_empty());
    }

    #[test]
    fn test_content_untagged_deserialize() {
        let text: TurnContent = serde_json::from_value(json!("hello")).unwrap();
        assert_eq!(text, TurnContent::Text("hello".into()));

        let parts: TurnContent =
            serde_json::from_value(json!([{"type": "text", "text": "a"}])).unwrap();
        assert_eq!(parts.segments(), vec!["a"]);
    }

    #[test]
    fn test_tool_failure_carries_error() {
        let turn = Turn::tool_failure("call_1", FailureKind::ToolExecutionFailed, "HTTP 500");
        assert_eq!(turn.role, Role::Tool);
        assert_eq!(turn.tool_call_id.as_deref(), Some("call_1"));
        let err = turn.tool_error.unwrap();
        assert_eq!(err.kind, FailureKind::ToolExecutionFailed);
        assert_eq!(err.message, "HTTP 500");
    }

    #[test]
    fn test_narration_and_failure_are_not_messages() {
        assert!(Turn::user("hi").is_message());
        assert!(!Turn::narration("Checking tables").is_message());

        let failed = Turn::failure(FailureKind::ModelTimeout, "timed out");
        assert!(!failed.is_message());
        assert_eq!(failed.failure_kind(), Some(FailureKind::ModelTimeout));
        assert_eq!(failed.role, Role::Assistant);
    }

    #[test]
    fn test_turn_serde_skips_empty_fields() {
        let turn = Turn::user("table for 2");
        let value = serde_json::to_value(&turn).unwrap();
        assert!(value.get("tool_calls").is_none());
        assert!(value.get("tool_call_id").is_none());
        assert_eq!(value["kind"]["kind"], "message");

        let back: Turn = serde_json::from_value(value).unwrap();
        assert_eq!(back, turn);
    }
}
