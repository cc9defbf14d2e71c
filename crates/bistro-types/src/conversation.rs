//! Conversation threads and their state-machine checkpoints.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::turn::Turn;

/// Condensed text covering turns evicted from the prompt window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub text: String,
    /// Number of evicted message turns the summary was built from.
    pub covered_turns: usize,
    /// Hex SHA-256 of the summarizer input; equal digests reuse `text`.
    pub source_digest: String,
}

/// One conversation thread. `turns` is append-only and chronological.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub thread_id: String,
    #[serde(default)]
    pub turns: Vec<Turn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<ConversationSummary>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            turns: Vec::new(),
            summary: None,
            created_at: Utc::now(),
        }
    }

    pub fn last_turn(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// The most recent turn that can appear in a prompt.
    pub fn last_message(&self) -> Option<&Turn> {
        self.turns.iter().rev().find(|t| t.is_message())
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// State-machine node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    #[default]
    Agent,
    Narrate,
    Tools,
    End,
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Agent => write!(f, "agent"),
            Node::Narrate => write!(f, "narrate"),
            Node::Tools => write!(f, "tools"),
            Node::End => write!(f, "end"),
        }
    }
}

impl FromStr for Node {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "agent" => Ok(Node::Agent),
            "narrate" => Ok(Node::Narrate),
            "tools" => Ok(Node::Tools),
            "end" => Ok(Node::End),
            other => Err(format!("invalid node: '{other}'")),
        }
    }
}

/// Snapshot of a thread taken after every node transition.
///
/// Exactly one checkpoint exists per thread; saving overwrites it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: String,
    pub conversation: Conversation,
    pub node: Node,
    /// AGENT/TOOLS round trips taken for the current external message.
    pub round_trips: u32,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(conversation: Conversation, node: Node, round_trips: u32) -> Self {
        Self {
            thread_id: conversation.thread_id.clone(),
            conversation,
            node,
            round_trips,
            updated_at: Utc::now(),
        }
    }

    /// True when the thread stopped before reaching END.
    pub fn is_unfinished(&self) -> bool {
        self.node != Node::End
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::turn::ToolCall;

    #[test]
    fn test_checkpoint_json_preserves_turns_and_node() {
        let mut conversation = Conversation::new("thread-1");
        conversation.turns.push(Turn::user("table for 2 tomorrow at 7"));
        conversation.turns.push(Turn::assistant(
            "",
            vec![ToolCall {
                id: "call_1".into(),
                name: "availability".into(),
                arguments: serde_json::json!({"date": "2026-10-16", "partySize": 2})
                    .as_object()
                    .cloned()
                    .unwrap(),
            }],
        ));
        conversation.turns.push(Turn::tool_result(
            "call_1",
            &serde_json::json!({"times": ["18:30", "19:00"]}),
        ));

        let checkpoint = Checkpoint::new(conversation, Node::Agent, 1);
        let json = serde_json::to_string(&checkpoint).unwrap();
        let restored: Checkpoint = serde_json::from_str(&json).unwrap();

        assert_eq!(restored, checkpoint);
        assert_eq!(restored.node, Node::Agent);
        let ids: Vec<_> = restored.conversation.turns.iter().map(|t| t.id).collect();
        let original: Vec<_> = checkpoint.conversation.turns.iter().map(|t| t.id).collect();
        assert_eq!(ids, original);
    }

    #[test]
    fn test_node_parse_and_display() {
        for node in [Node::Agent, Node::Narrate, Node::Tools, Node::End] {
            assert_eq!(node.to_string().parse::<Node>().unwrap(), node);
        }
    }

    #[test]
    fn test_last_message_skips_narration() {
        let mut conversation = Conversation::new("t");
        conversation.turns.push(Turn::user("hi"));
        conversation.turns.push(Turn::narration("Looking that up"));
        assert_eq!(conversation.last_message().unwrap().text(), "hi");
        assert!(conversation.last_turn().unwrap().text().starts_with("Looking"));
    }

    #[test]
    fn test_unfinished_checkpoint() {
        let cp = Checkpoint::new(Conversation::new("t"), Node::Tools, 2);
        assert!(cp.is_unfinished());
        assert!(!Checkpoint::new(Conversation::new("t"), Node::End, 0).is_unfinished());
    }
}
