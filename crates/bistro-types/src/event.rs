//! Caller-facing turn events.
//!
//! `TurnEvent` is the ordered event sequence produced for one external
//! message. Variants serialize with a `type` tag so they can be forwarded
//! verbatim over SSE.

use serde::{Deserialize, Serialize};

use crate::conversation::Node;
use crate::error::FailureKind;
use crate::llm::Usage;
use crate::turn::ToolError;

/// Events emitted while a turn is processed, in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// An incremental piece of model text.
    TokenFragment { text: String },

    /// A tool call is about to run.
    ToolStarted {
        call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
        /// Status line from NARRATE, when narration is enabled.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        narration: Option<String>,
    },

    /// The first attempt failed and the call is being retried once.
    ToolRetry {
        call_id: String,
        tool_name: String,
        error: String,
    },

    /// A tool call finished, with its payload or error.
    ToolResult {
        call_id: String,
        tool_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ToolError>,
    },

    /// The turn reached END (or stopped) and its state is committed.
    TurnComplete {
        thread_id: String,
        node: Node,
        round_trips: u32,
        /// Final assistant text, empty when the turn ended in a failure.
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },

    /// A terminal failure for this turn.
    Error { kind: FailureKind, message: String },
}

impl TurnEvent {
    /// SSE event name for this variant.
    pub fn name(&self) -> &'static str {
        match self {
            TurnEvent::TokenFragment { .. } => "token_fragment",
            TurnEvent::ToolStarted { .. } => "tool_started",
            TurnEvent::ToolRetry { .. } => "tool_retry",
            TurnEvent::ToolResult { .. } => "tool_result",
            TurnEvent::TurnComplete { .. } => "turn_complete",
            TurnEvent::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_name_matches_serde_tag() {
        let events = [
            TurnEvent::TokenFragment { text: "Hi".into() },
            TurnEvent::ToolRetry {
                call_id: "c".into(),
                tool_name: "menu".into(),
                error: "HTTP 500".into(),
            },
            TurnEvent::Error {
                kind: FailureKind::LoopBoundExceeded,
                message: "too many tool calls".into(),
            },
        ];
        for event in events {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["type"], event.name());
        }
    }

    #[test]
    fn test_tool_result_omits_absent_fields() {
        let event = TurnEvent::ToolResult {
            call_id: "c".into(),
            tool_name: "availability".into(),
            payload: Some(serde_json::json!({"times": ["18:30"]})),
            error: None,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert!(value.get("error").is_none());
        assert_eq!(value["payload"]["times"][0], "18:30");
    }
}
