//! Anthropic Messages API types.
//!
//! These are Anthropic-specific request/response structures used for HTTP
//! communication with the Anthropic Messages API. They are NOT the generic
//! LLM types from bistro-types -- those are provider-agnostic.

use serde::{Deserialize, Serialize};

/// Request body for the Anthropic Messages API.
#[derive(Debug, Clone, Serialize)]
pub struct AnthropicRequest {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub system: Vec<AnthropicSystemBlock>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<AnthropicTool>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
}

/// A single message in an Anthropic conversation.
#[derive(Debug, Clone, Serialize)]
pub struct AnthropicMessage {
    pub role: &'static str,
    pub content: Vec<AnthropicRequestBlock>,
}

/// Prompt-cache marker. Anthropic only knows the `ephemeral` type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheControl {
    #[serde(rename = "type")]
    pub kind: &'static str,
}

impl CacheControl {
    pub const EPHEMERAL: CacheControl = CacheControl { kind: "ephemeral" };
}

/// A content block sent in a request message.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicRequestBlock {
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
    },
}

impl AnthropicRequestBlock {
    pub fn set_cache_control(&mut self, value: CacheControl) {
        match self {
            AnthropicRequestBlock::Text { cache_control, .. }
            | AnthropicRequestBlock::ToolUse { cache_control, .. }
            | AnthropicRequestBlock::ToolResult { cache_control, .. } => *cache_control = Some(value),
        }
    }
}

/// A system prompt block.
#[derive(Debug, Clone, Serialize)]
pub struct AnthropicSystemBlock {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControl>,
}

/// A tool the model may call.
#[derive(Debug, Clone, Serialize)]
pub struct AnthropicTool {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

// ---------------------------------------------------------------------------
// SSE event payload structs
//
// The Anthropic SSE stream uses the `event:` field to name the event type
// (e.g., "message_start", "content_block_delta") and the `data:` field
// contains JSON. We deserialize each payload into a specific struct based
// on the event type string -- NOT via serde tag on an outer enum.
// ---------------------------------------------------------------------------

/// Payload for `event: message_start`.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageStartPayload {
    pub message: AnthropicMessageObj,
}

/// The message object inside a `message_start` event.
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicMessageObj {
    pub id: String,
    pub model: String,
    pub usage: Option<AnthropicUsage>,
}

/// Payload for `event: content_block_start`.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlockStartPayload {
    pub index: u32,
    pub content_block: AnthropicContentBlock,
}

/// A content block in an Anthropic response.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum AnthropicContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    /// Block types this client does not use (thinking, server tools).
    #[serde(other)]
    Other,
}

impl AnthropicContentBlock {
    /// Returns the type name string for this content block.
    pub fn type_name(&self) -> &str {
        match self {
            AnthropicContentBlock::Text { .. } => "text",
            AnthropicContentBlock::ToolUse { .. } => "tool_use",
            AnthropicContentBlock::Other => "other",
        }
    }
}

/// Payload for `event: content_block_delta`.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlockDeltaPayload {
    pub index: u32,
    pub delta: AnthropicDelta,
}

/// Delta types within a content block.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum AnthropicDelta {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(rename = "input_json_delta")]
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

/// Payload for `event: content_block_stop`.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlockStopPayload {
    pub index: u32,
}

/// Payload for `event: message_delta`.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageDeltaPayload {
    pub delta: MessageDeltaObj,
    #[serde(default)]
    pub usage: AnthropicUsage,
}

/// The delta object inside a `message_delta` event.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageDeltaObj {
    pub stop_reason: Option<String>,
}

/// Token usage from Anthropic.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnthropicUsage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
    pub cache_creation_input_tokens: Option<u32>,
    pub cache_read_input_tokens: Option<u32>,
}

/// Payload for `event: error`, also the body of non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorPayload {
    pub error: AnthropicError,
}

/// An error from the Anthropic API.
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

/// Non-streaming response from the Anthropic Messages API.
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicNonStreamResponse {
    pub id: String,
    pub content: Vec<AnthropicContentBlock>,
    pub model: String,
    pub stop_reason: Option<String>,
    pub usage: AnthropicUsage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization_skips_empty_parts() {
        let req = AnthropicRequest {
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 1024,
            messages: vec![AnthropicMessage {
                role: "user",
                content: vec![AnthropicRequestBlock::Text {
                    text: "Hello".to_string(),
                    cache_control: None,
                }],
            }],
            system: Vec::new(),
            tools: Vec::new(),
            stream: false,
            temperature: Some(0.7),
            stop_sequences: None,
        };

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["model"], "claude-sonnet-4-20250514");
        assert_eq!(json["messages"][0]["content"][0], serde_json::json!({"type": "text", "text": "Hello"}));
        assert!(json.get("system").is_none());
        assert!(json.get("tools").is_none());
        assert!(json.get("stop_sequences").is_none());
    }

    #[test]
    fn test_tool_result_block_serialization() {
        let mut block = AnthropicRequestBlock::ToolResult {
            tool_use_id: "toolu_1".to_string(),
            content: "HTTP 500: boom".to_string(),
            is_error: true,
            cache_control: None,
        };
        block.set_cache_control(CacheControl::EPHEMERAL);
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "tool_result");
        assert_eq!(json["is_error"], true);
        assert_eq!(json["cache_control"]["type"], "ephemeral");

        let ok = AnthropicRequestBlock::ToolResult {
            tool_use_id: "toolu_2".to_string(),
            content: "{}".to_string(),
            is_error: false,
            cache_control: None,
        };
        assert!(serde_json::to_value(&ok).unwrap().get("is_error").is_none());
    }

    #[test]
    fn test_content_block_tool_use_deserialization() {
        let json = r#"{"type": "tool_use", "id": "toolu_1", "name": "availability", "input": {"partySize": 2}}"#;
        let block: AnthropicContentBlock = serde_json::from_str(json).unwrap();
        match block {
            AnthropicContentBlock::ToolUse { id, name, input } => {
                assert_eq!(id, "toolu_1");
                assert_eq!(name, "availability");
                assert_eq!(input["partySize"], 2);
            }
            _ => panic!("expected ToolUse variant"),
        }
    }

    #[test]
    fn test_unknown_block_and_delta_types_are_tolerated() {
        let block: AnthropicContentBlock =
            serde_json::from_str(r#"{"type": "thinking", "thinking": "hmm"}"#).unwrap();
        assert_eq!(block.type_name(), "other");
        let delta: AnthropicDelta =
            serde_json::from_str(r#"{"type": "signature_delta", "signature": "x"}"#).unwrap();
        assert!(matches!(delta, AnthropicDelta::Other));
    }

    #[test]
    fn test_delta_input_json_deserialization() {
        let json = r#"{"type": "input_json_delta", "partial_json": "{\"date\":"}"#;
        let delta: AnthropicDelta = serde_json::from_str(json).unwrap();
        match delta {
            AnthropicDelta::InputJsonDelta { partial_json } => {
                assert_eq!(partial_json, "{\"date\":");
            }
            _ => panic!("expected InputJsonDelta variant"),
        }
    }

    #[test]
    fn test_non_stream_response_deserialization() {
        let json = r#"{
            "id": "msg_456",
            "content": [
                {"type": "text", "text": "Let me check."},
                {"type": "tool_use", "id": "toolu_9", "name": "menu", "input": {}}
            ],
            "model": "claude-sonnet-4-20250514",
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 50, "output_tokens": 20, "cache_read_input_tokens": 40}
        }"#;
        let resp: AnthropicNonStreamResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.content.len(), 2);
        assert_eq!(resp.stop_reason.as_deref(), Some("tool_use"));
        assert_eq!(resp.usage.cache_read_input_tokens, Some(40));
    }
}
