//! SSE stream creation and state machine for Anthropic Messages API.
//!
//! Implements the streaming protocol described in the Anthropic docs:
//! 1. `message_start` -- Message object with initial usage
//! 2. Per block: `content_block_start` -> N x `content_block_delta` -> `content_block_stop`
//! 3. `message_delta` -- stop_reason and cumulative usage
//! 4. `message_stop` -- final event
//! 5. `ping` events may appear anywhere (keepalive)
//! 6. `error` events may appear mid-stream
//!
//! Tool use input arrives as partial JSON fragments via `input_json_delta`.
//! These are accumulated per content block index and parsed only after
//! `content_block_stop`.

use std::collections::HashMap;
use std::pin::Pin;

use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};

use bistro_types::llm::{LlmError, StopReason, StreamEvent, Usage};

use super::client::{API_VERSION, map_send_error, map_status};
use super::types::{
    AnthropicContentBlock, AnthropicDelta, AnthropicRequest, AnthropicUsage,
    ContentBlockDeltaPayload, ContentBlockStartPayload, ContentBlockStopPayload, ErrorPayload,
    MessageDeltaPayload, MessageStartPayload,
};

/// Accumulates partial JSON fragments for tool use input within a content block.
struct ToolUseAccumulator {
    id: String,
    name: String,
    json_buffer: String,
}

/// Per-response parser state.
#[derive(Default)]
pub(super) struct StreamState {
    tool_input_buffers: HashMap<u32, ToolUseAccumulator>,
    message_id: Option<String>,
    finished: bool,
}

/// Create a streaming SSE connection to the Anthropic Messages API.
///
/// The returned stream yields `Connected` once the response headers
/// arrive, then the mapped events, and ends with `Done`. A body that
/// closes before `message_stop` ends with a `Stream` error instead.
pub fn create_anthropic_stream(
    client: reqwest::Client,
    url: String,
    body: AnthropicRequest,
    api_key: SecretString,
) -> Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static>> {
    Box::pin(async_stream::stream! {
        let sent = client
            .post(&url)
            .header("x-api-key", api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .header("accept", "text/event-stream")
            .json(&body)
            .send()
            .await;

        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                yield Err(map_send_error(e));
                return;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            yield Err(map_status(status.as_u16(), error_body));
            return;
        }

        yield Ok(StreamEvent::Connected);

        let mut events = response.bytes_stream().eventsource();
        let mut state = StreamState::default();

        while let Some(item) = events.next().await {
            let sse = match item {
                Ok(sse) => sse,
                Err(e) => {
                    yield Err(LlmError::Stream(e.to_string()));
                    return;
                }
            };

            match process_event(&sse.event, &sse.data, &mut state) {
                Ok(mapped) => {
                    for event in mapped {
                        yield Ok(event);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }

            if state.finished {
                tracing::trace!(message_id = ?state.message_id, "anthropic stream finished");
                return;
            }
        }

        yield Err(LlmError::Stream("connection closed before message_stop".to_string()));
    })
}

fn usage_of(usage: AnthropicUsage) -> Usage {
    Usage {
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        cache_creation_input_tokens: usage.cache_creation_input_tokens,
        cache_read_input_tokens: usage.cache_read_input_tokens,
    }
}

pub(super) fn parse_stop_reason(raw: Option<&str>) -> StopReason {
    raw.and_then(|s| s.parse().ok()).unwrap_or(StopReason::EndTurn)
}

/// Map one SSE event onto zero or more [`StreamEvent`]s.
pub(super) fn process_event(
    event_type: &str,
    json_data: &str,
    state: &mut StreamState,
) -> Result<Vec<StreamEvent>, LlmError> {
    let mut events = Vec::new();

    match event_type {
        "message_start" => {
            let payload: MessageStartPayload = serde_json::from_str(json_data)
                .map_err(|e| LlmError::Deserialization(format!("message_start: {e}")))?;
            tracing::trace!(model = %payload.message.model, "anthropic message started");
            state.message_id = Some(payload.message.id);
            if let Some(usage) = payload.message.usage {
                events.push(StreamEvent::Usage(usage_of(usage)));
            }
        }

        "content_block_start" => {
            let payload: ContentBlockStartPayload = serde_json::from_str(json_data)
                .map_err(|e| LlmError::Deserialization(format!("content_block_start: {e}")))?;
            if let AnthropicContentBlock::ToolUse { ref id, ref name, .. } = payload.content_block {
                state.tool_input_buffers.insert(
                    payload.index,
                    ToolUseAccumulator {
                        id: id.clone(),
                        name: name.clone(),
                        json_buffer: String::new(),
                    },
                );
            }
            events.push(StreamEvent::ContentBlockStart {
                index: payload.index,
                content_type: payload.content_block.type_name().to_string(),
            });
        }

        "content_block_delta" => {
            let payload: ContentBlockDeltaPayload = serde_json::from_str(json_data)
                .map_err(|e| LlmError::Deserialization(format!("content_block_delta: {e}")))?;
            match payload.delta {
                AnthropicDelta::TextDelta { text } => {
                    events.push(StreamEvent::TextDelta {
                        index: payload.index,
                        text,
                    });
                }
                AnthropicDelta::InputJsonDelta { partial_json } => {
                    if let Some(acc) = state.tool_input_buffers.get_mut(&payload.index) {
                        acc.json_buffer.push_str(&partial_json);
                    }
                }
                AnthropicDelta::Other => {}
            }
        }

        "content_block_stop" => {
            let payload: ContentBlockStopPayload = serde_json::from_str(json_data)
                .map_err(|e| LlmError::Deserialization(format!("content_block_stop: {e}")))?;
            if let Some(acc) = state.tool_input_buffers.remove(&payload.index) {
                let input = if acc.json_buffer.trim().is_empty() {
                    serde_json::Value::Object(Default::default())
                } else {
                    serde_json::from_str(&acc.json_buffer)
                        .map_err(|e| LlmError::Deserialization(format!("tool input JSON: {e}")))?
                };
                events.push(StreamEvent::ToolUseComplete {
                    id: acc.id,
                    name: acc.name,
                    input,
                });
            }
            events.push(StreamEvent::ContentBlockStop {
                index: payload.index,
            });
        }

        "message_delta" => {
            let payload: MessageDeltaPayload = serde_json::from_str(json_data)
                .map_err(|e| LlmError::Deserialization(format!("message_delta: {e}")))?;
            events.push(StreamEvent::Usage(usage_of(payload.usage)));
            events.push(StreamEvent::MessageDelta {
                stop_reason: parse_stop_reason(payload.delta.stop_reason.as_deref()),
            });
        }

        "message_stop" => {
            state.finished = true;
            events.push(StreamEvent::Done);
        }

        "ping" => {}

        "error" => {
            let payload: ErrorPayload = serde_json::from_str(json_data)
                .map_err(|e| LlmError::Deserialization(format!("error event: {e}")))?;
            return Err(match payload.error.error_type.as_str() {
                "overloaded_error" => LlmError::Overloaded(payload.error.message),
                "rate_limit_error" => LlmError::RateLimited { retry_after_ms: None },
                "api_error" => LlmError::Transport(payload.error.message),
                _ => LlmError::Provider {
                    message: payload.error.message,
                },
            });
        }

        other => {
            tracing::debug!(event_type = other, "ignoring unknown anthropic SSE event");
        }
    }

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(events: &[(&str, &str)]) -> Result<Vec<StreamEvent>, LlmError> {
        let mut state = StreamState::default();
        let mut out = Vec::new();
        for (event, data) in events {
            out.extend(process_event(event, data, &mut state)?);
        }
        Ok(out)
    }

    #[test]
    fn test_text_response_sequence() {
        let events = run(&[
            ("message_start", r#"{"type":"message_start","message":{"id":"msg_1","model":"claude","usage":{"input_tokens":12,"output_tokens":1}}}"#),
            ("content_block_start", r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#),
            ("ping", r#"{"type":"ping"}"#),
            ("content_block_delta", r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"We have "}}"#),
            ("content_block_delta", r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"18:30."}}"#),
            ("content_block_stop", r#"{"type":"content_block_stop","index":0}"#),
            ("message_delta", r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":6}}"#),
            ("message_stop", r#"{"type":"message_stop"}"#),
        ])
        .unwrap();

        let text: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::TextDelta { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "We have 18:30.");
        assert!(matches!(events.last(), Some(StreamEvent::Done)));
        assert!(events.iter().any(|e| matches!(
            e,
            StreamEvent::MessageDelta { stop_reason: StopReason::EndTurn }
        )));
    }

    #[test]
    fn test_tool_input_accumulated_until_block_stop() {
        let events = run(&[
            ("content_block_start", r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"availability","input":{}}}"#),
            ("content_block_delta", r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"date\": \"2026-10-16\","}}"#),
            ("content_block_delta", r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":" \"partySize\": 2}"}}"#),
            ("content_block_stop", r#"{"type":"content_block_stop","index":1}"#),
        ])
        .unwrap();

        let complete = events
            .iter()
            .find_map(|e| match e {
                StreamEvent::ToolUseComplete { id, name, input } => Some((id, name, input)),
                _ => None,
            })
            .unwrap();
        assert_eq!(complete.0, "toolu_1");
        assert_eq!(complete.1, "availability");
        assert_eq!(complete.2["partySize"], 2);
    }

    #[test]
    fn test_tool_without_input_deltas_gets_empty_object() {
        let events = run(&[
            ("content_block_start", r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"toolu_2","name":"menu","input":{}}}"#),
            ("content_block_stop", r#"{"type":"content_block_stop","index":0}"#),
        ])
        .unwrap();
        assert!(events.iter().any(|e| matches!(
            e,
            StreamEvent::ToolUseComplete { input, .. } if input.as_object().is_some_and(|o| o.is_empty())
        )));
    }

    #[test]
    fn test_error_event_classification() {
        let overloaded = run(&[(
            "error",
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        )])
        .unwrap_err();
        assert!(matches!(overloaded, LlmError::Overloaded(_)));
        assert!(overloaded.is_transient());

        let invalid = run(&[(
            "error",
            r#"{"type":"error","error":{"type":"invalid_request_error","message":"bad"}}"#,
        )])
        .unwrap_err();
        assert!(!invalid.is_transient());
    }

    #[test]
    fn test_malformed_payload_is_deserialization_error() {
        let err = run(&[("content_block_delta", "{not json")]).unwrap_err();
        assert!(matches!(err, LlmError::Deserialization(_)));
    }

    #[test]
    fn test_unknown_stop_reason_defaults_to_end_turn() {
        assert_eq!(parse_stop_reason(Some("refusal")), StopReason::EndTurn);
        assert_eq!(parse_stop_reason(Some("tool_use")), StopReason::ToolUse);
        assert_eq!(parse_stop_reason(None), StopReason::EndTurn);
    }
}
