//! Deterministic provider that replays a fixed script.
//!
//! Used by the engine's tests and by offline demos. Each request consumes
//! the next [`ScriptedReply`]; a repeating provider replays the last one
//! forever. Every request is recorded for later inspection.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use futures_util::{Stream, stream};

use bistro_types::llm::{
    CompletionRequest, CompletionResponse, LlmError, ProviderCapabilities, StopReason, StreamEvent,
    Usage,
};
use bistro_types::turn::ToolCall;

use super::provider::LlmProvider;

/// One scripted model response.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Text, optionally followed by tool calls.
    Reply { text: String, tool_calls: Vec<ToolCall> },
    /// Fail the request with this error.
    Fail(LlmError),
    /// Emit this text, then fail mid-stream.
    BreakAfter { text: String, error: LlmError },
    /// Never respond.
    Stall,
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        ScriptedReply::Reply {
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        let arguments = match arguments {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        ScriptedReply::Reply {
            text: String::new(),
            tool_calls: vec![ToolCall {
                id: id.into(),
                name: name.into(),
                arguments,
            }],
        }
    }
}

#[derive(Debug)]
struct Script {
    replies: VecDeque<ScriptedReply>,
    repeat_last: bool,
    requests: Vec<CompletionRequest>,
}

/// Provider backed by a queue of [`ScriptedReply`]s. Clones share the script.
#[derive(Debug, Clone)]
pub struct ScriptedProvider {
    script: Arc<Mutex<Script>>,
    capabilities: ProviderCapabilities,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self::build(replies, false)
    }

    /// Replays `reply` for every request.
    pub fn repeating(reply: ScriptedReply) -> Self {
        Self::build(vec![reply], true)
    }

    fn build(replies: Vec<ScriptedReply>, repeat_last: bool) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                replies: replies.into(),
                repeat_last,
                requests: Vec::new(),
            })),
            capabilities: ProviderCapabilities {
                streaming: true,
                tool_calling: true,
                prompt_caching: false,
                max_context_tokens: 200_000,
                max_output_tokens: 4096,
            },
        }
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.lock().requests.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_reply(&self, request: &CompletionRequest) -> ScriptedReply {
        let mut script = self.lock();
        script.requests.push(request.clone());
        let reply = if script.repeat_last && script.replies.len() == 1 {
            script.replies.front().cloned()
        } else {
            script.replies.pop_front()
        };
        reply.unwrap_or_else(|| {
            ScriptedReply::Fail(LlmError::InvalidRequest("script exhausted".to_string()))
        })
    }

    fn events(text: &str, tool_calls: &[ToolCall]) -> Vec<Result<StreamEvent, LlmError>> {
        let mut events = vec![Ok(StreamEvent::Connected)];
        // split_inclusive keeps the whitespace, so fragments re-join exactly
        for piece in text.split_inclusive(' ') {
            events.push(Ok(StreamEvent::TextDelta {
                index: 0,
                text: piece.to_string(),
            }));
        }
        for call in tool_calls {
            events.push(Ok(StreamEvent::ToolUseComplete {
                id: call.id.clone(),
                name: call.name.clone(),
                input: serde_json::Value::Object(call.arguments.clone()),
            }));
        }
        let stop_reason = if tool_calls.is_empty() {
            StopReason::EndTurn
        } else {
            StopReason::ToolUse
        };
        events.push(Ok(StreamEvent::MessageDelta { stop_reason }));
        events.push(Ok(StreamEvent::Usage(Self::usage(text))));
        events.push(Ok(StreamEvent::Done));
        events
    }

    fn usage(text: &str) -> Usage {
        Usage {
            input_tokens: 0,
            output_tokens: text.split_whitespace().count() as u32,
            cache_creation_input_tokens: None,
            cache_read_input_tokens: None,
        }
    }
}

impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        match self.next_reply(request) {
            ScriptedReply::Reply { text, tool_calls } => Ok(CompletionResponse {
                id: "scripted".to_string(),
                usage: Self::usage(&text),
                stop_reason: if tool_calls.is_empty() {
                    StopReason::EndTurn
                } else {
                    StopReason::ToolUse
                },
                content: text,
                tool_calls,
                model: request.model.clone(),
            }),
            ScriptedReply::Fail(err) | ScriptedReply::BreakAfter { error: err, .. } => Err(err),
            ScriptedReply::Stall => std::future::pending().await,
        }
    }

    fn stream(
        &self,
        request: CompletionRequest,
    ) -> Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static>> {
        match self.next_reply(&request) {
            ScriptedReply::Reply { text, tool_calls } => {
                Box::pin(stream::iter(Self::events(&text, &tool_calls)))
            }
            ScriptedReply::Fail(err) => Box::pin(stream::iter(vec![Err(err)])),
            ScriptedReply::BreakAfter { text, error } => Box::pin(stream::iter(vec![
                Ok(StreamEvent::Connected),
                Ok(StreamEvent::TextDelta { index: 0, text }),
                Err(error),
            ])),
            ScriptedReply::Stall => Box::pin(stream::pending()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "m".into(),
            messages: vec![],
            system: vec![],
            tools: vec![],
            max_tokens: 10,
            temperature: None,
            stream: true,
            stop_sequences: None,
        }
    }

    #[tokio::test]
    async fn test_fragments_rejoin_to_original_text() {
        let provider = ScriptedProvider::new(vec![ScriptedReply::text("We have 18:30 and 19:00")]);
        let events: Vec<_> = provider.stream(request()).collect().await;
        let text: String = events
            .iter()
            .filter_map(|e| match e {
                Ok(StreamEvent::TextDelta { text, .. }) => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "We have 18:30 and 19:00");
        assert!(matches!(events.last(), Some(Ok(StreamEvent::Done))));
    }

    #[tokio::test]
    async fn test_exhausted_script_fails() {
        let provider = ScriptedProvider::new(vec![]);
        let err = provider.complete(&request()).await.unwrap_err();
        assert!(matches!(err, LlmError::InvalidRequest(_)));
        assert_eq!(provider.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_repeating_never_runs_out() {
        let provider = ScriptedProvider::repeating(ScriptedReply::text("again"));
        for _ in 0..3 {
            let response = provider.complete(&request()).await.unwrap();
            assert_eq!(response.content, "again");
        }
    }
}
