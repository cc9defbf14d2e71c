//! AnthropicProvider -- concrete [`LlmProvider`] implementation for Anthropic Claude.
//!
//! Sends requests to the Anthropic Messages API (`/v1/messages`) with
//! proper authentication headers. Supports both non-streaming (`complete`)
//! and streaming (`stream`) modes.
//!
//! The API key is wrapped in [`secrecy::SecretString`] and is never logged
//! or included in `Debug` output.

use std::pin::Pin;
use std::time::Duration;

use futures_util::Stream;
use secrecy::{ExposeSecret, SecretString};

use bistro_core::llm::provider::LlmProvider;
use bistro_types::llm::{
    CompletionRequest, CompletionResponse, LlmError, MessageRole, PromptBlock, ProviderCapabilities,
    StreamEvent, Usage,
};
use bistro_types::turn::ToolCall;

use super::streaming::{create_anthropic_stream, parse_stop_reason};
use super::types::{
    AnthropicContentBlock, AnthropicMessage, AnthropicNonStreamResponse, AnthropicRequest,
    AnthropicRequestBlock, AnthropicSystemBlock, AnthropicTool, CacheControl,
};

/// The Anthropic API version header value.
pub(super) const API_VERSION: &str = "2023-06-01";

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Map a non-2xx status onto an [`LlmError`].
///
/// 5xx responses other than 529 count as transport failures so the
/// invoker retries them.
pub(super) fn map_status(status: u16, body: String) -> LlmError {
    match status {
        400 | 404 | 413 | 422 => LlmError::InvalidRequest(format!("HTTP {status}: {body}")),
        401 | 403 => LlmError::AuthenticationFailed,
        429 => LlmError::RateLimited { retry_after_ms: None },
        529 => LlmError::Overloaded(body),
        500..=599 => LlmError::Transport(format!("HTTP {status}: {body}")),
        _ => LlmError::Provider {
            message: format!("HTTP {status}: {body}"),
        },
    }
}

pub(super) fn map_send_error(error: reqwest::Error) -> LlmError {
    if error.is_timeout() {
        LlmError::Timeout { after_ms: 0 }
    } else {
        LlmError::Transport(format!("HTTP request failed: {error}"))
    }
}

/// Anthropic Claude LLM provider.
///
/// The API key is stored as a [`SecretString`] and is only exposed when
/// constructing HTTP request headers.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    capabilities: ProviderCapabilities,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider for `model`.
    ///
    /// Only the connect phase has a client-level timeout; the invoker owns
    /// the per-request deadline.
    pub fn new(api_key: SecretString, model: String) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| LlmError::Transport(format!("failed to build HTTP client: {e}")))?;

        let capabilities = Self::capabilities_for_model(&model);

        Ok(Self {
            client,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model,
            capabilities,
        })
    }

    /// The default model for this provider.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Override the base URL (proxies, local test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn capabilities_for_model(model: &str) -> ProviderCapabilities {
        let max_output_tokens = if model.contains("opus") {
            32_000
        } else if model.contains("sonnet") || model.contains("haiku") {
            8_192
        } else {
            4_096
        };
        ProviderCapabilities {
            streaming: true,
            tool_calling: true,
            prompt_caching: true,
            max_context_tokens: 200_000,
            max_output_tokens,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Convert a generic [`CompletionRequest`] into an [`AnthropicRequest`].
    ///
    /// Tool-result messages become user messages, and adjacent messages
    /// with the same wire role are merged so roles alternate. A cache
    /// breakpoint marks the last block of its message.
    fn to_anthropic_request(&self, request: &CompletionRequest, stream: bool) -> AnthropicRequest {
        let mut messages: Vec<AnthropicMessage> = Vec::with_capacity(request.messages.len());

        for message in &request.messages {
            let role = match message.role {
                MessageRole::Assistant => "assistant",
                MessageRole::User | MessageRole::Tool => "user",
            };
            let mut blocks: Vec<AnthropicRequestBlock> =
                message.content.iter().map(to_request_block).collect();
            if blocks.is_empty() {
                continue;
            }
            if message.cache_breakpoint {
                if let Some(last) = blocks.last_mut() {
                    last.set_cache_control(CacheControl::EPHEMERAL);
                }
            }

            match messages.last_mut() {
                Some(previous) if previous.role == role => previous.content.append(&mut blocks),
                _ => messages.push(AnthropicMessage { role, content: blocks }),
            }
        }

        let system = request
            .system
            .iter()
            .map(|block| AnthropicSystemBlock {
                kind: "text",
                text: block.text.clone(),
                cache_control: block.cache_breakpoint.then_some(CacheControl::EPHEMERAL),
            })
            .collect();

        let tools = request
            .tools
            .iter()
            .map(|tool| AnthropicTool {
                name: tool.name.clone(),
                description: tool.description.clone(),
                input_schema: tool.input_schema.clone(),
            })
            .collect();

        let model = if request.model.is_empty() {
            self.model.clone()
        } else {
            request.model.clone()
        };

        AnthropicRequest {
            model,
            max_tokens: request.max_tokens,
            messages,
            system,
            tools,
            stream,
            temperature: request.temperature,
            stop_sequences: request.stop_sequences.clone(),
        }
    }
}

fn to_request_block(block: &PromptBlock) -> AnthropicRequestBlock {
    match block {
        PromptBlock::Text { text } => AnthropicRequestBlock::Text {
            text: text.clone(),
            cache_control: None,
        },
        PromptBlock::ToolUse { id, name, input } => AnthropicRequestBlock::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: input.clone(),
            cache_control: None,
        },
        PromptBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => AnthropicRequestBlock::ToolResult {
            tool_use_id: tool_use_id.clone(),
            content: content.clone(),
            is_error: *is_error,
            cache_control: None,
        },
    }
}

// AnthropicProvider does not derive Debug; the key stays out of any output.

impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = self.to_anthropic_request(request, false);
        let url = self.url("/v1/messages");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(map_status(status.as_u16(), error_body));
        }

        let anthropic_resp: AnthropicNonStreamResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Deserialization(format!("failed to parse response: {e}")))?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for block in anthropic_resp.content {
            match block {
                AnthropicContentBlock::Text { text } => content.push_str(&text),
                AnthropicContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments: match input {
                        serde_json::Value::Object(map) => map,
                        _ => serde_json::Map::new(),
                    },
                }),
                AnthropicContentBlock::Other => {}
            }
        }

        Ok(CompletionResponse {
            id: anthropic_resp.id,
            content,
            tool_calls,
            model: anthropic_resp.model,
            stop_reason: parse_stop_reason(anthropic_resp.stop_reason.as_deref()),
            usage: Usage {
                input_tokens: anthropic_resp.usage.input_tokens,
                output_tokens: anthropic_resp.usage.output_tokens,
                cache_creation_input_tokens: anthropic_resp.usage.cache_creation_input_tokens,
                cache_read_input_tokens: anthropic_resp.usage.cache_read_input_tokens,
            },
        })
    }

    fn stream(
        &self,
        request: CompletionRequest,
    ) -> Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static>> {
        let body = self.to_anthropic_request(&request, true);
        create_anthropic_stream(
            self.client.clone(),
            self.url("/v1/messages"),
            body,
            self.api_key.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bistro_types::llm::{Message, SystemBlock, ToolDefinition};
    use futures_util::StreamExt;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn make_provider() -> AnthropicProvider {
        AnthropicProvider::new(
            SecretString::from("test-key-not-real"),
            "claude-sonnet-4-20250514".to_string(),
        )
        .unwrap()
    }

    fn request(messages: Vec<Message>) -> CompletionRequest {
        CompletionRequest {
            model: String::new(),
            messages,
            system: vec![
                SystemBlock {
                    text: "You are the host at Bistro.".into(),
                    cache_breakpoint: true,
                },
                SystemBlock {
                    text: "Previous session summary: ...".into(),
                    cache_breakpoint: false,
                },
            ],
            tools: vec![ToolDefinition {
                name: "menu".into(),
                description: "Today's menu".into(),
                input_schema: json!({"type": "object", "properties": {}, "required": []}),
            }],
            max_tokens: 512,
            temperature: Some(0.2),
            stream: true,
            stop_sequences: None,
        }
    }

    /// Serve one canned HTTP response on a local port and return its base URL.
    async fn serve_once(status_line: &'static str, content_type: &'static str, body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            let head = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: {content_type}\r\nconnection: close\r\n\r\n"
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(body.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{addr}")
    }

    /// Drain the request head and its `content-length` body.
    async fn read_request(socket: &mut tokio::net::TcpStream) {
        let mut buf = vec![0u8; 64 * 1024];
        let mut seen = Vec::new();
        loop {
            if let Some(end) = seen.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&seen[..end]).to_lowercase();
                let length = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if seen.len() >= end + 4 + length {
                    return;
                }
            }
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            seen.extend_from_slice(&buf[..n]);
        }
    }

    fn sse(events: &[(&str, &str)]) -> String {
        events
            .iter()
            .map(|(event, data)| format!("event: {event}\ndata: {data}\n\n"))
            .collect()
    }

    #[test]
    fn test_provider_name_and_capabilities() {
        let provider = make_provider();
        assert_eq!(provider.name(), "anthropic");
        let caps = provider.capabilities();
        assert!(caps.prompt_caching);
        assert!(caps.tool_calling);
        assert_eq!(caps.max_output_tokens, 8_192);
    }

    #[test]
    fn test_tool_results_fold_into_user_role() {
        let provider = make_provider();
        let messages = vec![
            Message::text(MessageRole::User, "table for 2 tomorrow"),
            Message {
                role: MessageRole::Assistant,
                content: vec![PromptBlock::ToolUse {
                    id: "toolu_1".into(),
                    name: "availability".into(),
                    input: json!({"partySize": 2}),
                }],
                cache_breakpoint: false,
            },
            Message {
                role: MessageRole::Tool,
                content: vec![PromptBlock::ToolResult {
                    tool_use_id: "toolu_1".into(),
                    content: "{\"times\":[\"18:30\"]}".into(),
                    is_error: false,
                }],
                cache_breakpoint: false,
            },
            Message {
                cache_breakpoint: true,
                ..Message::text(MessageRole::User, "the first one please")
            },
        ];

        let body = provider.to_anthropic_request(&request(messages), true);
        assert_eq!(body.model, "claude-sonnet-4-20250514");
        let roles: Vec<_> = body.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec!["user", "assistant", "user"]);
        assert_eq!(body.messages[2].content.len(), 2);

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][2]["content"][0]["type"], "tool_result");
        assert!(json["messages"][2]["content"][0].get("cache_control").is_none());
        assert_eq!(json["messages"][2]["content"][1]["cache_control"]["type"], "ephemeral");
        assert_eq!(json["system"][0]["cache_control"]["type"], "ephemeral");
        assert!(json["system"][1].get("cache_control").is_none());
        assert_eq!(json["tools"][0]["name"], "menu");
        assert_eq!(json["tools"][0]["input_schema"]["type"], "object");
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(map_status(400, String::new()), LlmError::InvalidRequest(_)));
        assert!(matches!(map_status(401, String::new()), LlmError::AuthenticationFailed));
        assert!(matches!(map_status(429, String::new()), LlmError::RateLimited { .. }));
        assert!(matches!(map_status(529, String::new()), LlmError::Overloaded(_)));
        assert!(map_status(503, "down".into()).is_transient());
        assert!(!map_status(400, "bad".into()).is_transient());
    }

    #[test]
    fn test_base_url_override() {
        let provider = make_provider().with_base_url("http://localhost:8080/");
        assert_eq!(provider.url("/v1/messages"), "http://localhost:8080/v1/messages");
    }

    #[tokio::test]
    async fn test_stream_over_http() {
        let body = sse(&[
            ("message_start", r#"{"type":"message_start","message":{"id":"msg_1","model":"claude","usage":{"input_tokens":9,"output_tokens":1}}}"#),
            ("content_block_start", r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#),
            ("content_block_delta", r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}"#),
            ("content_block_stop", r#"{"type":"content_block_stop","index":0}"#),
            ("message_delta", r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":2}}"#),
            ("message_stop", r#"{"type":"message_stop"}"#),
        ]);
        let base = serve_once("200 OK", "text/event-stream", body).await;
        let provider = make_provider().with_base_url(base);

        let events: Vec<_> = provider
            .stream(request(vec![Message::text(MessageRole::User, "hi")]))
            .collect()
            .await;
        assert!(matches!(events.first(), Some(Ok(StreamEvent::Connected))));
        assert!(matches!(events.last(), Some(Ok(StreamEvent::Done))));
        assert!(events.iter().any(|e| matches!(e, Ok(StreamEvent::TextDelta { text, .. }) if text == "Hello")));
    }

    #[tokio::test]
    async fn test_stream_cut_short_is_stream_error() {
        let body = sse(&[(
            "message_start",
            r#"{"type":"message_start","message":{"id":"msg_2","model":"claude"}}"#,
        )]);
        let base = serve_once("200 OK", "text/event-stream", body).await;
        let provider = make_provider().with_base_url(base);

        let events: Vec<_> = provider
            .stream(request(vec![Message::text(MessageRole::User, "hi")]))
            .collect()
            .await;
        assert!(matches!(events.last(), Some(Err(LlmError::Stream(_)))));
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let base = serve_once(
            "500 Internal Server Error",
            "application/json",
            r#"{"type":"error","error":{"type":"api_error","message":"boom"}}"#.to_string(),
        )
        .await;
        let provider = make_provider().with_base_url(base);

        let events: Vec<_> = provider
            .stream(request(vec![Message::text(MessageRole::User, "hi")]))
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            Err(err @ LlmError::Transport(message)) => {
                assert!(err.is_transient());
                assert!(message.contains("500"));
            }
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_complete_collects_tool_calls() {
        let base = serve_once(
            "200 OK",
            "application/json",
            json!({
                "id": "msg_3",
                "content": [
                    {"type": "text", "text": "Checking."},
                    {"type": "tool_use", "id": "toolu_5", "name": "menu", "input": {}}
                ],
                "model": "claude",
                "stop_reason": "tool_use",
                "usage": {"input_tokens": 20, "output_tokens": 8}
            })
            .to_string(),
        )
        .await;
        let provider = make_provider().with_base_url(base);

        let response = provider
            .complete(&request(vec![Message::text(MessageRole::User, "menu?")]))
            .await
            .unwrap();
        assert_eq!(response.content, "Checking.");
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "menu");
        assert_eq!(response.usage.output_tokens, 8);
    }
}
