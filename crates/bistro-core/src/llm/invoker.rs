//! Model invocation with a request timeout and bounded retries.
//!
//! `ModelInvoker` sits between the state machine and a `BoxLlmProvider`.
//! Transient failures are retried with exponential backoff up to
//! `max_attempts` total attempts; the state machine only ever sees the
//! final outcome. A streamed invocation is retried only while no fragment
//! has been forwarded, since forwarded text cannot be taken back.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tracing::{Instrument, debug, field, info_span, warn};

use bistro_observe::genai_attrs::{
    GEN_AI_RESPONSE_FINISH_REASONS, GEN_AI_USAGE_INPUT_TOKENS, GEN_AI_USAGE_OUTPUT_TOKENS, OP_CHAT,
};

use bistro_types::config::ModelConfig;
use bistro_types::error::FailureKind;
use bistro_types::llm::{
    CompletionRequest, LlmError, Message, StopReason, StreamEvent, SystemBlock, ToolDefinition,
    Usage,
};
use bistro_types::turn::ToolCall;

use super::box_provider::BoxLlmProvider;

/// Upper bound for a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(8);

/// An assembled prompt, independent of model settings.
#[derive(Debug, Clone, Default)]
pub struct Prompt {
    pub system: Vec<SystemBlock>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    /// Overrides the configured temperature for this call.
    pub temperature: Option<f64>,
}

/// Timeout and retry settings.
#[derive(Debug, Clone)]
pub struct InvokePolicy {
    /// Deadline for one attempt, from request to final event.
    pub timeout: Duration,
    /// Total attempts, including the first. Always at least one.
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl InvokePolicy {
    pub fn from_config(config: &ModelConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
        }
    }

    /// Sleep before attempt `attempt + 1`: base * 2^(attempt-1), capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

impl Default for InvokePolicy {
    fn default() -> Self {
        Self::from_config(&ModelConfig::default())
    }
}

/// Model settings stamped onto every request.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl ModelSettings {
    pub fn from_config(config: &ModelConfig) -> Self {
        Self {
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

/// Final outcome of an invocation that did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("model did not respond within {timeout_ms}ms ({attempts} attempts)")]
    Timeout { timeout_ms: u64, attempts: u32 },

    #[error("model transport failed after {attempts} attempts: {source}")]
    Transport {
        attempts: u32,
        #[source]
        source: LlmError,
    },

    #[error("model rejected the request: {0}")]
    Rejected(#[source] LlmError),
}

impl InvokeError {
    fn from_llm(err: LlmError, attempts: u32, timeout: Duration) -> Self {
        match err {
            LlmError::Timeout { .. } => InvokeError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
                attempts,
            },
            err if err.is_transient() => InvokeError::Transport { attempts, source: err },
            err => InvokeError::Rejected(err),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            InvokeError::Timeout { .. } => FailureKind::ModelTimeout,
            InvokeError::Transport { .. } | InvokeError::Rejected(_) => {
                FailureKind::ModelTransportFailure
            }
        }
    }
}

/// A complete model response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelReply {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: Option<StopReason>,
    pub usage: Usage,
    /// Attempts it took to get this reply.
    pub attempts: u32,
}

/// One item of a streamed invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelChunk {
    Fragment(String),
    /// Always the last item of a successful stream.
    Complete(ModelReply),
}

pub type ModelStream = Pin<Box<dyn Stream<Item = Result<ModelChunk, InvokeError>> + Send + 'static>>;

/// Folds provider stream events into a [`ModelReply`].
#[derive(Debug, Default)]
struct ReplyBuilder {
    reply: ModelReply,
    done: bool,
}

impl ReplyBuilder {
    /// Apply one event; returns text to forward, if any.
    fn apply(&mut self, event: StreamEvent) -> Option<String> {
        match event {
            StreamEvent::TextDelta { text, .. } if !text.is_empty() => {
                self.reply.text.push_str(&text);
                Some(text)
            }
            StreamEvent::ToolUseComplete { id, name, input } => {
                let arguments = match input {
                    serde_json::Value::Object(map) => map,
                    serde_json::Value::Null => serde_json::Map::new(),
                    other => {
                        let mut map = serde_json::Map::new();
                        map.insert("value".to_string(), other);
                        map
                    }
                };
                self.reply.tool_calls.push(ToolCall { id, name, arguments });
                None
            }
            StreamEvent::MessageDelta { stop_reason } => {
                self.reply.stop_reason = Some(stop_reason);
                None
            }
            StreamEvent::Usage(usage) => {
                // message_start reports input tokens, message_delta output tokens
                self.reply.usage.input_tokens = self.reply.usage.input_tokens.max(usage.input_tokens);
                self.reply.usage.output_tokens = self.reply.usage.output_tokens.max(usage.output_tokens);
                if usage.cache_creation_input_tokens.is_some() {
                    self.reply.usage.cache_creation_input_tokens = usage.cache_creation_input_tokens;
                }
                if usage.cache_read_input_tokens.is_some() {
                    self.reply.usage.cache_read_input_tokens = usage.cache_read_input_tokens;
                }
                None
            }
            StreamEvent::Done => {
                self.done = true;
                None
            }
            _ => None,
        }
    }

    fn finish(mut self, attempts: u32) -> ModelReply {
        self.reply.attempts = attempts;
        self.reply
    }
}

/// Sends prompts to the model with a timeout and bounded retries.
pub struct ModelInvoker {
    provider: Arc<BoxLlmProvider>,
    settings: ModelSettings,
    policy: InvokePolicy,
}

impl ModelInvoker {
    pub fn new(provider: BoxLlmProvider, settings: ModelSettings, policy: InvokePolicy) -> Self {
        Self {
            provider: Arc::new(provider),
            settings,
            policy,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn policy(&self) -> &InvokePolicy {
        &self.policy
    }

    fn request(&self, prompt: &Prompt, stream: bool) -> CompletionRequest {
        CompletionRequest {
            model: self.settings.model.clone(),
            messages: prompt.messages.clone(),
            system: prompt.system.clone(),
            tools: prompt.tools.clone(),
            max_tokens: self.settings.max_tokens,
            temperature: Some(prompt.temperature.unwrap_or(self.settings.temperature)),
            stream,
            stop_sequences: None,
        }
    }

    /// Invoke without streaming and return the complete reply.
    pub async fn complete(&self, prompt: &Prompt) -> Result<ModelReply, InvokeError> {
        let request = self.request(prompt, false);
        let span = info_span!(
            "gen_ai.complete",
            gen_ai.operation.name = OP_CHAT,
            gen_ai.system = self.provider.name(),
            gen_ai.request.model = %request.model,
            gen_ai.request.max_tokens = request.max_tokens,
            gen_ai.request.temperature = ?request.temperature,
            gen_ai.request.stream = false,
            gen_ai.usage.input_tokens = field::Empty,
            gen_ai.usage.output_tokens = field::Empty,
            gen_ai.response.finish_reasons = field::Empty,
        );

        async {
            let mut attempt = 0;
            loop {
                attempt += 1;
                let outcome = match tokio::time::timeout(
                    self.policy.timeout,
                    self.provider.complete(&request),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(LlmError::Timeout {
                        after_ms: self.policy.timeout.as_millis() as u64,
                    }),
                };

                match outcome {
                    Ok(response) => {
                        let span = tracing::Span::current();
                        span.record(GEN_AI_USAGE_INPUT_TOKENS, response.usage.input_tokens);
                        span.record(GEN_AI_USAGE_OUTPUT_TOKENS, response.usage.output_tokens);
                        span.record(GEN_AI_RESPONSE_FINISH_REASONS, field::display(&response.stop_reason));
                        return Ok(ModelReply {
                            text: response.content,
                            tool_calls: response.tool_calls,
                            stop_reason: Some(response.stop_reason),
                            usage: response.usage,
                            attempts: attempt,
                        });
                    }
                    Err(err) if err.is_transient() && attempt < self.policy.max_attempts => {
                        let delay = self.policy.backoff(attempt);
                        warn!(attempt, error = %err, delay_ms = delay.as_millis() as u64, "Model call failed, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    Err(err) => {
                        return Err(InvokeError::from_llm(err, attempt, self.policy.timeout));
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Invoke with streaming.
    ///
    /// Yields text fragments in generation order and ends with exactly one
    /// `ModelChunk::Complete`, or with a single error.
    pub fn stream(&self, prompt: &Prompt) -> ModelStream {
        let request = self.request(prompt, true);
        let provider = Arc::clone(&self.provider);
        let policy = self.policy.clone();

        let span = info_span!(
            "gen_ai.stream",
            gen_ai.operation.name = OP_CHAT,
            gen_ai.system = provider.name(),
            gen_ai.request.model = %request.model,
            gen_ai.request.max_tokens = request.max_tokens,
            gen_ai.request.temperature = ?request.temperature,
            gen_ai.request.stream = true,
            gen_ai.usage.input_tokens = field::Empty,
            gen_ai.usage.output_tokens = field::Empty,
            gen_ai.response.finish_reasons = field::Empty,
        );

        let stream = async_stream::stream! {
            let mut attempt = 0;
            loop {
                attempt += 1;
                let deadline = tokio::time::Instant::now() + policy.timeout;
                let mut events = provider.stream(request.clone());
                let mut builder = ReplyBuilder::default();
                let mut forwarded = false;

                let failure = loop {
                    match tokio::time::timeout_at(deadline, events.next()).await {
                        Err(_) => {
                            break Some(LlmError::Timeout {
                                after_ms: policy.timeout.as_millis() as u64,
                            });
                        }
                        Ok(None) => break None,
                        Ok(Some(Err(err))) => break Some(err),
                        Ok(Some(Ok(event))) => {
                            if let Some(text) = builder.apply(event) {
                                forwarded = true;
                                yield Ok(ModelChunk::Fragment(text));
                            }
                            if builder.done {
                                break None;
                            }
                        }
                    }
                };

                match failure {
                    None => {
                        let reply = builder.finish(attempt);
                        let span = tracing::Span::current();
                        span.record(GEN_AI_USAGE_INPUT_TOKENS, reply.usage.input_tokens);
                        span.record(GEN_AI_USAGE_OUTPUT_TOKENS, reply.usage.output_tokens);
                        if let Some(reason) = &reply.stop_reason {
                            span.record(GEN_AI_RESPONSE_FINISH_REASONS, field::display(reason));
                        }
                        debug!(attempt, tool_calls = reply.tool_calls.len(), "Model stream complete");
                        yield Ok(ModelChunk::Complete(reply));
                        break;
                    }
                    Some(err) if err.is_transient() && !forwarded && attempt < policy.max_attempts => {
                        let delay = policy.backoff(attempt);
                        warn!(attempt, error = %err, delay_ms = delay.as_millis() as u64, "Model stream failed, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    Some(err) => {
                        warn!(attempt, error = %err, forwarded, "Model stream failed");
                        yield Err(InvokeError::from_llm(err, attempt, policy.timeout));
                        break;
                    }
                }
            }
        };

        Box::pin(StreamInSpan {
            inner: Box::pin(stream),
            span,
        })
    }
}

pin_project_lite::pin_project! {
    /// Keeps a span entered while the wrapped stream is polled.
    struct StreamInSpan<S> {
        #[pin]
        inner: S,
        span: tracing::Span,
    }
}

impl<S: Stream> Stream for StreamInSpan<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let _enter = this.span.enter();
        this.inner.poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::scripted::{ScriptedProvider, ScriptedReply};
    use bistro_types::llm::MessageRole;
    use serde_json::json;

    fn policy(max_attempts: u32) -> InvokePolicy {
        InvokePolicy {
            timeout: Duration::from_millis(200),
            max_attempts,
            backoff_base: Duration::from_millis(1),
        }
    }

    fn settings() -> ModelSettings {
        ModelSettings {
            model: "test-model".into(),
            max_tokens: 256,
            temperature: 0.7,
        }
    }

    fn prompt() -> Prompt {
        Prompt {
            messages: vec![Message::text(MessageRole::User, "table for 2 tomorrow at 7")],
            ..Prompt::default()
        }
    }

    async fn collect(stream: ModelStream) -> Vec<Result<ModelChunk, InvokeError>> {
        stream.collect().await
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = InvokePolicy {
            timeout: Duration::from_secs(1),
            max_attempts: 10,
            backoff_base: Duration::from_millis(500),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2000));
        assert_eq!(policy.backoff(9), MAX_BACKOFF);
    }

    #[tokio::test]
    async fn test_stream_fragments_in_order_then_complete() {
        let provider = ScriptedProvider::new(vec![ScriptedReply::text("We have 18:30 and 19:00")]);
        let invoker = ModelInvoker::new(BoxLlmProvider::new(provider), settings(), policy(3));

        let chunks = collect(invoker.stream(&prompt())).await;
        let mut text = String::new();
        let mut completes = 0;
        for chunk in &chunks {
            match chunk.as_ref().unwrap() {
                ModelChunk::Fragment(f) => text.push_str(f),
                ModelChunk::Complete(reply) => {
                    completes += 1;
                    assert_eq!(reply.text, "We have 18:30 and 19:00");
                    assert_eq!(reply.attempts, 1);
                }
            }
        }
        assert_eq!(text, "We have 18:30 and 19:00");
        assert_eq!(completes, 1);
        assert!(matches!(chunks.last(), Some(Ok(ModelChunk::Complete(_)))));
    }

    #[tokio::test]
    async fn test_stream_retries_transient_failure_before_first_fragment() {
        let provider = ScriptedProvider::new(vec![
            ScriptedReply::Fail(LlmError::Overloaded("busy".into())),
            ScriptedReply::tool_call("call_1", "availability", json!({"date": "2026-10-16", "partySize": 2})),
        ]);
        let handle = provider.clone();
        let invoker = ModelInvoker::new(BoxLlmProvider::new(provider), settings(), policy(3));

        let chunks = collect(invoker.stream(&prompt())).await;
        let Some(Ok(ModelChunk::Complete(reply))) = chunks.last() else {
            panic!("expected a complete reply, got {chunks:?}");
        };
        assert_eq!(reply.attempts, 2);
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].arguments["partySize"], 2);
        assert_eq!(handle.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_stream_times_out_after_max_attempts() {
        let provider = ScriptedProvider::new(vec![ScriptedReply::Stall, ScriptedReply::Stall]);
        let handle = provider.clone();
        let invoker = ModelInvoker::new(BoxLlmProvider::new(provider), settings(), policy(2));

        let chunks = collect(invoker.stream(&prompt())).await;
        assert_eq!(chunks.len(), 1);
        let err = chunks.into_iter().next().unwrap().unwrap_err();
        assert_eq!(err.kind(), FailureKind::ModelTimeout);
        assert!(matches!(err, InvokeError::Timeout { attempts: 2, .. }));
        assert_eq!(handle.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_non_transient_error_is_not_retried() {
        let provider = ScriptedProvider::new(vec![ScriptedReply::Fail(LlmError::AuthenticationFailed)]);
        let handle = provider.clone();
        let invoker = ModelInvoker::new(BoxLlmProvider::new(provider), settings(), policy(3));

        let err = invoker.complete(&prompt()).await.unwrap_err();
        assert!(matches!(err, InvokeError::Rejected(LlmError::AuthenticationFailed)));
        assert_eq!(err.kind(), FailureKind::ModelTransportFailure);
        assert_eq!(handle.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_complete_applies_temperature_override() {
        let provider = ScriptedProvider::new(vec![ScriptedReply::text("summary")]);
        let handle = provider.clone();
        let invoker = ModelInvoker::new(BoxLlmProvider::new(provider), settings(), policy(1));

        let prompt = Prompt {
            temperature: Some(0.0),
            ..prompt()
        };
        let reply = invoker.complete(&prompt).await.unwrap();
        assert_eq!(reply.text, "summary");
        assert_eq!(handle.requests()[0].temperature, Some(0.0));
        assert!(!handle.requests()[0].stream);
    }
}
