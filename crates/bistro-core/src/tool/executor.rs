//! Executes one tool call with validation, a timeout and a single retry.
//!
//! Schema violations and unknown tool names never reach a tool and come
//! back as `InvalidArguments`. A failing tool is retried once with the
//! same arguments; the first error is handed to the caller's retry hook
//! before the second attempt. If that attempt fails too the result is
//! `ToolExecutionFailed` carrying the last error message.
//!
//! A tool may therefore run twice for one call. Tools with external side
//! effects (creating or cancelling a reservation) must tolerate that.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use bistro_observe::genai_attrs::OP_EXECUTE_TOOL;
use bistro_types::error::FailureKind;
use bistro_types::turn::{ToolCall, ToolError, Turn};

use super::registry::{ToolFailure, ToolRegistry};
use super::schema;

/// Attempts per call: the first plus one retry.
pub const MAX_TOOL_ATTEMPTS: u32 = 2;

/// Result of one tool call, ready to be appended as a tool turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub call_id: String,
    pub tool_name: String,
    pub result: Result<Value, ToolError>,
    /// Times the tool itself ran (0 when validation failed).
    pub attempts: u32,
}

impl ToolOutcome {
    fn failed(call: &ToolCall, kind: FailureKind, message: String, attempts: u32) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            result: Err(ToolError { kind, message }),
            attempts,
        }
    }

    pub fn to_turn(&self) -> Turn {
        match &self.result {
            Ok(payload) => Turn::tool_result(&self.call_id, payload),
            Err(err) => Turn::tool_failure(&self.call_id, err.kind, &err.message),
        }
    }
}

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn invoke(&self, call: &ToolCall) -> ToolOutcome {
        self.invoke_with(call, |_| {}).await
    }

    /// Invoke `call`, reporting the first failure to `on_retry` before retrying.
    #[tracing::instrument(
        skip_all,
        fields(gen_ai.operation.name = OP_EXECUTE_TOOL, tool = %call.name, call_id = %call.id)
    )]
    pub async fn invoke_with<F>(&self, call: &ToolCall, mut on_retry: F) -> ToolOutcome
    where
        F: FnMut(&ToolFailure) + Send,
    {
        let Some(tool) = self.registry.get(&call.name) else {
            let known: Vec<_> = self.registry.names().collect();
            let message = format!("unknown tool '{}'; available tools: {}", call.name, known.join(", "));
            warn!(%message, "Model called an unregistered tool");
            return ToolOutcome::failed(call, FailureKind::InvalidArguments, message, 0);
        };

        let args = match schema::validate(&tool.spec().schema, &call.arguments) {
            Ok(args) => args,
            Err(violations) => {
                let message = format!("invalid arguments for '{}': {}", call.name, violations.join("; "));
                debug!(%message, "Rejected tool call before execution");
                return ToolOutcome::failed(call, FailureKind::InvalidArguments, message, 0);
            }
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match tokio::time::timeout(self.timeout, tool.call(args.clone())).await {
                Ok(result) => result,
                Err(_) => Err(ToolFailure::new(format!(
                    "timed out after {}ms",
                    self.timeout.as_millis()
                ))),
            };

            match result {
                Ok(payload) => {
                    debug!(attempt, "Tool call succeeded");
                    return ToolOutcome {
                        call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        result: Ok(payload),
                        attempts: attempt,
                    };
                }
                Err(failure) if attempt < MAX_TOOL_ATTEMPTS => {
                    warn!(attempt, error = %failure, "Tool call failed, retrying with the same arguments");
                    on_retry(&failure);
                }
                Err(failure) => {
                    warn!(attempt, error = %failure, "Tool call failed after retry");
                    return ToolOutcome::failed(
                        call,
                        FailureKind::ToolExecutionFailed,
                        failure.message,
                        attempt,
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::registry::{FnTool, ToolSpec};
    use bistro_types::tool::{ArgFormat, ArgKind, ArgSpec, ToolSchema};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn schema() -> ToolSchema {
        ToolSchema::new(vec![
            ArgSpec::required("date", ArgKind::String, "").with_format(ArgFormat::Date),
            ArgSpec::required("partySize", ArgKind::Integer, "").with_minimum(1.0),
        ])
    }

    /// A tool that fails its first `failures` calls and records every argument set.
    fn flaky(failures: u32, calls: Arc<AtomicU32>, seen: Arc<std::sync::Mutex<Vec<Value>>>) -> ToolExecutor {
        let tool = FnTool::new(ToolSpec::new("availability", "Open slots", schema()), move |args| {
            let calls = Arc::clone(&calls);
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().unwrap().push(Value::Object(args));
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= failures {
                    Err(ToolFailure::http(500, "Internal Server Error"))
                } else {
                    Ok(json!({"times": ["18:30", "19:00"]}))
                }
            }
        });
        let mut registry = ToolRegistry::new();
        registry.register(tool).unwrap();
        ToolExecutor::new(Arc::new(registry), Duration::from_secs(1))
    }

    fn call(args: Value) -> ToolCall {
        ToolCall {
            id: "call_1".into(),
            name: "availability".into(),
            arguments: args.as_object().cloned().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_schema_violation_never_reaches_tool() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = flaky(0, Arc::clone(&calls), Arc::default());

        for bad in [
            json!({"date": "2026-10-16"}),
            json!({"date": "next friday", "partySize": 2}),
            json!({"date": "2026-10-16", "partySize": "2"}),
            json!({"date": "2026-10-16", "partySize": 0}),
        ] {
            let outcome = executor.invoke(&call(bad)).await;
            let err = outcome.result.unwrap_err();
            assert_eq!(err.kind, FailureKind::InvalidArguments);
            assert_eq!(outcome.attempts, 0);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_retry_once_with_same_arguments() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let executor = flaky(1, Arc::clone(&calls), Arc::clone(&seen));

        let mut retries = Vec::new();
        let outcome = executor
            .invoke_with(&call(json!({"date": "2026-10-16", "partySize": 2})), |f| {
                retries.push(f.message.clone())
            })
            .await;

        assert_eq!(outcome.result.unwrap(), json!({"times": ["18:30", "19:00"]}));
        assert_eq!(outcome.attempts, 2);
        assert_eq!(retries, vec!["HTTP 500: Internal Server Error"]);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], seen[1]);
    }

    #[tokio::test]
    async fn test_two_failures_yield_execution_failed() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = flaky(5, Arc::clone(&calls), Arc::default());

        let outcome = executor.invoke(&call(json!({"date": "2026-10-16", "partySize": 2}))).await;
        let err = outcome.result.clone().unwrap_err();
        assert_eq!(err.kind, FailureKind::ToolExecutionFailed);
        assert!(err.message.contains("HTTP 500"));
        assert_eq!(calls.load(Ordering::SeqCst), MAX_TOOL_ATTEMPTS);

        let turn = outcome.to_turn();
        assert_eq!(turn.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(turn.tool_error.unwrap().kind, FailureKind::ToolExecutionFailed);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_invalid_arguments() {
        let executor = flaky(0, Arc::default(), Arc::default());
        let mut unknown = call(json!({}));
        unknown.name = "teleport".into();
        let err = executor.invoke(&unknown).await.result.unwrap_err();
        assert_eq!(err.kind, FailureKind::InvalidArguments);
        assert!(err.message.contains("availability"));
    }
}
