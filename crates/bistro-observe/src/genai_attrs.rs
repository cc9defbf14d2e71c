//! OpenTelemetry GenAI semantic convention names.
//!
//! `tracing` macros need literal field names, so spans declare the fields
//! inline and these constants are used for `Span::record` calls and for
//! field values.

// --- Usage attributes ---

/// Input tokens consumed by one model call.
pub const GEN_AI_USAGE_INPUT_TOKENS: &str = "gen_ai.usage.input_tokens";

/// Output tokens generated by one model call.
pub const GEN_AI_USAGE_OUTPUT_TOKENS: &str = "gen_ai.usage.output_tokens";

/// Why the model stopped (e.g. "end_turn", "tool_use").
pub const GEN_AI_RESPONSE_FINISH_REASONS: &str = "gen_ai.response.finish_reasons";

// --- Operation name values ---

/// A model completion inside a turn.
pub const OP_CHAT: &str = "chat";

/// One run of the state machine for a thread.
pub const OP_INVOKE_AGENT: &str = "invoke_agent";

/// A backend tool call.
pub const OP_EXECUTE_TOOL: &str = "execute_tool";

/// Condensing evicted history into the running summary.
pub const OP_SUMMARIZE_CONTEXT: &str = "summarize_context";
