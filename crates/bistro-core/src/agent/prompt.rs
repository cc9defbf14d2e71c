//! Prompt assembly for the AGENT node.
//!
//! The prompt is built in two layers. The stable prefix is the system
//! instructions followed by the summary of evicted history; both system
//! blocks are cache breakpoints, so successive requests share a cached
//! prefix until the summary changes. After it comes the trimmed window,
//! converted turn by turn into provider-neutral messages.

use std::collections::HashSet;

use bistro_types::conversation::ConversationSummary;
use bistro_types::llm::{Message, MessageRole, PromptBlock, SystemBlock, ToolDefinition};
use bistro_types::turn::{Role, Turn};

use crate::llm::invoker::Prompt;

/// The turns the budgeter sees: the instructions as a system turn, then
/// every prompt-visible turn of the log. Narration and failure turns are
/// left out.
pub fn prompt_view(instructions: &str, turns: &[Turn]) -> Vec<Turn> {
    std::iter::once(Turn::system(instructions))
        .chain(turns.iter().filter(|t| t.is_message() && t.role != Role::System).cloned())
        .collect()
}

/// Assemble the request for one AGENT invocation.
pub fn build_prompt(
    instructions: &str,
    summary: Option<&ConversationSummary>,
    window: &[Turn],
    tools: Vec<ToolDefinition>,
) -> Prompt {
    let mut system = vec![SystemBlock {
        text: instructions.to_string(),
        cache_breakpoint: true,
    }];
    if let Some(summary) = summary.filter(|s| !s.text.trim().is_empty()) {
        system.push(SystemBlock {
            text: summary.text.clone(),
            cache_breakpoint: true,
        });
    }

    let mut messages = to_messages(window);
    mark_cache_breakpoints(&mut messages);

    Prompt {
        system,
        messages,
        tools,
        temperature: None,
    }
}

/// Convert window turns into prompt messages.
///
/// Tool calls without a result in the window are dropped, and an
/// assistant turn left with neither text nor calls disappears. Adjacent
/// tool results are merged into one message.
pub fn to_messages(window: &[Turn]) -> Vec<Message> {
    let answered: HashSet<&str> = window
        .iter()
        .filter(|t| t.role == Role::Tool)
        .filter_map(|t| t.tool_call_id.as_deref())
        .collect();
    let mut issued: HashSet<&str> = HashSet::new();
    let mut messages: Vec<Message> = Vec::with_capacity(window.len());

    for turn in window {
        match turn.role {
            Role::System => {}
            Role::User => messages.push(Message::text(MessageRole::User, turn.text())),
            Role::Assistant => {
                let mut content = Vec::new();
                let text = turn.text();
                if !text.trim().is_empty() {
                    content.push(PromptBlock::Text { text });
                }
                for call in turn.tool_calls.iter().filter(|c| answered.contains(c.id.as_str())) {
                    issued.insert(call.id.as_str());
                    content.push(PromptBlock::ToolUse {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        input: serde_json::Value::Object(call.arguments.clone()),
                    });
                }
                if !content.is_empty() {
                    messages.push(Message {
                        role: MessageRole::Assistant,
                        content,
                        cache_breakpoint: false,
                    });
                }
            }
            Role::Tool => {
                let Some(call_id) = turn.tool_call_id.as_deref().filter(|id| issued.contains(id)) else {
                    continue;
                };
                let block = PromptBlock::ToolResult {
                    tool_use_id: call_id.to_string(),
                    content: turn.text(),
                    is_error: turn.tool_error.is_some(),
                };
                match messages.last_mut() {
                    Some(last) if last.role == MessageRole::Tool => last.content.push(block),
                    _ => messages.push(Message {
                        role: MessageRole::Tool,
                        content: vec![block],
                        cache_breakpoint: false,
                    }),
                }
            }
        }
    }
    messages
}

/// Mark the last message and the second-to-last user message.
pub fn mark_cache_breakpoints(messages: &mut [Message]) {
    if let Some(last) = messages.last_mut() {
        last.cache_breakpoint = true;
    }
    if let Some(index) = messages
        .iter()
        .enumerate()
        .rev()
        .filter(|(_, m)| m.role == MessageRole::User)
        .nth(1)
        .map(|(i, _)| i)
    {
        messages[index].cache_breakpoint = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bistro_types::error::FailureKind;
    use bistro_types::turn::ToolCall;
    use serde_json::json;

    fn call(id: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: "availability".into(),
            arguments: json!({"date": "2026-10-16", "partySize": 2})
                .as_object()
                .cloned()
                .unwrap(),
        }
    }

    #[test]
    fn test_view_hides_narration_and_failures() {
        let turns = vec![
            Turn::user("table for 2"),
            Turn::narration("Checking tables"),
            Turn::failure(FailureKind::ModelTimeout, "timed out"),
        ];
        let view = prompt_view("Be helpful.", &turns);
        assert_eq!(view.len(), 2);
        assert_eq!(view[0].role, Role::System);
        assert_eq!(view[1].text(), "table for 2");
    }

    #[test]
    fn test_tool_exchange_maps_to_blocks() {
        let window = vec![
            Turn::user("table for 2 tomorrow at 7"),
            Turn::assistant("Let me check.", vec![call("a"), call("b")]),
            Turn::tool_result("a", &json!({"times": ["18:30"]})),
            Turn::tool_failure("b", FailureKind::ToolExecutionFailed, "HTTP 500: boom"),
        ];
        let messages = to_messages(&window);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].content.len(), 3);
        assert!(matches!(&messages[1].content[1], PromptBlock::ToolUse { id, .. } if id == "a"));

        assert_eq!(messages[2].role, MessageRole::Tool);
        assert_eq!(messages[2].content.len(), 2);
        assert!(matches!(
            &messages[2].content[1],
            PromptBlock::ToolResult { tool_use_id, is_error: true, .. } if tool_use_id == "b"
        ));
    }

    #[test]
    fn test_dangling_calls_are_omitted() {
        let window = vec![
            Turn::user("anything at 8?"),
            Turn::assistant("", vec![call("never_answered")]),
            Turn::user("hello?"),
        ];
        let messages = to_messages(&window);
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.role == MessageRole::User));
    }

    #[test]
    fn test_breakpoints_on_last_and_second_to_last_user() {
        let window = vec![
            Turn::user("first"),
            Turn::assistant("one", vec![]),
            Turn::user("second"),
            Turn::assistant("two", vec![]),
            Turn::user("third"),
        ];
        let prompt = build_prompt("Be helpful.", None, &window, Vec::new());
        let marked: Vec<bool> = prompt.messages.iter().map(|m| m.cache_breakpoint).collect();
        assert_eq!(marked, vec![false, false, true, false, true]);
        assert_eq!(prompt.system.len(), 1);
        assert!(prompt.system[0].cache_breakpoint);
    }

    #[test]
    fn test_summary_becomes_second_system_block() {
        let summary = ConversationSummary {
            text: "Previous session summary:\nuser: hi".into(),
            covered_turns: 1,
            source_digest: "d".into(),
        };
        let prompt = build_prompt("Be helpful.", Some(&summary), &[Turn::user("again")], Vec::new());
        assert_eq!(prompt.system.len(), 2);
        assert_eq!(prompt.system[1].text, summary.text);
        assert!(prompt.system.iter().all(|b| b.cache_breakpoint));
    }
}
